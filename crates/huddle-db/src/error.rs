//! Store error types.

use thiserror::Error;

/// Errors returned by store operations. The first group is the domain
/// taxonomy callers are expected to branch on; the rest are infrastructure
/// failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("invalid destination: {0}")]
    InvalidDestination(&'static str),

    #[error("invite not found")]
    InviteNotFound,

    #[error("invite has already been used or expired")]
    InviteAlreadyUsed,

    #[error("invite has expired")]
    InviteExpired,

    #[error("invite is for a different email address")]
    EmailMismatch,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DB lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
