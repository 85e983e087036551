use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use huddle_db::StoreError;
use huddle_db::invites::NewInvite;
use huddle_types::api::{AcceptInviteResponse, CreateInviteRequest, CreateInviteResponse, InviteDetails};
use huddle_types::models::Invite;

use crate::email::invite_email;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;

const MAX_TTL_DAYS: u32 = 30;

/// 256 bits from the OS-seeded RNG, URL-safe.
fn mint_token() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// POST /workspaces/{workspace_id}/invites
///
/// Inviting an address that already has a pending invite refreshes it and
/// keeps the old link working. The email is best-effort; the link is in the
/// response regardless.
pub async fn create_invite(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateInviteRequest>,
) -> ApiResult<(StatusCode, Json<CreateInviteResponse>)> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email address is required"));
    }

    let ttl_days = req.ttl_days.unwrap_or(state.invite_ttl_days).clamp(1, MAX_TTL_DAYS);
    let token = mint_token();
    let user_id = session.user_id;
    let to = email.clone();

    let (invite, refreshed, workspace_name) = state
        .blocking(move |db| {
            let new = NewInvite {
                workspace_id,
                email: &to,
                role: req.role,
                invited_by: user_id,
                ttl: Duration::days(i64::from(ttl_days)),
                token: &token,
            };
            let (invite, refreshed) = db.create_invite(new, Utc::now())?;
            let workspace_name = db
                .get_workspace(workspace_id)?
                .map(|w| w.name)
                .unwrap_or_default();
            Ok((invite, refreshed, workspace_name))
        })
        .await?;

    let link = state.invite_link(&invite.token);
    let (subject, body) = invite_email(&workspace_name, &link);
    if let Err(e) = state.email.send(&email, &subject, &body).await {
        warn!("Failed to send invite email to {}: {}", email, e);
    }

    let status = if refreshed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((
        status,
        Json(CreateInviteResponse {
            invite_id: invite.id,
            token: invite.token,
            link,
            refreshed,
        }),
    ))
}

pub async fn list_invites(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<Invite>>> {
    let user_id = session.user_id;
    let invites = state.blocking(move |db| db.list_invites(workspace_id, user_id)).await?;
    Ok(Json(invites))
}

/// DELETE /workspaces/{workspace_id}/invites/{invite_id}
pub async fn cancel_invite(
    State(state): State<AppState>,
    Path((workspace_id, invite_id)): Path<(Uuid, Uuid)>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Invite>> {
    let user_id = session.user_id;
    let invite = state
        .blocking(move |db| {
            match db.get_invite(invite_id)? {
                Some(invite) if invite.workspace_id == workspace_id => {}
                _ => return Err(StoreError::InviteNotFound),
            }
            db.cancel_invite(invite_id, user_id)
        })
        .await?;
    info!("Invite {} cancelled by {}", invite_id, user_id);
    Ok(Json(invite))
}

/// GET /invites/{token}: public, so the landing page can show who invited
/// whom before the visitor signs in.
pub async fn resolve_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InviteDetails>> {
    state
        .blocking(move |db| db.resolve_invite(&token, Utc::now()))
        .await?
        .map(Json)
        .ok_or(ApiError::Store(StoreError::InviteNotFound))
}

pub async fn accept_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<AcceptInviteResponse>> {
    let user_id = session.user_id;
    let accepted = state
        .blocking(move |db| db.accept_invite(&token, user_id, Utc::now()))
        .await?;
    Ok(Json(accepted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_url_safe() {
        let a = mint_token();
        let b = mint_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
