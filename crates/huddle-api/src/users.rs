use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use huddle_types::api::SyncUserRequest;
use huddle_types::events::GatewayEvent;
use huddle_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;

/// POST /users/me: create or refresh the caller's user row from their
/// session. Clients call this once after signing in.
pub async fn sync_me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SyncUserRequest>,
) -> ApiResult<Json<User>> {
    let user = state
        .blocking(move |db| {
            db.upsert_user(
                session.user_id,
                &session.name,
                &session.email.trim().to_lowercase(),
                req.image.as_deref(),
            )
        })
        .await?;
    debug!("Synced user {} <{}>", user.id, user.email);
    Ok(Json(user))
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<User>> {
    let user_id = session.user_id;
    state
        .blocking(move |db| db.get_user(user_id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    state
        .blocking(move |db| db.get_user(user_id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// POST /users/me/heartbeat: record presence for clients that don't hold a
/// gateway connection.
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<User>> {
    let user_id = session.user_id;
    let user = state.blocking(move |db| db.touch_last_seen(user_id, Utc::now())).await?;

    state.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
        user_id,
        name: user.name.clone(),
        online: true,
        last_seen: user.last_seen,
    });

    Ok(Json(user))
}

/// GET /workspaces/{workspace_id}/users
pub async fn list_workspace_users(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<User>>> {
    let user_id = session.user_id;
    let users = state
        .blocking(move |db| {
            db.require_member(workspace_id, user_id)?;
            db.list_workspace_users(workspace_id)
        })
        .await?;
    Ok(Json(users))
}
