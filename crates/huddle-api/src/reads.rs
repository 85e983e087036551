use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use uuid::Uuid;

use huddle_types::api::UnreadCountsResponse;
use huddle_types::events::GatewayEvent;
use huddle_types::models::{Destination, ReadStatus};

use crate::error::ApiResult;
use crate::middleware::Session;
use crate::state::AppState;

pub async fn mark_channel_read(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<ReadStatus>> {
    mark_read(&state, Destination::Channel(channel_id), session.user_id).await
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<ReadStatus>> {
    mark_read(&state, Destination::Conversation(conversation_id), session.user_id).await
}

/// Unread counts for every destination the caller can see in a workspace.
pub async fn unread_counts(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<UnreadCountsResponse>> {
    let user_id = session.user_id;
    let counts = state
        .blocking(move |db| {
            db.require_member(workspace_id, user_id)?;
            db.unread_counts(workspace_id, user_id)
        })
        .await?;
    Ok(Json(counts))
}

async fn mark_read(state: &AppState, destination: Destination, user_id: Uuid) -> ApiResult<Json<ReadStatus>> {
    let (workspace_id, status) = state
        .blocking(move |db| {
            let status = db.mark_read(user_id, destination, Utc::now())?;
            let workspace_id = db.authorize_destination(destination, user_id)?;
            Ok((workspace_id, status))
        })
        .await?;

    // Other sessions of the same user clear their badges.
    state
        .dispatcher
        .send_to_user(
            user_id,
            GatewayEvent::ReadMarked {
                workspace_id,
                destination,
                last_read_at: status.last_read_at,
            },
        )
        .await;

    Ok(Json(status))
}
