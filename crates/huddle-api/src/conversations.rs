use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use huddle_types::api::OpenConversationRequest;
use huddle_types::models::{Conversation, Destination};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;

pub async fn list_conversations(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let user_id = session.user_id;
    let conversations = state
        .blocking(move |db| {
            db.require_member(workspace_id, user_id)?;
            db.list_conversations(workspace_id, user_id)
        })
        .await?;
    Ok(Json(conversations))
}

/// Find or open the DM between the caller and another member. Opening the
/// same pair again returns the existing conversation.
pub async fn open_conversation(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<OpenConversationRequest>,
) -> ApiResult<Json<Conversation>> {
    let user_id = session.user_id;
    let conversation = state
        .blocking(move |db| db.get_or_create_conversation(workspace_id, user_id, req.user_id))
        .await?;
    Ok(Json(conversation))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Conversation>> {
    let user_id = session.user_id;
    state
        .blocking(move |db| {
            db.authorize_destination(Destination::Conversation(conversation_id), user_id)?;
            db.get_conversation(conversation_id)
        })
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}
