use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use huddle_types::api::{ToggleReactionRequest, ToggleReactionResponse};
use huddle_types::events::GatewayEvent;
use huddle_types::models::ReactionToggle;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;

const MAX_EMOJI_LEN: usize = 64;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<Json<ToggleReactionResponse>> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_LEN {
        return Err(ApiError::BadRequest("invalid emoji"));
    }

    let user_id = session.user_id;
    let key = emoji.clone();
    let (message, result) = state
        .blocking(move |db| db.toggle_reaction(message_id, user_id, &key))
        .await?;

    let event = match result {
        ReactionToggle::Added => GatewayEvent::ReactionAdd {
            workspace_id: message.workspace_id,
            destination: message.destination,
            message_id,
            user_id,
            emoji,
        },
        ReactionToggle::Removed => GatewayEvent::ReactionRemove {
            workspace_id: message.workspace_id,
            destination: message.destination,
            message_id,
            user_id,
            emoji,
        },
    };
    state.dispatcher.broadcast(event);

    Ok(Json(ToggleReactionResponse { result }))
}
