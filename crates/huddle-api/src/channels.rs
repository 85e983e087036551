use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

use huddle_types::api::{ChannelMemberRequest, CreateChannelRequest, UpdateChannelRequest};
use huddle_types::models::{Channel, ChannelMember, Destination};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;

/// Channels in a workspace that the caller can see.
pub async fn list_channels(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<Channel>>> {
    let user_id = session.user_id;
    let channels = state
        .blocking(move |db| {
            db.require_member(workspace_id, user_id)?;
            db.list_visible_channels(workspace_id, Some(user_id))
        })
        .await?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<(StatusCode, Json<Channel>)> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("channel name is required"));
    }

    let user_id = session.user_id;
    let channel = state
        .blocking(move |db| {
            db.create_channel(
                workspace_id,
                &name,
                req.description.as_deref(),
                user_id,
                req.is_private,
                &req.member_ids,
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Channel>> {
    let user_id = session.user_id;
    state
        .blocking(move |db| {
            db.authorize_destination(Destination::Channel(channel_id), user_id)?;
            db.get_channel(channel_id)
        })
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<UpdateChannelRequest>,
) -> ApiResult<Json<Channel>> {
    let name = req.name.map(|n| n.trim().to_string());
    if name.as_deref() == Some("") {
        return Err(ApiError::BadRequest("channel name cannot be empty"));
    }

    let user_id = session.user_id;
    let channel = state
        .blocking(move |db| db.update_channel(channel_id, user_id, name.as_deref(), req.description.as_deref()))
        .await?;
    Ok(Json(channel))
}

pub async fn archive_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Channel>> {
    let user_id = session.user_id;
    let channel = state.blocking(move |db| db.archive_channel(channel_id, user_id)).await?;
    Ok(Json(channel))
}

pub async fn list_channel_members(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<ChannelMember>>> {
    let user_id = session.user_id;
    let members = state
        .blocking(move |db| {
            db.authorize_destination(Destination::Channel(channel_id), user_id)?;
            db.list_channel_members(channel_id)
        })
        .await?;
    Ok(Json(members))
}

pub async fn add_channel_member(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<ChannelMemberRequest>,
) -> ApiResult<Json<ChannelMember>> {
    let user_id = session.user_id;
    let member = state
        .blocking(move |db| db.add_channel_member(channel_id, req.user_id, user_id))
        .await?;
    Ok(Json(member))
}

pub async fn remove_channel_member(
    State(state): State<AppState>,
    Path((channel_id, member_id)): Path<(Uuid, Uuid)>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Value>> {
    let user_id = session.user_id;
    let removed = state
        .blocking(move |db| db.remove_channel_member(channel_id, member_id, user_id))
        .await?;
    Ok(Json(json!({ "removed": removed })))
}
