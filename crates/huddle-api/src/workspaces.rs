use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use huddle_types::api::{CreateWorkspaceRequest, DeleteWorkspaceResponse, UpdateWorkspaceRequest};
use huddle_types::events::GatewayEvent;
use huddle_types::models::{Workspace, WorkspaceMember};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::AppState;

pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let user_id = session.user_id;
    let workspaces = state.blocking(move |db| db.list_workspaces_for_user(user_id)).await?;
    Ok(Json(workspaces))
}

pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("workspace name is required"));
    }

    let user_id = session.user_id;
    let workspace = state
        .blocking(move |db| db.create_workspace(&name, user_id, req.description.as_deref()))
        .await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Workspace>> {
    let user_id = session.user_id;
    state
        .blocking(move |db| {
            db.require_member(workspace_id, user_id)?;
            db.get_workspace(workspace_id)
        })
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> ApiResult<Json<Workspace>> {
    let name = req.name.map(|n| n.trim().to_string());
    if name.as_deref() == Some("") {
        return Err(ApiError::BadRequest("workspace name cannot be empty"));
    }

    let user_id = session.user_id;
    let workspace = state
        .blocking(move |db| db.update_workspace(workspace_id, user_id, name.as_deref(), req.description.as_deref()))
        .await?;
    Ok(Json(workspace))
}

/// DELETE /workspaces/{workspace_id}: owner only. Connected clients are
/// told so they can drop the workspace from view.
pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<DeleteWorkspaceResponse>> {
    let user_id = session.user_id;
    let report = state.blocking(move |db| db.delete_workspace(workspace_id, user_id)).await?;

    state.dispatcher.broadcast(GatewayEvent::WorkspaceDeleted { workspace_id });

    Ok(Json(DeleteWorkspaceResponse {
        workspace_id,
        channels: report.channels,
        conversations: report.conversations,
        messages: report.messages,
        reactions: report.reactions,
        members: report.members,
        invites: report.invites,
    }))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Vec<WorkspaceMember>>> {
    let user_id = session.user_id;
    let members = state
        .blocking(move |db| {
            db.require_member(workspace_id, user_id)?;
            db.list_members(workspace_id)
        })
        .await?;
    Ok(Json(members))
}
