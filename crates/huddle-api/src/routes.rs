use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{channels, conversations, files, invites, messages, reactions, reads, users, workspaces};

/// The REST API. Invite lookups and file downloads are public; everything
/// else needs a session token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/invites/{token}", get(invites::resolve_invite))
        .route("/files/{content_key}", get(files::download_file))
        .with_state(state.clone());

    let protected_routes = Router::new()
        // Users
        .route("/users/me", get(users::get_me).post(users::sync_me))
        .route("/users/me/heartbeat", post(users::heartbeat))
        .route("/users/{user_id}", get(users::get_user))
        // Workspaces
        .route("/workspaces", get(workspaces::list_workspaces).post(workspaces::create_workspace))
        .route(
            "/workspaces/{workspace_id}",
            get(workspaces::get_workspace)
                .patch(workspaces::update_workspace)
                .delete(workspaces::delete_workspace),
        )
        .route("/workspaces/{workspace_id}/members", get(workspaces::list_members))
        .route("/workspaces/{workspace_id}/users", get(users::list_workspace_users))
        .route("/workspaces/{workspace_id}/unread", get(reads::unread_counts))
        .route(
            "/workspaces/{workspace_id}/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route(
            "/workspaces/{workspace_id}/conversations",
            get(conversations::list_conversations).post(conversations::open_conversation),
        )
        .route(
            "/workspaces/{workspace_id}/invites",
            get(invites::list_invites).post(invites::create_invite),
        )
        .route("/workspaces/{workspace_id}/invites/{invite_id}", delete(invites::cancel_invite))
        // Channels
        .route("/channels/{channel_id}", get(channels::get_channel).patch(channels::update_channel))
        .route("/channels/{channel_id}/archive", post(channels::archive_channel))
        .route(
            "/channels/{channel_id}/members",
            get(channels::list_channel_members).post(channels::add_channel_member),
        )
        .route("/channels/{channel_id}/members/{user_id}", delete(channels::remove_channel_member))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::list_channel_messages).post(messages::post_channel_message),
        )
        .route("/channels/{channel_id}/read", post(reads::mark_channel_read))
        // Conversations
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_conversation_messages).post(messages::post_conversation_message),
        )
        .route("/conversations/{conversation_id}/read", post(reads::mark_conversation_read))
        // Messages
        .route("/messages/{message_id}", get(messages::get_message).delete(messages::delete_message))
        .route("/messages/{message_id}/thread", get(messages::get_thread))
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        // Invites
        .route("/invites/{token}/accept", post(invites::accept_invite))
        // Files
        .route(
            "/files",
            post(files::upload_file).layer(DefaultBodyLimit::max(files::MAX_FILE_SIZE)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
