use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Destination, Invite, InviteRole, InviteStatus, LinkPreview, ReactionToggle};
use crate::unread::DestinationUnread;

// -- Session claims --

/// Claims issued by the external session provider. Shared by the REST
/// middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id.
    pub sub: Uuid,
    /// Verified email address.
    pub email: String,
    pub name: String,
    pub exp: usize,
}

// -- Users --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncUserRequest {
    pub image: Option<String>,
}

// -- Workspaces --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateWorkspaceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteWorkspaceResponse {
    pub workspace_id: Uuid,
    pub channels: usize,
    pub conversations: usize,
    pub messages: usize,
    pub reactions: usize,
    pub members: usize,
    pub invites: usize,
}

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    /// Only honoured for private channels.
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelMemberRequest {
    pub user_id: Uuid,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenConversationRequest {
    pub user_id: Uuid,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentInput {
    pub content_key: String,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostMessageRequest {
    pub text: String,
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
    /// When absent, previews are unfurled from links in `text`.
    pub link_previews: Option<Vec<LinkPreview>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentView {
    pub content_key: String,
    pub name: String,
    pub mime_type: String,
    pub url: String,
}

/// A message as delivered to clients: the stored record plus author
/// details, resolved attachment URLs, grouped reactions, and reply count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub destination: Destination,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_image: Option<String>,
    pub text: String,
    pub reply_to: Option<Uuid>,
    pub attachments: Vec<AttachmentView>,
    pub link_previews: Vec<LinkPreview>,
    pub reactions: Vec<ReactionGroup>,
    pub reply_count: u64,
    pub created_at: DateTime<Utc>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    pub result: ReactionToggle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

// -- Unread --

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountsResponse {
    pub channels: Vec<DestinationUnread>,
    pub conversations: Vec<DestinationUnread>,
    pub total: u64,
}

// -- Invites --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateInviteRequest {
    pub email: String,
    pub role: InviteRole,
    pub ttl_days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInviteResponse {
    pub invite_id: Uuid,
    pub token: String,
    pub link: String,
    /// True when an existing pending invite was refreshed instead of a new
    /// one being minted.
    pub refreshed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviterInfo {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteWorkspaceInfo {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Invite lookup result, annotated for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteDetails {
    pub invite: Invite,
    /// What a viewer should be shown; may read `expired` while the stored
    /// status is still `pending`.
    pub display_status: InviteStatus,
    pub workspace: Option<InviteWorkspaceInfo>,
    pub inviter: Option<InviterInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptInviteResponse {
    pub workspace_id: Uuid,
    pub already_member: bool,
}

// -- Files --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub content_key: String,
    pub size: u64,
    pub url: String,
}
