use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    /// Presence heartbeat.
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }

    /// Owners and admins may edit workspace settings and manage invites.
    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub is_private: bool,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

/// A direct conversation between two workspace members. The participant
/// pair is always stored sorted, so `user_one_id <= user_two_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_one_id: Uuid,
    pub user_two_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Sort a participant pair into its stored order.
    pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn includes(&self, user_id: Uuid) -> bool {
        self.user_one_id == user_id || self.user_two_id == user_id
    }

    /// The participant that isn't `user_id`. For a self-conversation this is
    /// `user_id` itself.
    pub fn other_participant(&self, user_id: Uuid) -> Uuid {
        if self.user_one_id == user_id {
            self.user_two_id
        } else {
            self.user_one_id
        }
    }
}

/// Where a message lives. Exactly one of channel or conversation, so the
/// "never both, never neither" rule is a property of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Destination {
    Channel(Uuid),
    Conversation(Uuid),
}

impl Destination {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Channel(id) | Self::Conversation(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Channel(_) => "channel",
            Self::Conversation(_) => "conversation",
        }
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::Channel(id) => Some(*id),
            Self::Conversation(_) => None,
        }
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::Conversation(id) => Some(*id),
            Self::Channel(_) => None,
        }
    }

    /// Rebuild a destination from a pair of nullable storage columns.
    /// Returns `None` unless exactly one is set.
    pub fn from_columns(channel_id: Option<Uuid>, conversation_id: Option<Uuid>) -> Option<Self> {
        match (channel_id, conversation_id) {
            (Some(id), None) => Some(Self::Channel(id)),
            (None, Some(id)) => Some(Self::Conversation(id)),
            _ => None,
        }
    }

    pub fn from_kind(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "channel" => Some(Self::Channel(id)),
            "conversation" => Some(Self::Conversation(id)),
            _ => None,
        }
    }
}

/// File attached to a message. Only the blob store key is persisted; the
/// URL is resolved when the message is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_key: String,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub destination: Destination,
    pub author_id: Uuid,
    /// Rich content; opaque to the core.
    pub text: String,
    /// Thread parent. `None` for top-level messages.
    pub reply_to: Option<Uuid>,
    pub attachments: Vec<Attachment>,
    pub link_previews: Vec<LinkPreview>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_top_level(&self) -> bool {
        self.reply_to.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of flipping a (message, user, emoji) reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionToggle {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStatus {
    pub user_id: Uuid,
    pub destination: Destination,
    pub last_read_at: DateTime<Utc>,
}

/// Roles an invite may grant. Ownership is never handed out by link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteRole {
    Admin,
    Member,
}

impl InviteRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteRole::Admin => "admin",
            InviteRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(InviteRole::Admin),
            "member" => Some(InviteRole::Member),
            _ => None,
        }
    }
}

impl From<InviteRole> for Role {
    fn from(role: InviteRole) -> Self {
        match role {
            InviteRole::Admin => Role::Admin,
            InviteRole::Member => Role::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Expired,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InviteStatus::Pending),
            "accepted" => Some(InviteStatus::Accepted),
            "expired" => Some(InviteStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Stored lowercased; compared case-insensitively.
    pub email: String,
    pub invited_by: Uuid,
    pub role: InviteRole,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub status: InviteStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Status as a viewer should see it: a pending invite past its expiry
    /// reads as expired even though the row has not been transitioned yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InviteStatus {
        match self.status {
            InviteStatus::Pending if self.is_past_due(now) => InviteStatus::Expired,
            status => status,
        }
    }
}

/// Normalise an email into its comparison key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
