use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;
use crate::models::Destination;
use crate::unread::Notification;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// A message was posted
    MessageCreate {
        workspace_id: Uuid,
        message: MessageView,
    },

    /// A message was removed
    MessageDelete {
        workspace_id: Uuid,
        destination: Destination,
        message_id: Uuid,
    },

    ReactionAdd {
        workspace_id: Uuid,
        destination: Destination,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        workspace_id: Uuid,
        destination: Destination,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A user came online, went offline, or sent a heartbeat
    PresenceUpdate {
        user_id: Uuid,
        name: String,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },

    /// The user's read watermark moved (sent only to that user)
    ReadMarked {
        workspace_id: Uuid,
        destination: Destination,
        last_read_at: DateTime<Utc>,
    },

    /// A workspace and everything in it is gone
    WorkspaceDeleted { workspace_id: Uuid },

    /// Something the user should be alerted about (sent only to that user)
    Notification(Notification),

    /// Aggregate unread badge for the subscribed workspace
    UnreadUpdate { workspace_id: Uuid, total: u64 },
}

impl GatewayEvent {
    /// Workspace this event is scoped to. Events that return `None` are
    /// global and go to every connected client.
    pub fn workspace_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { workspace_id, .. }
            | Self::MessageDelete { workspace_id, .. }
            | Self::ReactionAdd { workspace_id, .. }
            | Self::ReactionRemove { workspace_id, .. }
            | Self::ReadMarked { workspace_id, .. }
            | Self::WorkspaceDeleted { workspace_id }
            | Self::UnreadUpdate { workspace_id, .. } => Some(*workspace_id),
            Self::Ready { .. } | Self::PresenceUpdate { .. } | Self::Notification(_) => None,
        }
    }

    /// Destination this event is scoped to, if any. Only clients that can
    /// see the destination should receive it.
    pub fn destination(&self) -> Option<Destination> {
        match self {
            Self::MessageCreate { message, .. } => Some(message.destination),
            Self::MessageDelete { destination, .. }
            | Self::ReactionAdd { destination, .. }
            | Self::ReactionRemove { destination, .. }
            | Self::ReadMarked { destination, .. } => Some(*destination),
            Self::Notification(n) => Some(n.destination),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Select the workspace this session follows. Replaces any previous
    /// selection and reseeds notification state.
    Subscribe { workspace_id: Uuid },

    /// Presence heartbeat
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let ws = Uuid::new_v4();
        let raw = format!(r#"{{"type":"Subscribe","data":{{"workspace_id":"{ws}"}}}}"#);
        match serde_json::from_str::<GatewayCommand>(&raw).unwrap() {
            GatewayCommand::Subscribe { workspace_id } => assert_eq!(workspace_id, ws),
            other => panic!("unexpected command: {other:?}"),
        }

        let hb: GatewayCommand = serde_json::from_str(r#"{"type":"Heartbeat"}"#).unwrap();
        assert!(matches!(hb, GatewayCommand::Heartbeat));
    }

    #[test]
    fn scoping() {
        let ws = Uuid::new_v4();
        let dest = Destination::Conversation(Uuid::new_v4());
        let event = GatewayEvent::ReactionAdd {
            workspace_id: ws,
            destination: dest,
            message_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            emoji: "👍".into(),
        };
        assert_eq!(event.workspace_id(), Some(ws));
        assert_eq!(event.destination(), Some(dest));

        let presence = GatewayEvent::PresenceUpdate {
            user_id: Uuid::new_v4(),
            name: "ada".into(),
            online: true,
            last_seen: None,
        };
        assert_eq!(presence.workspace_id(), None);
        assert_eq!(presence.destination(), None);
    }
}
