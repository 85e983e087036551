//! Unread snapshots and notification diffing.
//!
//! The store computes an [`UnreadSnapshot`] per destination; whoever is
//! watching a user's session (a client, or the gateway on its behalf) feeds
//! successive snapshots into a [`NotificationTracker`], which decides when a
//! user-visible alert should fire.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Destination;

/// One observation of a user's unread state for a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadSnapshot {
    pub count: u64,
    pub last_message_author_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationUnread {
    pub destination: Destination,
    #[serde(flatten)]
    pub snapshot: UnreadSnapshot,
}

/// What to announce for a destination that gained messages from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub destination: Destination,
    pub new_messages: u64,
    pub title: String,
    pub body: String,
}

/// Decide whether moving from `prev` to `now` is worth a notification for
/// `user_id`. Returns the number of new messages to announce.
///
/// All three must hold: the count went up, the newest message was written
/// by someone else, and the newest message actually changed.
pub fn new_messages_since(
    user_id: Uuid,
    prev: &UnreadSnapshot,
    now: &UnreadSnapshot,
) -> Option<u64> {
    if now.count <= prev.count {
        return None;
    }
    match now.last_message_author_id {
        Some(author) if author != user_id => {}
        _ => return None,
    }
    if now.last_message_at == prev.last_message_at {
        return None;
    }
    Some(now.count - prev.count)
}

impl Notification {
    pub fn new(destination: Destination, new_messages: u64) -> Self {
        let noun = if new_messages == 1 { "message" } else { "messages" };
        let (title, body) = match destination {
            Destination::Channel(_) => (
                "New Message".to_string(),
                format!("You have {new_messages} new {noun} in a channel"),
            ),
            Destination::Conversation(_) => (
                "New Direct Message".to_string(),
                format!("You have {new_messages} new {noun}"),
            ),
        };
        Self {
            destination,
            new_messages,
            title,
            body,
        }
    }
}

/// Per-session notification state: the last snapshot seen for every
/// destination the user can see.
#[derive(Debug, Clone)]
pub struct NotificationTracker {
    user_id: Uuid,
    initialized: bool,
    previous: HashMap<Destination, UnreadSnapshot>,
    rewound: HashSet<Destination>,
}

impl NotificationTracker {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            initialized: false,
            previous: HashMap::new(),
            rewound: HashSet::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether `destination` was part of the last observation.
    pub fn is_watching(&self, destination: &Destination) -> bool {
        self.previous.contains_key(destination)
    }

    /// Feed a fresh set of snapshots and collect the notifications they
    /// warrant.
    ///
    /// The first call only seeds state: whatever is already unread when the
    /// session starts is never announced. Destinations that show up later
    /// (a new DM, a private channel the user was just added to) are compared
    /// against an empty snapshot. A snapshot whose newest message is older
    /// than one already observed came from a lagging read and is skipped,
    /// so the tracked view never moves backwards, unless the destination
    /// was [rewound](Self::rewind) since the last observation.
    pub fn observe(&mut self, entries: &[DestinationUnread]) -> Vec<Notification> {
        let mut notifications = Vec::new();

        if !self.initialized {
            for entry in entries {
                self.previous.insert(entry.destination, entry.snapshot.clone());
            }
            self.initialized = true;
            return notifications;
        }

        for entry in entries {
            let prev = self.previous.get(&entry.destination).cloned().unwrap_or_default();
            let rewound = self.rewound.remove(&entry.destination);

            if !rewound && is_stale(&prev, &entry.snapshot) {
                continue;
            }

            if let Some(n) = new_messages_since(self.user_id, &prev, &entry.snapshot) {
                notifications.push(Notification::new(entry.destination, n));
            }

            self.previous.insert(entry.destination, entry.snapshot.clone());
        }

        notifications
    }

    /// Sum of unread counts across every tracked destination.
    pub fn total_unread(&self) -> u64 {
        self.previous.values().map(|s| s.count).sum()
    }

    /// Accept the next snapshot for `destination` even if it moves
    /// backwards. Call after a message there was deleted or the user read
    /// it, since either can legitimately make the newest message older.
    pub fn rewind(&mut self, destination: Destination) {
        self.rewound.insert(destination);
    }

    /// Drop a destination that is no longer visible (left, archived, deleted).
    pub fn forget(&mut self, destination: &Destination) {
        self.previous.remove(destination);
        self.rewound.remove(destination);
    }
}

fn is_stale(prev: &UnreadSnapshot, now: &UnreadSnapshot) -> bool {
    match (prev.last_message_at, now.last_message_at) {
        (Some(seen), Some(fresh)) => fresh < seen,
        _ => false,
    }
}

/// Aggregate badge count for a set of destinations.
pub fn total_unread(entries: &[DestinationUnread]) -> u64 {
    entries.iter().map(|e| e.snapshot.count).sum()
}
