use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use huddle_types::models::{Attachment, Destination, LinkPreview, Message, Reaction, ReactionToggle};

use crate::channels::query_channel;
use crate::membership::{authorize_destination, require_member};
use crate::models::{MESSAGE_COLUMNS, message_from_row, millis, reaction_from_row, truncate};
use crate::reads::advance_watermark;
use crate::{Database, Result, StoreError};

/// Upper bound on a single page of messages.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A message about to be written.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub destination: Destination,
    pub author_id: Uuid,
    pub text: String,
    pub reply_to: Option<Uuid>,
    pub attachments: Vec<Attachment>,
    pub link_previews: Vec<LinkPreview>,
}

impl NewMessage {
    pub fn text(destination: Destination, author_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            destination,
            author_id,
            text: text.into(),
            reply_to: None,
            attachments: Vec::new(),
            link_previews: Vec::new(),
        }
    }

    pub fn reply(mut self, parent: Uuid) -> Self {
        self.reply_to = Some(parent);
        self
    }
}

impl Database {
    /// Post a message.
    ///
    /// The author must be able to see the destination. A reply must point at
    /// an existing top-level message in the same destination; replies to
    /// replies and cross-destination replies are rejected. Posting also
    /// moves the author's own read watermark up to the new message.
    pub fn post_message(&self, new: NewMessage, now: DateTime<Utc>) -> Result<Message> {
        let id = Uuid::new_v4();
        let created_at = truncate(now);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let workspace_id = authorize_destination(&tx, new.destination, new.author_id)?;
            if let Destination::Channel(channel_id) = new.destination {
                let archived = query_channel(&tx, channel_id)?.is_some_and(|c| c.is_archived);
                if archived {
                    return Err(StoreError::Forbidden("channel is archived"));
                }
            }

            if let Some(parent_id) = new.reply_to {
                let parent = query_message(&tx, parent_id)?.ok_or_else(|| StoreError::not_found("message", parent_id))?;
                if parent.destination != new.destination {
                    return Err(StoreError::InvalidDestination("reply must live in the same destination as its parent"));
                }
                if !parent.is_top_level() {
                    return Err(StoreError::InvalidDestination("replies cannot be nested"));
                }
            }

            tx.execute(
                "INSERT INTO messages (id, workspace_id, channel_id, conversation_id, author_id, text, reply_to, attachments, link_previews, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    workspace_id.to_string(),
                    new.destination.channel_id().map(|c| c.to_string()),
                    new.destination.conversation_id().map(|c| c.to_string()),
                    new.author_id.to_string(),
                    new.text,
                    new.reply_to.map(|r| r.to_string()),
                    serde_json::to_string(&new.attachments)?,
                    serde_json::to_string(&new.link_previews)?,
                    millis(created_at),
                ],
            )?;

            advance_watermark(&tx, new.author_id, new.destination, created_at)?;
            tx.commit()?;

            Ok(Message {
                id,
                workspace_id,
                destination: new.destination,
                author_id: new.author_id,
                text: new.text,
                reply_to: new.reply_to,
                attachments: new.attachments,
                link_previews: new.link_previews,
                created_at,
            })
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// A page of top-level messages in chronological order. Takes the newest
    /// `limit` (capped at [`MAX_PAGE_SIZE`]) that sort strictly before the
    /// `before` message. The cursor is the message itself rather than its
    /// timestamp, so messages sharing a millisecond are never skipped.
    pub fn list_top_level(&self, destination: Destination, limit: u32, before: Option<Uuid>) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let column = destination_column(destination);
        self.with_conn(|conn| {
            let cursor: Option<(i64, i64)> = match before {
                Some(id) => Some(
                    conn.query_row(
                        &format!("SELECT created_at, rowid FROM messages WHERE id = ?1 AND {column} = ?2"),
                        params![id.to_string(), destination.id().to_string()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?
                    .ok_or_else(|| StoreError::not_found("message", id))?,
                ),
                None => None,
            };

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE {column} = ?1
                   AND reply_to IS NULL
                   AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND rowid < ?3))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![
                        destination.id().to_string(),
                        cursor.map(|c| c.0),
                        cursor.map(|c| c.1),
                        limit
                    ],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Direct replies to a message, oldest first. The parent must still
    /// exist: replies to a deleted message stay addressable by id but no
    /// longer form a thread.
    pub fn list_thread(&self, parent_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            query_message(conn, parent_id)?.ok_or_else(|| StoreError::not_found("message", parent_id))?;
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE reply_to = ?1
                 ORDER BY created_at, rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([parent_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Toggle a reaction: removes if exists, inserts if not.
    ///
    /// The delete runs first and the insert defers to the primary key, so a
    /// double click can never leave two rows for the same triple.
    pub fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<(Message, ReactionToggle)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let message = query_message(&tx, message_id)?.ok_or_else(|| StoreError::not_found("message", message_id))?;
            authorize_destination(&tx, message.destination, user_id)?;

            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id.to_string(), user_id.to_string(), emoji],
            )?;

            let toggle = if removed > 0 {
                ReactionToggle::Removed
            } else {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, workspace_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(message_id, user_id, emoji) DO NOTHING",
                    params![
                        message_id.to_string(),
                        user_id.to_string(),
                        emoji,
                        message.workspace_id.to_string(),
                        millis(Utc::now())
                    ],
                )?;
                ReactionToggle::Added
            };

            tx.commit()?;
            Ok((message, toggle))
        })
    }

    /// Hard-delete a message. Its replies and reactions are left in place.
    /// Allowed for the author and for workspace owners/admins.
    pub fn delete_message(&self, id: Uuid, requester: Uuid) -> Result<Message> {
        self.with_conn(|conn| {
            let message = query_message(conn, id)?.ok_or_else(|| StoreError::not_found("message", id))?;
            let role = require_member(conn, message.workspace_id, requester)?;
            if message.author_id != requester && !role.can_manage() {
                return Err(StoreError::Forbidden("only the author or an admin can delete a message"));
            }
            conn.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()])?;
            Ok(message)
        })
    }

    /// Batch-fetch reactions for a set of message IDs, oldest first.
    pub fn get_reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at, rowid",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter().map(Uuid::to_string)), reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of direct replies per parent, for the given parents.
    pub fn get_reply_counts(&self, message_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT reply_to, COUNT(*) FROM messages
                 WHERE reply_to IN ({})
                 GROUP BY reply_to",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter().map(Uuid::to_string)), |row| {
                    Ok((crate::models::uuid_at(row, 0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(|(id, n)| (id, n as u64)).collect())
        })
    }
}

pub(crate) fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], message_from_row).optional()?)
}

pub(crate) fn destination_column(destination: Destination) -> &'static str {
    match destination {
        Destination::Channel(_) => "channel_id",
        Destination::Conversation(_) => "conversation_id",
    }
}
