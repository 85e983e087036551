//! Row mapping between SQLite columns and huddle-types models.
//!
//! Ids are stored as hyphenated TEXT, timestamps as epoch milliseconds,
//! attachment and link preview lists as JSON text.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use huddle_types::models::{
    Attachment, Channel, ChannelMember, Conversation, Destination, Invite, InviteRole,
    InviteStatus, LinkPreview, Message, Reaction, Role, User, Workspace, WorkspaceMember,
};

pub(crate) const USER_COLUMNS: &str = "id, name, email, image, last_seen, created_at";
pub(crate) const WORKSPACE_COLUMNS: &str = "id, name, description, created_by, updated_at";
pub(crate) const MEMBER_COLUMNS: &str = "workspace_id, user_id, role, joined_at";
pub(crate) const CHANNEL_COLUMNS: &str =
    "id, workspace_id, name, description, created_by, is_private, is_archived, created_at";
pub(crate) const CONVERSATION_COLUMNS: &str =
    "id, workspace_id, user_one_id, user_two_id, created_at";
pub(crate) const MESSAGE_COLUMNS: &str = "id, workspace_id, channel_id, conversation_id, author_id, text, reply_to, attachments, link_previews, created_at";
pub(crate) const INVITE_COLUMNS: &str = "id, workspace_id, email, invited_by, role, token, expires_at, status, accepted_at, accepted_by, created_at";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ColumnError(String);

fn bad_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(ColumnError(msg)))
}

pub(crate) fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Drop sub-millisecond precision so a value matches what a later read
/// returns.
pub(crate) fn truncate(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis(dt)).unwrap_or(dt)
}

pub(crate) fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: uuid::Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse().map_err(|e: uuid::Error| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
    })
    .transpose()
}

pub(crate) fn ts_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| bad_column(idx, format!("timestamp out of range: {ms}")))
}

pub(crate) fn opt_ts_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| bad_column(idx, format!("timestamp out of range: {ms}")))
    })
    .transpose()
}

pub(crate) fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        image: row.get(3)?,
        last_seen: opt_ts_at(row, 4)?,
        created_at: ts_at(row, 5)?,
    })
}

pub(crate) fn workspace_from_row(row: &Row) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: uuid_at(row, 3)?,
        updated_at: ts_at(row, 4)?,
    })
}

pub(crate) fn member_from_row(row: &Row) -> rusqlite::Result<WorkspaceMember> {
    let role: String = row.get(2)?;
    Ok(WorkspaceMember {
        workspace_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        role: Role::parse(&role).ok_or_else(|| bad_column(2, format!("unknown role: {role}")))?,
        joined_at: ts_at(row, 3)?,
    })
}

pub(crate) fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_by: uuid_at(row, 4)?,
        is_private: row.get(5)?,
        is_archived: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}

pub(crate) fn channel_member_from_row(row: &Row) -> rusqlite::Result<ChannelMember> {
    Ok(ChannelMember {
        channel_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        joined_at: ts_at(row, 2)?,
    })
}

pub(crate) fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        user_one_id: uuid_at(row, 2)?,
        user_two_id: uuid_at(row, 3)?,
        created_at: ts_at(row, 4)?,
    })
}

pub(crate) fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let destination = Destination::from_columns(opt_uuid_at(row, 2)?, opt_uuid_at(row, 3)?)
        .ok_or_else(|| bad_column(2, "message must have exactly one destination".into()))?;

    let attachments: String = row.get(7)?;
    let attachments: Vec<Attachment> =
        serde_json::from_str(&attachments).map_err(|e| bad_column(7, e.to_string()))?;
    let link_previews: String = row.get(8)?;
    let link_previews: Vec<LinkPreview> =
        serde_json::from_str(&link_previews).map_err(|e| bad_column(8, e.to_string()))?;

    Ok(Message {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        destination,
        author_id: uuid_at(row, 4)?,
        text: row.get(5)?,
        reply_to: opt_uuid_at(row, 6)?,
        attachments,
        link_previews,
        created_at: ts_at(row, 9)?,
    })
}

pub(crate) fn reaction_from_row(row: &Row) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        message_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        emoji: row.get(2)?,
        created_at: ts_at(row, 3)?,
    })
}

pub(crate) fn invite_from_row(row: &Row) -> rusqlite::Result<Invite> {
    let role: String = row.get(4)?;
    let status: String = row.get(7)?;
    Ok(Invite {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        email: row.get(2)?,
        invited_by: uuid_at(row, 3)?,
        role: InviteRole::parse(&role)
            .ok_or_else(|| bad_column(4, format!("unknown invite role: {role}")))?,
        token: row.get(5)?,
        expires_at: ts_at(row, 6)?,
        status: InviteStatus::parse(&status)
            .ok_or_else(|| bad_column(7, format!("unknown invite status: {status}")))?,
        accepted_at: opt_ts_at(row, 8)?,
        accepted_by: opt_uuid_at(row, 9)?,
        created_at: ts_at(row, 10)?,
    })
}
