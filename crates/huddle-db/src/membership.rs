//! Workspace membership: the single authority for "who may see what".
//!
//! Everything else that needs an authorization decision goes through the
//! helpers here, either directly on [`Database`] or via the crate-internal
//! connection-level functions when it is already inside a transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use huddle_types::models::{Destination, Role, Workspace, WorkspaceMember};

use crate::channels::query_channel;
use crate::conversations::query_conversation;
use crate::models::{MEMBER_COLUMNS, member_from_row, millis, workspace_from_row};
use crate::{Database, Result, StoreError};

impl Database {
    pub fn is_member(&self, workspace_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.role(workspace_id, user_id)?.is_some())
    }

    pub fn role(&self, workspace_id: Uuid, user_id: Uuid) -> Result<Option<Role>> {
        self.with_conn(|conn| query_role(conn, workspace_id, user_id))
    }

    /// Add a member. Idempotent: an existing row is returned unchanged,
    /// including its original role.
    pub fn add_member(&self, workspace_id: Uuid, user_id: Uuid, role: Role) -> Result<WorkspaceMember> {
        self.with_conn(|conn| insert_member(conn, workspace_id, user_id, role).map(|(m, _)| m))
    }

    pub fn list_members(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MEMBER_COLUMNS} FROM workspace_members WHERE workspace_id = ?1 ORDER BY joined_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([workspace_id.to_string()], member_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Workspaces the user belongs to.
    pub fn list_workspaces_for_user(&self, user_id: Uuid) -> Result<Vec<Workspace>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT w.id, w.name, w.description, w.created_by, w.updated_at
                 FROM workspaces w
                 JOIN workspace_members m ON m.workspace_id = w.id
                 WHERE m.user_id = ?1
                 ORDER BY m.joined_at",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], workspace_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fail with `Forbidden` unless the user is a member; returns the role.
    pub fn require_member(&self, workspace_id: Uuid, user_id: Uuid) -> Result<Role> {
        self.with_conn(|conn| require_member(conn, workspace_id, user_id))
    }

    /// Resolve the workspace of a destination and check that the user may
    /// read from and post to it: channel visibility for channels,
    /// participation for conversations.
    pub fn authorize_destination(&self, destination: Destination, user_id: Uuid) -> Result<Uuid> {
        self.with_conn(|conn| authorize_destination(conn, destination, user_id))
    }
}

pub(crate) fn query_role(conn: &Connection, workspace_id: Uuid, user_id: Uuid) -> Result<Option<Role>> {
    let sql = format!(
        "SELECT {MEMBER_COLUMNS} FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2"
    );
    let member = conn
        .query_row(&sql, params![workspace_id.to_string(), user_id.to_string()], member_from_row)
        .optional()?;
    Ok(member.map(|m| m.role))
}

pub(crate) fn require_member(conn: &Connection, workspace_id: Uuid, user_id: Uuid) -> Result<Role> {
    query_role(conn, workspace_id, user_id)?.ok_or(StoreError::Forbidden("not a workspace member"))
}

/// Insert-if-absent. Returns the row and whether it was created by this call.
pub(crate) fn insert_member(
    conn: &Connection,
    workspace_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> Result<(WorkspaceMember, bool)> {
    let inserted = conn.execute(
        "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(workspace_id, user_id) DO NOTHING",
        params![workspace_id.to_string(), user_id.to_string(), role.as_str(), millis(Utc::now())],
    )?;

    let sql = format!(
        "SELECT {MEMBER_COLUMNS} FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2"
    );
    let member = conn.query_row(&sql, params![workspace_id.to_string(), user_id.to_string()], member_from_row)?;
    Ok((member, inserted == 1))
}

pub(crate) fn authorize_destination(conn: &Connection, destination: Destination, user_id: Uuid) -> Result<Uuid> {
    match destination {
        Destination::Channel(id) => {
            let channel = query_channel(conn, id)?.ok_or_else(|| StoreError::not_found("channel", id))?;
            require_member(conn, channel.workspace_id, user_id)?;
            if channel.is_private && !is_channel_member(conn, id, user_id)? {
                return Err(StoreError::Forbidden("not a member of this private channel"));
            }
            Ok(channel.workspace_id)
        }
        Destination::Conversation(id) => {
            let conversation =
                query_conversation(conn, id)?.ok_or_else(|| StoreError::not_found("conversation", id))?;
            if !conversation.includes(user_id) {
                return Err(StoreError::Forbidden("not a participant in this conversation"));
            }
            require_member(conn, conversation.workspace_id, user_id)?;
            Ok(conversation.workspace_id)
        }
    }
}

pub(crate) fn is_channel_member(conn: &Connection, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
