use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};
use uuid::Uuid;

use huddle_types::models::{Channel, ChannelMember, Destination};

use crate::membership::{authorize_destination, query_role, require_member};
use crate::models::{CHANNEL_COLUMNS, channel_from_row, channel_member_from_row, millis};
use crate::{Database, Result, StoreError};

impl Database {
    /// Create a channel. The creator is always a member. Listed members are
    /// only added to private channels; public channel membership is
    /// implicit. Listed users that aren't workspace members are skipped.
    pub fn create_channel(
        &self,
        workspace_id: Uuid,
        name: &str,
        description: Option<&str>,
        creator: Uuid,
        is_private: bool,
        member_ids: &[Uuid],
    ) -> Result<Channel> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            require_member(&tx, workspace_id, creator)?;

            let now = millis(Utc::now());
            tx.execute(
                "INSERT INTO channels (id, workspace_id, name, description, created_by, is_private, is_archived, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![id.to_string(), workspace_id.to_string(), name, description, creator.to_string(), is_private, now],
            )?;
            insert_channel_member(&tx, id, creator)?;

            if is_private {
                for &user_id in member_ids.iter().filter(|&&u| u != creator) {
                    if query_role(&tx, workspace_id, user_id)?.is_none() {
                        warn!("Skipping non-member {} for private channel {}", user_id, id);
                        continue;
                    }
                    insert_channel_member(&tx, id, user_id)?;
                }
            }

            let channel = query_channel(&tx, id)?.ok_or_else(|| StoreError::not_found("channel", id))?;
            tx.commit()?;

            info!("Channel #{} ({}) created in workspace {}", channel.name, id, workspace_id);
            Ok(channel)
        })
    }

    pub fn get_channel(&self, id: Uuid) -> Result<Option<Channel>> {
        self.with_conn(|conn| query_channel(conn, id))
    }

    /// Non-archived public channels, plus private channels the user has an
    /// explicit membership row for.
    pub fn list_visible_channels(&self, workspace_id: Uuid, user_id: Option<Uuid>) -> Result<Vec<Channel>> {
        self.with_conn(|conn| query_visible_channels(conn, workspace_id, user_id))
    }

    pub fn update_channel(
        &self,
        id: Uuid,
        requester: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Channel> {
        self.with_conn(|conn| {
            require_channel_manager(conn, id, requester)?;
            conn.execute(
                "UPDATE channels SET name = COALESCE(?2, name), description = COALESCE(?3, description)
                 WHERE id = ?1",
                params![id.to_string(), name, description],
            )?;
            query_channel(conn, id)?.ok_or_else(|| StoreError::not_found("channel", id))
        })
    }

    /// Archived channels keep their history but drop out of listings.
    pub fn archive_channel(&self, id: Uuid, requester: Uuid) -> Result<Channel> {
        self.with_conn(|conn| {
            require_channel_manager(conn, id, requester)?;
            conn.execute("UPDATE channels SET is_archived = 1 WHERE id = ?1", [id.to_string()])?;
            query_channel(conn, id)?.ok_or_else(|| StoreError::not_found("channel", id))
        })
    }

    /// Add a workspace member to a channel. Idempotent. The requester must
    /// themselves be able to see the channel.
    pub fn add_channel_member(&self, channel_id: Uuid, user_id: Uuid, requester: Uuid) -> Result<ChannelMember> {
        self.with_conn(|conn| {
            let workspace_id = authorize_destination(conn, Destination::Channel(channel_id), requester)?;
            if query_role(conn, workspace_id, user_id)?.is_none() {
                return Err(StoreError::Forbidden("user is not a workspace member"));
            }
            insert_channel_member(conn, channel_id, user_id)
        })
    }

    /// Remove a channel member. Removing yourself is always allowed;
    /// removing someone else takes the channel creator or a workspace
    /// owner/admin.
    pub fn remove_channel_member(&self, channel_id: Uuid, user_id: Uuid, requester: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            if user_id != requester {
                require_channel_manager(conn, channel_id, requester)?;
            } else if query_channel(conn, channel_id)?.is_none() {
                return Err(StoreError::not_found("channel", channel_id));
            }
            let removed = conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id.to_string(), user_id.to_string()],
            )?;
            Ok(removed == 1)
        })
    }

    pub fn list_channel_members(&self, channel_id: Uuid) -> Result<Vec<ChannelMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, user_id, joined_at FROM channel_members
                 WHERE channel_id = ?1 ORDER BY joined_at",
            )?;
            let rows = stmt
                .query_map([channel_id.to_string()], channel_member_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_channel(conn: &Connection, id: Uuid) -> Result<Option<Channel>> {
    let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], channel_from_row).optional()?)
}

pub(crate) fn query_visible_channels(
    conn: &Connection,
    workspace_id: Uuid,
    user_id: Option<Uuid>,
) -> Result<Vec<Channel>> {
    let sql = format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels c
         WHERE c.workspace_id = ?1
           AND c.is_archived = 0
           AND (c.is_private = 0
                OR (?2 IS NOT NULL AND EXISTS (
                    SELECT 1 FROM channel_members cm
                    WHERE cm.channel_id = c.id AND cm.user_id = ?2)))
         ORDER BY c.created_at, c.name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![workspace_id.to_string(), user_id.map(|u| u.to_string())],
            channel_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert_channel_member(conn: &Connection, channel_id: Uuid, user_id: Uuid) -> Result<ChannelMember> {
    conn.execute(
        "INSERT INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(channel_id, user_id) DO NOTHING",
        params![channel_id.to_string(), user_id.to_string(), millis(Utc::now())],
    )?;
    Ok(conn.query_row(
        "SELECT channel_id, user_id, joined_at FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
        params![channel_id.to_string(), user_id.to_string()],
        channel_member_from_row,
    )?)
}

fn require_channel_manager(conn: &Connection, channel_id: Uuid, requester: Uuid) -> Result<Channel> {
    let channel = query_channel(conn, channel_id)?.ok_or_else(|| StoreError::not_found("channel", channel_id))?;
    let role = require_member(conn, channel.workspace_id, requester)?;
    if channel.created_by != requester && !role.can_manage() {
        return Err(StoreError::Forbidden("only the channel creator or a workspace admin can do that"));
    }
    Ok(channel)
}
