//! Workspace lifecycle: creation with owner bootstrap, and the cascade that
//! removes every row scoped to a workspace.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use huddle_types::models::{Role, Workspace};

use crate::membership::{insert_member, query_role, require_member};
use crate::models::{WORKSPACE_COLUMNS, millis, workspace_from_row};
use crate::{Database, Result, StoreError};

/// Row counts removed by [`Database::delete_workspace`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub channels: usize,
    pub channel_members: usize,
    pub conversations: usize,
    pub messages: usize,
    pub reactions: usize,
    pub read_markers: usize,
    pub members: usize,
    pub invites: usize,
}

impl Database {
    /// Create a workspace and make `creator` its owner. Both rows are
    /// written in one transaction so no reader ever sees an ownerless
    /// workspace.
    pub fn create_workspace(
        &self,
        name: &str,
        creator: Uuid,
        description: Option<&str>,
    ) -> Result<Workspace> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO workspaces (id, name, description, created_by, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), name, description, creator.to_string(), millis(Utc::now())],
            )?;
            insert_member(&tx, id, creator, Role::Owner)?;
            let workspace = query_workspace(&tx, id)?.ok_or_else(|| StoreError::not_found("workspace", id))?;
            tx.commit()?;

            info!("Workspace {} ({}) created by {}", workspace.name, id, creator);
            Ok(workspace)
        })
    }

    pub fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        self.with_conn(|conn| query_workspace(conn, id))
    }

    /// Rename or re-describe a workspace. Owners and admins only.
    pub fn update_workspace(
        &self,
        id: Uuid,
        requester: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Workspace> {
        self.with_conn(|conn| {
            query_workspace(conn, id)?.ok_or_else(|| StoreError::not_found("workspace", id))?;
            let role = require_member(conn, id, requester)?;
            if !role.can_manage() {
                return Err(StoreError::Forbidden("only owners and admins can edit a workspace"));
            }

            conn.execute(
                "UPDATE workspaces SET
                    name = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    updated_at = ?4
                 WHERE id = ?1",
                params![id.to_string(), name, description, millis(Utc::now())],
            )?;
            query_workspace(conn, id)?.ok_or_else(|| StoreError::not_found("workspace", id))
        })
    }

    /// Delete a workspace and everything scoped to it. Owner only.
    ///
    /// Channels go first (members, reactions, messages, read markers, then
    /// the channel), then conversations the same way, then a sweep for rows
    /// that only reference the workspace id (reactions left behind by an
    /// earlier message delete, orphaned replies), then memberships,
    /// invites, and the workspace itself. The whole sweep is one
    /// transaction.
    pub fn delete_workspace(&self, id: Uuid, requester: Uuid) -> Result<CascadeReport> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            query_workspace(&tx, id)?.ok_or_else(|| StoreError::not_found("workspace", id))?;
            if query_role(&tx, id, requester)? != Some(Role::Owner) {
                return Err(StoreError::Forbidden("only the owner can delete a workspace"));
            }

            let ws = id.to_string();
            let mut report = CascadeReport::default();

            for channel_id in ids_in(&tx, "SELECT id FROM channels WHERE workspace_id = ?1", &ws)? {
                report.channel_members +=
                    tx.execute("DELETE FROM channel_members WHERE channel_id = ?1", [&channel_id])?;
                report.reactions += tx.execute(
                    "DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE channel_id = ?1)",
                    [&channel_id],
                )?;
                report.messages += tx.execute("DELETE FROM messages WHERE channel_id = ?1", [&channel_id])?;
                report.read_markers += tx.execute(
                    "DELETE FROM read_status WHERE destination_kind = 'channel' AND destination_id = ?1",
                    [&channel_id],
                )?;
                report.channels += tx.execute("DELETE FROM channels WHERE id = ?1", [&channel_id])?;
            }

            for conversation_id in ids_in(&tx, "SELECT id FROM conversations WHERE workspace_id = ?1", &ws)? {
                report.reactions += tx.execute(
                    "DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = ?1)",
                    [&conversation_id],
                )?;
                report.messages +=
                    tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [&conversation_id])?;
                report.read_markers += tx.execute(
                    "DELETE FROM read_status WHERE destination_kind = 'conversation' AND destination_id = ?1",
                    [&conversation_id],
                )?;
                report.conversations +=
                    tx.execute("DELETE FROM conversations WHERE id = ?1", [&conversation_id])?;
            }

            report.reactions += tx.execute("DELETE FROM reactions WHERE workspace_id = ?1", [&ws])?;
            report.messages += tx.execute("DELETE FROM messages WHERE workspace_id = ?1", [&ws])?;
            report.members += tx.execute("DELETE FROM workspace_members WHERE workspace_id = ?1", [&ws])?;
            report.invites += tx.execute("DELETE FROM workspace_invites WHERE workspace_id = ?1", [&ws])?;
            tx.execute("DELETE FROM workspaces WHERE id = ?1", [&ws])?;

            tx.commit()?;

            info!("Workspace {} deleted by {}: {:?}", id, requester, report);
            Ok(report)
        })
    }
}

pub(crate) fn query_workspace(conn: &Connection, id: Uuid) -> Result<Option<Workspace>> {
    let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], workspace_from_row).optional()?)
}

fn ids_in(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user, workspace};

    #[test]
    fn creator_becomes_owner() {
        let db = db();
        let ada = user(&db, "ada");
        let ws = db.create_workspace("Acme", ada.id, Some("rockets")).unwrap();

        assert_eq!(ws.description.as_deref(), Some("rockets"));
        let members = db.list_members(ws.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, ada.id);
        assert_eq!(members[0].role, Role::Owner);
    }

    #[test]
    fn update_requires_manager_role() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        db.add_member(ws.id, bob.id, Role::Member).unwrap();

        assert!(matches!(
            db.update_workspace(ws.id, bob.id, Some("Bob's"), None),
            Err(StoreError::Forbidden(_))
        ));

        let updated = db.update_workspace(ws.id, ada.id, Some("Acme Corp"), None).unwrap();
        assert_eq!(updated.name, "Acme Corp");
        assert!(updated.updated_at >= ws.updated_at);
    }

    #[test]
    fn delete_of_missing_workspace_is_not_found() {
        let db = db();
        let ada = user(&db, "ada");
        assert!(matches!(
            db.delete_workspace(Uuid::new_v4(), ada.id),
            Err(StoreError::NotFound { .. })
        ));
    }
}
