use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use huddle_types::models::Conversation;

use crate::membership::require_member;
use crate::models::{CONVERSATION_COLUMNS, conversation_from_row, millis};
use crate::{Database, Result};

impl Database {
    /// Find or open the direct conversation between two workspace members.
    ///
    /// The pair is sorted before it touches storage, and the insert defers
    /// to the UNIQUE (workspace_id, user_one_id, user_two_id) constraint, so
    /// both participants opening the DM at once still end up with one row.
    pub fn get_or_create_conversation(&self, workspace_id: Uuid, user_a: Uuid, user_b: Uuid) -> Result<Conversation> {
        let (one, two) = Conversation::canonical_pair(user_a, user_b);
        self.with_conn(|conn| {
            require_member(conn, workspace_id, one)?;
            require_member(conn, workspace_id, two)?;

            conn.execute(
                "INSERT INTO conversations (id, workspace_id, user_one_id, user_two_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(workspace_id, user_one_id, user_two_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    workspace_id.to_string(),
                    one.to_string(),
                    two.to_string(),
                    millis(Utc::now())
                ],
            )?;

            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE workspace_id = ?1 AND user_one_id = ?2 AND user_two_id = ?3"
            );
            Ok(conn.query_row(
                &sql,
                params![workspace_id.to_string(), one.to_string(), two.to_string()],
                conversation_from_row,
            )?)
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Conversations in a workspace that the user takes part in.
    pub fn list_conversations(&self, workspace_id: Uuid, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| query_user_conversations(conn, workspace_id, user_id))
    }
}

pub(crate) fn query_conversation(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], conversation_from_row).optional()?)
}

pub(crate) fn query_user_conversations(
    conn: &Connection,
    workspace_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<Conversation>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE workspace_id = ?1 AND (user_one_id = ?2 OR user_two_id = ?2)
         ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![workspace_id.to_string(), user_id.to_string()], conversation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
