use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use huddle_types::models::User;

use crate::models::{USER_COLUMNS, millis, user_from_row};
use crate::{Database, Result, StoreError};

impl Database {
    /// Create or refresh the user row for a session identity. The id is the
    /// stable key; name and email follow whatever the session provider
    /// last reported, and an image is only overwritten when one is given.
    pub fn upsert_user(
        &self,
        id: Uuid,
        name: &str,
        email: &str,
        image: Option<&str>,
    ) -> Result<User> {
        self.with_conn(|conn| {
            let taken_by: Option<String> = conn
                .query_row(
                    "SELECT id FROM users WHERE email = ?1 AND id <> ?2",
                    params![email, id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if taken_by.is_some() {
                return Err(StoreError::Conflict("email already registered to another user"));
            }

            conn.execute(
                "INSERT INTO users (id, name, email, image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    image = COALESCE(excluded.image, users.image)",
                params![id.to_string(), name, email, image, millis(Utc::now())],
            )?;

            query_user(conn, id)?.ok_or_else(|| StoreError::not_found("user", id))
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Batch-fetch users for a set of ids.
    pub fn get_users(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map(params_from_iter(ids.iter().map(Uuid::to_string)), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users.into_iter().map(|u| (u.id, u)).collect())
        })
    }

    /// Users that belong to a workspace, ordered by name.
    pub fn list_workspace_users(&self, workspace_id: Uuid) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email, u.image, u.last_seen, u.created_at
                 FROM users u
                 JOIN workspace_members m ON m.user_id = u.id
                 WHERE m.workspace_id = ?1
                 ORDER BY u.name",
            )?;
            let users = stmt
                .query_map([workspace_id.to_string()], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Presence heartbeat.
    pub fn touch_last_seen(&self, id: Uuid, now: DateTime<Utc>) -> Result<User> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                params![millis(now), id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("user", id));
            }
            query_user(conn, id)?.ok_or_else(|| StoreError::not_found("user", id))
        })
    }
}

pub(crate) fn query_user(conn: &rusqlite::Connection, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], user_from_row).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user, workspace};

    #[test]
    fn upsert_keeps_one_row_per_id() {
        let db = db();
        let id = Uuid::new_v4();
        db.upsert_user(id, "Ada", "ada@example.com", Some("a.png")).unwrap();
        let again = db.upsert_user(id, "Ada L.", "ada@example.com", None).unwrap();

        assert_eq!(again.name, "Ada L.");
        assert_eq!(again.image.as_deref(), Some("a.png"));
    }

    #[test]
    fn email_is_unique_case_insensitively() {
        let db = db();
        let ada = db.upsert_user(Uuid::new_v4(), "Ada", "ada@example.com", None).unwrap();
        let err = db
            .upsert_user(Uuid::new_v4(), "Imposter", "ADA@example.com", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(db.get_user(ada.id).unwrap().unwrap().name, "Ada");
    }

    #[test]
    fn heartbeat_sets_last_seen() {
        let db = db();
        let ada = user(&db, "ada");
        assert!(ada.last_seen.is_none());

        let now = Utc::now();
        let seen = db.touch_last_seen(ada.id, now).unwrap();
        assert_eq!(seen.last_seen.unwrap().timestamp_millis(), now.timestamp_millis());

        assert!(db.touch_last_seen(Uuid::new_v4(), now).is_err());
    }

    #[test]
    fn workspace_users_and_batch_lookup() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        db.add_member(ws.id, bob.id, huddle_types::models::Role::Member).unwrap();
        user(&db, "carol");

        let names: Vec<_> = db
            .list_workspace_users(ws.id)
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["ada", "bob"]);

        let found = db.get_users(&[ada.id, bob.id, Uuid::new_v4()]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(db.get_users(&[]).unwrap().is_empty());
    }
}
