//! Read watermarks and unread counting.
//!
//! A destination's unread count for a user is the number of messages in it
//! (replies included) created strictly after the user's watermark. A user
//! with no watermark has read nothing.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use huddle_types::api::UnreadCountsResponse;
use huddle_types::models::{Destination, ReadStatus};
use huddle_types::unread::{DestinationUnread, UnreadSnapshot, total_unread};

use crate::channels::query_visible_channels;
use crate::conversations::query_user_conversations;
use crate::membership::{authorize_destination, require_member};
use crate::messages::destination_column;
use crate::models::{millis, opt_ts_at, opt_uuid_at, truncate};
use crate::{Database, Result};

impl Database {
    /// Move the user's watermark for a destination up to `now`. Never moves
    /// it backwards.
    pub fn mark_read(&self, user_id: Uuid, destination: Destination, now: DateTime<Utc>) -> Result<ReadStatus> {
        self.with_conn(|conn| {
            authorize_destination(conn, destination, user_id)?;
            advance_watermark(conn, user_id, destination, truncate(now))?;
            let last_read_at = query_watermark(conn, user_id, destination)?.unwrap_or_else(|| truncate(now));
            Ok(ReadStatus {
                user_id,
                destination,
                last_read_at,
            })
        })
    }

    /// Unread state of one destination as the user would see it now.
    pub fn unread_snapshot(&self, user_id: Uuid, destination: Destination) -> Result<UnreadSnapshot> {
        self.with_conn(|conn| {
            authorize_destination(conn, destination, user_id)?;
            snapshot(conn, user_id, destination)
        })
    }

    /// Unread snapshots for every destination the user can see in a
    /// workspace: visible channels, then the user's conversations.
    pub fn unread_counts(&self, workspace_id: Uuid, user_id: Uuid) -> Result<UnreadCountsResponse> {
        self.with_conn(|conn| {
            require_member(conn, workspace_id, user_id)?;

            let channels = query_visible_channels(conn, workspace_id, Some(user_id))?
                .into_iter()
                .map(|c| entry(conn, user_id, Destination::Channel(c.id)))
                .collect::<Result<Vec<_>>>()?;
            let conversations = query_user_conversations(conn, workspace_id, user_id)?
                .into_iter()
                .map(|c| entry(conn, user_id, Destination::Conversation(c.id)))
                .collect::<Result<Vec<_>>>()?;

            let total = total_unread(&channels) + total_unread(&conversations);
            Ok(UnreadCountsResponse {
                channels,
                conversations,
                total,
            })
        })
    }
}

pub(crate) fn advance_watermark(
    conn: &Connection,
    user_id: Uuid,
    destination: Destination,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO read_status (user_id, destination_kind, destination_id, last_read_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id, destination_kind, destination_id)
         DO UPDATE SET last_read_at = MAX(last_read_at, excluded.last_read_at)",
        params![user_id.to_string(), destination.kind(), destination.id().to_string(), millis(at)],
    )?;
    Ok(())
}

fn query_watermark(conn: &Connection, user_id: Uuid, destination: Destination) -> Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = conn
        .query_row(
            "SELECT last_read_at FROM read_status
             WHERE user_id = ?1 AND destination_kind = ?2 AND destination_id = ?3",
            params![user_id.to_string(), destination.kind(), destination.id().to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(ms.and_then(DateTime::from_timestamp_millis))
}

fn snapshot(conn: &Connection, user_id: Uuid, destination: Destination) -> Result<UnreadSnapshot> {
    let column = destination_column(destination);
    let key = destination.id().to_string();
    let watermark = query_watermark(conn, user_id, destination)?.map(millis);

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM messages WHERE {column} = ?1 AND (?2 IS NULL OR created_at > ?2)"),
        params![&key, watermark],
        |row| row.get(0),
    )?;

    let last = conn
        .query_row(
            &format!("SELECT author_id, created_at FROM messages WHERE {column} = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1"),
            [&key],
            |row| Ok((opt_uuid_at(row, 0)?, opt_ts_at(row, 1)?)),
        )
        .optional()?;
    let (last_message_author_id, last_message_at) = last.unwrap_or((None, None));

    Ok(UnreadSnapshot {
        count: count as u64,
        last_message_author_id,
        last_message_at,
    })
}

fn entry(conn: &Connection, user_id: Uuid, destination: Destination) -> Result<DestinationUnread> {
    Ok(DestinationUnread {
        destination,
        snapshot: snapshot(conn, user_id, destination)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::NewMessage;
    use crate::test_support::{db, now, user, workspace};
    use chrono::Duration;
    use huddle_types::models::Role;

    #[test]
    fn counts_messages_after_watermark() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        db.add_member(ws.id, bob.id, Role::Member).unwrap();
        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);
        let t0 = now();

        db.post_message(NewMessage::text(general, bob.id, "one"), t0).unwrap();
        db.post_message(NewMessage::text(general, bob.id, "two"), t0 + Duration::seconds(1)).unwrap();

        let snap = db.unread_snapshot(ada.id, general).unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.last_message_author_id, Some(bob.id));

        db.mark_read(ada.id, general, t0 + Duration::seconds(1)).unwrap();
        assert_eq!(db.unread_snapshot(ada.id, general).unwrap().count, 0);

        // Marking an earlier time does not regress the watermark.
        db.mark_read(ada.id, general, t0).unwrap();
        assert_eq!(db.unread_snapshot(ada.id, general).unwrap().count, 0);
    }

    #[test]
    fn own_post_advances_own_watermark() {
        let db = db();
        let ada = user(&db, "ada");
        let ws = workspace(&db, &ada);
        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);

        let posted = db.post_message(NewMessage::text(general, ada.id, "note to self"), now()).unwrap();
        assert_eq!(db.unread_snapshot(ada.id, general).unwrap().count, 0);

        // An older mark leaves the watermark at the post.
        let status = db.mark_read(ada.id, general, posted.created_at - Duration::seconds(5)).unwrap();
        assert_eq!(status.last_read_at, posted.created_at);
    }

    #[test]
    fn workspace_counts_cover_visible_destinations() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        db.add_member(ws.id, bob.id, Role::Member).unwrap();

        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);
        let secret = Destination::Channel(db.create_channel(ws.id, "secret", None, ada.id, true, &[]).unwrap().id);
        let dm = Destination::Conversation(db.get_or_create_conversation(ws.id, ada.id, bob.id).unwrap().id);
        let t0 = now();

        db.post_message(NewMessage::text(general, ada.id, "hello all"), t0).unwrap();
        db.post_message(NewMessage::text(secret, ada.id, "admins only"), t0).unwrap();
        db.post_message(NewMessage::text(dm, ada.id, "psst"), t0).unwrap();

        let counts = db.unread_counts(ws.id, bob.id).unwrap();
        assert_eq!(counts.channels.len(), 1);
        assert_eq!(counts.channels[0].destination, general);
        assert_eq!(counts.conversations.len(), 1);
        assert_eq!(counts.total, 2);

        // Stable without new messages or read marks.
        assert_eq!(db.unread_counts(ws.id, bob.id).unwrap().total, 2);
        assert_eq!(db.unread_counts(ws.id, ada.id).unwrap().total, 0);
    }

    #[test]
    fn empty_destination_has_no_last_message() {
        let db = db();
        let ada = user(&db, "ada");
        let ws = workspace(&db, &ada);
        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);

        assert_eq!(db.unread_snapshot(ada.id, general).unwrap(), UnreadSnapshot::default());
    }
}
