use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Timestamps are stored as integer milliseconds since the epoch so that
/// watermark comparisons are plain integer comparisons.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                image       TEXT,
                last_seen   INTEGER,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE workspaces (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT,
                created_by  TEXT NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE workspace_members (
                workspace_id TEXT NOT NULL,
                user_id      TEXT NOT NULL,
                role         TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'member')),
                joined_at    INTEGER NOT NULL,
                PRIMARY KEY (workspace_id, user_id)
            );

            CREATE INDEX idx_workspace_members_user
                ON workspace_members(user_id);

            CREATE TABLE channels (
                id           TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name         TEXT NOT NULL,
                description  TEXT,
                created_by   TEXT NOT NULL,
                is_private   INTEGER NOT NULL DEFAULT 0,
                is_archived  INTEGER NOT NULL DEFAULT 0,
                created_at   INTEGER NOT NULL
            );

            CREATE INDEX idx_channels_workspace
                ON channels(workspace_id);

            CREATE TABLE channel_members (
                channel_id  TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                joined_at   INTEGER NOT NULL,
                PRIMARY KEY (channel_id, user_id)
            );

            CREATE TABLE conversations (
                id           TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                user_one_id  TEXT NOT NULL,
                user_two_id  TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                CHECK (user_one_id <= user_two_id),
                UNIQUE (workspace_id, user_one_id, user_two_id)
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                workspace_id    TEXT NOT NULL,
                channel_id      TEXT,
                conversation_id TEXT,
                author_id       TEXT NOT NULL,
                text            TEXT NOT NULL,
                reply_to        TEXT,
                attachments     TEXT NOT NULL DEFAULT '[]',
                link_previews   TEXT NOT NULL DEFAULT '[]',
                created_at      INTEGER NOT NULL,
                CHECK ((channel_id IS NULL) <> (conversation_id IS NULL))
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, created_at);
            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_reply_to
                ON messages(reply_to, created_at);
            CREATE INDEX idx_messages_workspace
                ON messages(workspace_id);

            CREATE TABLE reactions (
                message_id   TEXT NOT NULL,
                user_id      TEXT NOT NULL,
                emoji        TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id, emoji)
            );

            CREATE INDEX idx_reactions_workspace
                ON reactions(workspace_id);

            CREATE TABLE read_status (
                user_id          TEXT NOT NULL,
                destination_kind TEXT NOT NULL CHECK (destination_kind IN ('channel', 'conversation')),
                destination_id   TEXT NOT NULL,
                last_read_at     INTEGER NOT NULL,
                PRIMARY KEY (user_id, destination_kind, destination_id)
            );

            CREATE INDEX idx_read_status_destination
                ON read_status(destination_id);

            CREATE TABLE workspace_invites (
                id           TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                email        TEXT NOT NULL,
                invited_by   TEXT NOT NULL,
                role         TEXT NOT NULL CHECK (role IN ('admin', 'member')),
                token        TEXT NOT NULL UNIQUE,
                expires_at   INTEGER NOT NULL,
                status       TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'expired')),
                accepted_at  INTEGER,
                accepted_by  TEXT,
                created_at   INTEGER NOT NULL
            );

            CREATE INDEX idx_invites_workspace
                ON workspace_invites(workspace_id);

            -- At most one live invite per (workspace, email)
            CREATE UNIQUE INDEX idx_invites_pending
                ON workspace_invites(workspace_id, email)
                WHERE status = 'pending';

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
