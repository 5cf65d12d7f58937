//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `users` (directory replica) and `messages`,
//! with the pair-history and unread-count indexes the messaging queries rely
//! on.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (replica of the external user directory; display metadata
-- only, identity itself is owned elsewhere)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- opaque external identifier
    display_name TEXT,
    avatar_url   TEXT,
    updated_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id    TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    text         TEXT,                        -- at least one of text /
    image_url    TEXT,                        -- image_url is non-null
    read_at      TEXT,                        -- NULL = unread
    created_at   TEXT NOT NULL                -- RFC-3339, fixed microseconds
);

-- Pair history in either direction.
CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_id, recipient_id, created_at DESC);

-- Unread counts per recipient.
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(recipient_id, read_at);

-- Inbox scan: everything touching a user, newest first.
CREATE INDEX IF NOT EXISTS idx_messages_recipient_ts
    ON messages(recipient_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
