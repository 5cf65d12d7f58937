//! Message persistence: append, pair history, read-marking.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use palaver_shared::{Message, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::HistoryPage;

/// Hard cap on the page size a caller may request.
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Encode a timestamp for storage.
///
/// Fixed microsecond precision so that lexicographic order on the TEXT
/// column is chronological order; `ORDER BY created_at` depends on this.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

impl Database {
    /// Persist a new message and return the stored record.
    ///
    /// Validates before touching the store: sender and recipient must be
    /// distinct, and at least one of `text` / `image_url` must carry
    /// content.  The id and `created_at` are server-assigned.
    pub fn append_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Result<Message> {
        if sender == recipient {
            return Err(StoreError::InvalidArgument(
                "cannot send a message to yourself".into(),
            ));
        }

        let has_text = text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = image_url.as_deref().is_some_and(|u| !u.is_empty());
        if !has_text && !has_image {
            return Err(StoreError::InvalidArgument(
                "message needs text or an image".into(),
            ));
        }

        // Truncate to the stored precision so the returned record is
        // byte-identical to what a later query will see.
        let created_at = decode_ts(&encode_ts(Utc::now()))?;

        let message = Message {
            id: Uuid::new_v4(),
            sender_id: sender.clone(),
            recipient_id: recipient.clone(),
            text: if has_text { text } else { None },
            image_url: if has_image { image_url } else { None },
            read_at: None,
            created_at,
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, text, image_url, read_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.recipient_id.as_str(),
                message.text,
                message.image_url,
                encode_ts(message.created_at),
            ],
        )?;

        Ok(message)
    }

    /// Fetch one page of the conversation between `a` and `b`.
    ///
    /// `page` is 1-indexed; `limit` is clamped to `1..=MAX_HISTORY_LIMIT`.
    /// Pagination walks the conversation newest-first (page 1 holds the most
    /// recent messages) but each page is returned oldest-first for display.
    /// Ties on `created_at` break on insertion order (rowid), so bursts
    /// within one microsecond still read back in send order.
    pub fn history(&self, a: &UserId, b: &UserId, page: u32, limit: u32) -> Result<HistoryPage> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let page = page.max(1);
        // Widen before multiplying: `page` comes straight from the client,
        // and `(page - 1) * limit` can exceed u32. SQLite takes i64 anyway.
        let offset = i64::from(page - 1) * i64::from(limit);

        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)",
            params![a.as_str(), b.as_str()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, text, image_url, read_at, created_at
             FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), limit, offset],
            row_to_message,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        // Newest-first from the query; oldest-first for the caller.
        items.reverse();

        Ok(HistoryPage { items, total })
    }

    /// Mark every unread message from `sender` to `reader` as read now.
    ///
    /// Returns the number of rows updated.  Idempotent: a second call finds
    /// nothing unread and returns 0.
    pub fn mark_read(&self, reader: &UserId, sender: &UserId) -> Result<u64> {
        let updated = self.conn().execute(
            "UPDATE messages SET read_at = ?1
             WHERE recipient_id = ?2 AND sender_id = ?3 AND read_at IS NULL",
            params![encode_ts(Utc::now()), reader.as_str(), sender.as_str()],
        )?;
        Ok(updated as u64)
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, sender_id, recipient_id, text, image_url, read_at, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let text: Option<String> = row.get(3)?;
    let image_url: Option<String> = row.get(4)?;
    let read_at_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_err(0, e))?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| conversion_err(1, e))?;
    let recipient_id = UserId::parse(&recipient_str).map_err(|e| conversion_err(2, e))?;
    let read_at = read_at_str
        .as_deref()
        .map(decode_ts)
        .transpose()
        .map_err(|e| conversion_err(5, e))?;
    let created_at = decode_ts(&created_str).map_err(|e| conversion_err(6, e))?;

    Ok(Message {
        id,
        sender_id,
        recipient_id,
        text,
        image_url,
        read_at,
        created_at,
    })
}

fn conversion_err(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn append_assigns_id_and_timestamp() {
        let db = db();
        let before = Utc::now();
        let msg = db
            .append_message(&uid("u1"), &uid("u2"), Some("hi".into()), None)
            .unwrap();

        // Compare at stored (microsecond) precision.
        assert!(encode_ts(msg.created_at) >= encode_ts(before));
        assert!(msg.read_at.is_none());

        let fetched = db.get_message(msg.id).unwrap();
        assert_eq!(fetched, msg);
    }

    #[test]
    fn append_rejects_self_send() {
        let db = db();
        let err = db
            .append_message(&uid("u1"), &uid("u1"), Some("hi".into()), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn append_rejects_empty_body() {
        let db = db();
        for (text, image) in [(None, None), (Some("   ".to_string()), None)] {
            let err = db
                .append_message(&uid("u1"), &uid("u2"), text, image)
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidArgument(_)));
        }
        // Image-only is a valid message.
        db.append_message(&uid("u1"), &uid("u2"), None, Some("https://x/img.png".into()))
            .unwrap();
    }

    #[test]
    fn history_is_ascending_and_covers_both_directions() {
        let db = db();
        let (a, b) = (uid("u1"), uid("u2"));

        db.append_message(&a, &b, Some("one".into()), None).unwrap();
        db.append_message(&b, &a, Some("two".into()), None).unwrap();
        db.append_message(&a, &b, Some("three".into()), None).unwrap();
        // Noise from an unrelated pair must not leak in.
        db.append_message(&a, &uid("u3"), Some("other".into()), None)
            .unwrap();

        let page = db.history(&a, &b, 1, 30).unwrap();
        assert_eq!(page.total, 3);
        let texts: Vec<_> = page.items.iter().map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, [Some("one"), Some("two"), Some("three")]);

        // Same result when queried from the other side.
        let mirrored = db.history(&b, &a, 1, 30).unwrap();
        assert_eq!(mirrored.items, page.items);
    }

    #[test]
    fn history_pagination_reconstructs_the_sequence() {
        let db = db();
        let (a, b) = (uid("u1"), uid("u2"));
        for i in 0..7 {
            db.append_message(&a, &b, Some(format!("m{i}")), None).unwrap();
        }

        for page_size in [1u32, 2, 3, 7, 50] {
            let mut pages = Vec::new();
            let mut page_no = 1;
            loop {
                let page = db.history(&a, &b, page_no, page_size).unwrap();
                if page.items.is_empty() {
                    break;
                }
                pages.push(page.items);
                page_no += 1;
            }
            // Page 1 is the newest slice; walking back to page N and
            // flattening in reverse page order yields the full ascending
            // sequence.
            pages.reverse();
            let texts: Vec<_> = pages
                .into_iter()
                .flatten()
                .map(|m| m.text.unwrap())
                .collect();
            let expected: Vec<_> = (0..7).map(|i| format!("m{i}")).collect();
            assert_eq!(texts, expected, "page_size={page_size}");
        }
    }

    #[test]
    fn history_clamps_limit() {
        let db = db();
        let (a, b) = (uid("u1"), uid("u2"));
        for i in 0..(MAX_HISTORY_LIMIT + 20) {
            db.append_message(&a, &b, Some(format!("m{i}")), None).unwrap();
        }

        let page = db.history(&a, &b, 1, 10_000).unwrap();
        assert_eq!(page.items.len(), MAX_HISTORY_LIMIT as usize);
        assert_eq!(page.total, (MAX_HISTORY_LIMIT + 20) as u64);

        // Zero limit is bumped to one rather than erroring.
        let one = db.history(&a, &b, 1, 0).unwrap();
        assert_eq!(one.items.len(), 1);
    }

    #[test]
    fn history_tolerates_huge_page_numbers() {
        let db = db();
        let (a, b) = (uid("u1"), uid("u2"));
        db.append_message(&a, &b, Some("hi".into()), None).unwrap();

        // u32::MAX pages of 100 would overflow a u32 offset; the page is
        // simply past the end of the conversation.
        let page = db.history(&a, &b, u32::MAX, MAX_HISTORY_LIMIT).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
    }

    #[test]
    fn mark_read_is_idempotent_and_directional() {
        let db = db();
        let (a, b) = (uid("u1"), uid("u2"));

        db.append_message(&a, &b, Some("one".into()), None).unwrap();
        db.append_message(&a, &b, Some("two".into()), None).unwrap();
        db.append_message(&b, &a, Some("reply".into()), None).unwrap();

        // b reads what a sent; a's own unread from b is untouched.
        assert_eq!(db.mark_read(&b, &a).unwrap(), 2);
        assert_eq!(db.mark_read(&b, &a).unwrap(), 0);

        let page = db.history(&a, &b, 1, 30).unwrap();
        let reply = page.items.iter().find(|m| m.sender_id == b).unwrap();
        assert!(reply.read_at.is_none());
        assert!(page
            .items
            .iter()
            .filter(|m| m.sender_id == a)
            .all(|m| m.read_at.is_some()));
    }

    #[test]
    fn timestamps_survive_storage_round_trip() {
        let db = db();
        let msg = db
            .append_message(&uid("u1"), &uid("u2"), Some("hi".into()), None)
            .unwrap();
        let fetched = db.get_message(msg.id).unwrap();
        // encode_ts truncates to microseconds; append stores what it returns.
        assert_eq!(
            encode_ts(fetched.created_at),
            encode_ts(msg.created_at)
        );
    }
}
