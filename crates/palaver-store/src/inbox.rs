//! Inbox aggregation.
//!
//! The inbox is a derived read model: one row per conversation counterpart,
//! carrying the most recent message and the unread count.  Nothing here is
//! cached or stored; every call recomputes from the message collection.

use std::collections::HashMap;

use rusqlite::params;

use palaver_shared::{UserId, UserProfile};

use crate::database::Database;
use crate::error::Result;
use crate::messages::row_to_message;
use crate::models::InboxRow;

impl Database {
    /// Derive the inbox for `user`.
    ///
    /// Scans the user's messages newest-first in a single pass: the first
    /// message seen for a counterpart becomes the preview, and unread
    /// messages (`recipient = user`, `read_at IS NULL`) are tallied per
    /// counterpart along the way.  Row order therefore falls out as "most
    /// recently active conversation first".  A user with no conversations
    /// gets an empty list.
    pub fn inbox_rows(&self, user: &UserId) -> Result<Vec<InboxRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, text, image_url, read_at, created_at
             FROM messages
             WHERE sender_id = ?1 OR recipient_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let messages = stmt.query_map(params![user.as_str()], row_to_message)?;

        let mut rows: Vec<InboxRow> = Vec::new();
        let mut index: HashMap<UserId, usize> = HashMap::new();

        for message in messages {
            let message = message?;
            let counterpart = if message.sender_id == *user {
                message.recipient_id.clone()
            } else {
                message.sender_id.clone()
            };

            let unread_here = message.recipient_id == *user && message.read_at.is_none();

            match index.get(&counterpart) {
                Some(&i) => {
                    if unread_here {
                        rows[i].unread += 1;
                    }
                }
                None => {
                    index.insert(counterpart.clone(), rows.len());
                    rows.push(InboxRow {
                        counterpart: UserProfile::bare(counterpart),
                        last_message: message,
                        unread: u64::from(unread_here),
                    });
                }
            }
        }

        // Resolve display metadata; unknown counterparts keep the bare id.
        for row in &mut rows {
            if let Some(profile) = self.get_user(&row.counterpart.id)? {
                row.counterpart = profile;
            }
        }

        Ok(rows)
    }
}
