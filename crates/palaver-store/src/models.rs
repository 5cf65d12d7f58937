//! Read-model structs returned by the store's query helpers.
//!
//! The [`Message`] and [`UserProfile`] domain types live in
//! `palaver-shared` because they also cross the relay wire; this module
//! holds the shapes that exist only as query results.

use serde::{Deserialize, Serialize};

use palaver_shared::{Message, UserProfile};

/// One page of conversation history between a pair of users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Messages in ascending `created_at` order (oldest first, for display).
    pub items: Vec<Message>,
    /// Total number of messages between the pair, across all pages.
    pub total: u64,
}

/// One derived inbox row: the state of a conversation with one counterpart.
///
/// Never stored; recomputed on demand from the message collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRow {
    /// The other participant, with display metadata resolved from the
    /// directory replica (bare id if unknown there).
    pub counterpart: UserProfile,
    /// Most recent message in either direction.
    pub last_message: Message,
    /// Messages addressed to the inbox owner that are still unread.
    pub unread: u64,
}
