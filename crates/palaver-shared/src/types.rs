//! Identity types.
//!
//! User identity is owned by an external user store; Palaver only ever sees
//! an opaque identifier and treats it as a foreign key.  The identifier is
//! validated at every deserialization boundary so malformed ids are rejected
//! before any store access.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a user identifier.
const MAX_USER_ID_LEN: usize = 64;

/// Error returned when a user identifier fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid user id: {0}")]
pub struct InvalidUserId(pub String);

/// An opaque, validated user identifier.
///
/// Accepted format: 1–64 ASCII characters from `[A-Za-z0-9_-]`.  The serde
/// impls go through [`UserId::parse`], so a `UserId` obtained from a
/// deserialized payload is always well-formed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, InvalidUserId> {
        if raw.is_empty() || raw.len() > MAX_USER_ID_LEN {
            return Err(InvalidUserId(format!(
                "expected 1-{} characters, got {}",
                MAX_USER_ID_LEN,
                raw.len()
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(InvalidUserId(format!(
                "identifier contains characters outside [A-Za-z0-9_-]: {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = InvalidUserId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single direct message between two users.
///
/// Created on send and mutated exactly once thereafter, when the recipient
/// marks it read (`read_at` goes from `None` to a timestamp).  `text` and
/// `image_url` are individually optional but at least one is always present
/// in a stored message; the store enforces this on append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier (UUID v4, server-generated).
    pub id: uuid::Uuid,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: Option<String>,
    /// URL of an attached image in the external blob store.
    pub image_url: Option<String>,
    /// When the recipient marked the message read; `None` means unread.
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Server-assigned creation time, the ordering key for history.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Display metadata for a user, replicated from the external user store.
///
/// Used to resolve counterpart names and avatars when rendering inbox rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// A profile for a user the directory has never heard of: id only.
    pub fn bare(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            avatar_url: None,
        }
    }
}
