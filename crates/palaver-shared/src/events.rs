//! Relay event unions.
//!
//! Every event crossing the real-time connection is one of these tagged
//! variants, with an explicit payload schema per kind.  Deserialization
//! doubles as boundary validation: an unknown tag or malformed field (a bad
//! user id included) fails before the event reaches any component.
//!
//! Call-signaling payloads (`channel`, `caller_name`) are opaque to the
//! relay: it forwards them verbatim and persists nothing.

use serde::{Deserialize, Serialize};

use crate::types::{Message, UserId};

/// Events a client may send over its real-time connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Send a durable chat message.  Persisted before any delivery attempt.
    MessageSend {
        to: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    TypingStart {
        to: UserId,
    },
    TypingStop {
        to: UserId,
    },
    /// Offer a call on `channel`; `caller_name` is display metadata for the
    /// callee's ringing UI.
    CallOffer {
        to: UserId,
        channel: String,
        caller_name: String,
    },
    CallAnswer {
        to: UserId,
        channel: String,
    },
    CallReject {
        to: UserId,
        channel: String,
    },
    CallEnd {
        to: UserId,
        channel: String,
    },
}

/// Events the server pushes to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Snapshot of all currently online users.  Broadcast on every presence
    /// change and sent to a connection right after it registers.
    Presence {
        online: Vec<UserId>,
    },
    /// A message addressed to this connection's user, delivered live.
    MessageNew {
        message: Message,
    },
    /// Acknowledgment to the sender: the persisted, fully-resolved message.
    /// Sent whether or not the recipient was reachable.
    MessageAck {
        message: Message,
    },
    TypingStart {
        from: UserId,
    },
    TypingStop {
        from: UserId,
    },
    CallOffer {
        from: UserId,
        channel: String,
        caller_name: String,
    },
    CallAnswer {
        from: UserId,
        channel: String,
    },
    CallReject {
        from: UserId,
        channel: String,
    },
    CallEnd {
        from: UserId,
        channel: String,
    },
    /// The connection sent something the relay could not process.  The
    /// connection stays open.
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_kebab_case_tags() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"typing-start","to":"u2"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::TypingStart {
                to: UserId::parse("u2").unwrap()
            }
        );
    }

    #[test]
    fn message_send_fields_are_optional() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"message-send","to":"u2","text":"hi"}"#).unwrap();
        match event {
            ClientEvent::MessageSend {
                text, image_url, ..
            } => {
                assert_eq!(text.as_deref(), Some("hi"));
                assert!(image_url.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_tags_and_malformed_ids_are_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"shout","to":"u2"}"#).is_err());
        assert!(
            serde_json::from_str::<ClientEvent>(r#"{"type":"typing-start","to":"u 2"}"#).is_err()
        );
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"call-offer","to":"u2"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"message-send"}"#).is_err());
    }
}
