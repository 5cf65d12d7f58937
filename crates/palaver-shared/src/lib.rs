//! # palaver-shared
//!
//! Types shared between the Palaver store and server crates: validated user
//! identifiers, display profiles, and the tagged event unions exchanged over
//! the real-time relay.

pub mod events;
pub mod types;

pub use events::{ClientEvent, ServerEvent};
pub use types::{InvalidUserId, Message, UserId, UserProfile};
