//! # palaver-store
//!
//! SQLite-backed persistence for the Palaver messaging core: the durable
//! message collection plus a small replica of the external user directory
//! (display names and avatars, used when resolving inbox rows).
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for every operation the
//! messaging core needs: append, paginated pair history, bulk read-marking,
//! and the inbox aggregation.

pub mod database;
pub mod inbox;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
