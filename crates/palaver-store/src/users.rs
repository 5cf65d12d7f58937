//! Directory-replica operations.
//!
//! Identity lives in an external user store; this table only mirrors the
//! display metadata (name, avatar) that inbox rows need.  The collaborator
//! pushes updates through the server's upsert endpoint.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use palaver_shared::{UserId, UserProfile};

use crate::database::Database;
use crate::error::Result;
use crate::messages::encode_ts;

impl Database {
    /// Insert or refresh a user's display metadata.
    pub fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar_url, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 avatar_url   = excluded.avatar_url,
                 updated_at   = excluded.updated_at",
            params![
                profile.id.as_str(),
                profile.display_name,
                profile.avatar_url,
                encode_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Look up a user's display metadata, if the directory knows them.
    pub fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT id, display_name, avatar_url FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let id_str: String = row.get(0)?;
                    let id = UserId::parse(&id_str).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(UserProfile {
                        id,
                        display_name: row.get(1)?,
                        avatar_url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn upsert_then_lookup() {
        let db = Database::open_in_memory().unwrap();
        let profile = UserProfile {
            id: uid("u1"),
            display_name: Some("Alice".into()),
            avatar_url: None,
        };
        db.upsert_user(&profile).unwrap();
        assert_eq!(db.get_user(&uid("u1")).unwrap(), Some(profile));
        assert_eq!(db.get_user(&uid("nobody")).unwrap(), None);
    }

    #[test]
    fn upsert_replaces_existing_metadata() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&UserProfile {
            id: uid("u1"),
            display_name: Some("Alice".into()),
            avatar_url: None,
        })
        .unwrap();
        db.upsert_user(&UserProfile {
            id: uid("u1"),
            display_name: Some("Alice B".into()),
            avatar_url: Some("https://cdn/av.png".into()),
        })
        .unwrap();

        let fetched = db.get_user(&uid("u1")).unwrap().unwrap();
        assert_eq!(fetched.display_name.as_deref(), Some("Alice B"));
        assert_eq!(fetched.avatar_url.as_deref(), Some("https://cdn/av.png"));
    }
}
