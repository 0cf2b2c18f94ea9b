use std::collections::HashMap;

use crate::Database;
use crate::models::UserRow;
use anyhow::Result;
use quickchat_types::models::UserProfile;
use rusqlite::{Connection, Row};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, password, full_name, bio, profile_pic, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        full_name: &str,
        bio: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, full_name, bio) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, password_hash, full_name, bio),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
            conn.query_row(&sql, [username], user_from_row).optional()
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Every user except `user_id`, ordered by display name.
    pub fn list_users_except(&self, user_id: &str) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id <> ?1 ORDER BY full_name COLLATE NOCASE, username",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(UserRow::into_profile).collect())
        })
    }

    /// Batch-fetch public profiles for a set of user IDs.
    pub fn get_profiles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserProfile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM users WHERE id IN ({})",
                USER_COLUMNS,
                placeholders.join(", ")
            );

            let ids: Vec<String> = user_ids.iter().map(Uuid::to_string).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(UserRow::into_profile)
                .map(|p| (p.id, p))
                .collect())
        })
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    conn.query_row(&sql, [id], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        full_name: row.get(3)?,
        bio: row.get(4)?,
        profile_pic: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_user(db: &Database, username: &str, full_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), username, "hash", full_name, "")
            .unwrap();
        id
    }

    #[test]
    fn list_users_excludes_caller() {
        let db = Database::open_in_memory().unwrap();
        let me = add_user(&db, "me", "Me");
        let bob = add_user(&db, "bob", "Bob");
        let amy = add_user(&db, "amy", "amy");

        let users = db.list_users_except(&me.to_string()).unwrap();
        let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![amy, bob]);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        add_user(&db, "sam", "Sam");
        let err = db.create_user(&Uuid::new_v4().to_string(), "sam", "hash", "Other", "");
        assert!(err.is_err());
    }

    #[test]
    fn get_profiles_skips_unknown_ids() {
        let db = Database::open_in_memory().unwrap();
        let sam = add_user(&db, "sam", "Sam");
        let profiles = db.get_profiles(&[sam, Uuid::new_v4()]).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[&sam].full_name, "Sam");
    }
}
