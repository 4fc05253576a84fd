use rusqlite::{params, Connection, OptionalExtension};

use super::models::{LoginData, SelfUser, UserSummary};
use crate::ids::UserId;

pub struct NewUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: Vec<u8>,
    pub password_salt: Vec<u8>,
    pub created_at: i64,
}

/// Which unique column a failed insert collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConflict {
    Username,
    Email,
}

pub fn insert_user(conn: &Connection, user: &NewUser) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, email, email_verified, password_hash, password_salt, created_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)",
        params![
            user.id as i64,
            user.username,
            user.email,
            user.password_hash,
            user.password_salt,
            user.created_at,
        ],
    )?;
    Ok(())
}

/// Classify a unique-constraint failure from `insert_user`.
pub fn unique_conflict(err: &rusqlite::Error) -> Option<UniqueConflict> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            if msg.contains("users.email") {
                Some(UniqueConflict::Email)
            } else if msg.contains("users.username") {
                Some(UniqueConflict::Username)
            } else {
                None
            }
        }
        _ => None,
    }
}

pub fn user_by_id(conn: &Connection, id: UserId) -> rusqlite::Result<Option<UserSummary>> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE id = ?1",
        params![id as i64],
        |row| {
            Ok(UserSummary {
                id: row.get::<_, i64>(0)? as u64,
                username: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn self_user(conn: &Connection, id: UserId) -> rusqlite::Result<Option<SelfUser>> {
    conn.query_row(
        "SELECT id, username, email, email_verified, created_at FROM users WHERE id = ?1",
        params![id as i64],
        |row| {
            Ok(SelfUser {
                id: row.get::<_, i64>(0)? as u64,
                username: row.get(1)?,
                email: row.get(2)?,
                email_verified: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

pub fn login_data_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<LoginData>> {
    conn.query_row(
        "SELECT id, password_hash, password_salt FROM users WHERE email = ?1",
        params![email],
        |row| {
            Ok(LoginData {
                id: row.get::<_, i64>(0)? as u64,
                password_hash: row.get(1)?,
                password_salt: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn user_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<UserSummary>> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE username = ?1",
        params![username],
        |row| {
            Ok(UserSummary {
                id: row.get::<_, i64>(0)? as u64,
                username: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{memory_db, seed_user};

    #[test]
    fn duplicate_username_is_classified() {
        let db = memory_db();
        seed_user(&db, 1, "alice");
        let conn = db.lock().unwrap();
        let err = insert_user(
            &conn,
            &NewUser {
                id: 2,
                username: "alice".into(),
                email: "other@example.com".into(),
                password_hash: vec![],
                password_salt: vec![],
                created_at: 2,
            },
        )
        .unwrap_err();
        assert_eq!(unique_conflict(&err), Some(UniqueConflict::Username));
    }

    #[test]
    fn duplicate_email_is_classified() {
        let db = memory_db();
        seed_user(&db, 1, "alice");
        let conn = db.lock().unwrap();
        let err = insert_user(
            &conn,
            &NewUser {
                id: 2,
                username: "bob".into(),
                email: "alice@example.com".into(),
                password_hash: vec![],
                password_salt: vec![],
                created_at: 2,
            },
        )
        .unwrap_err();
        assert_eq!(unique_conflict(&err), Some(UniqueConflict::Email));
    }

    #[test]
    fn lookups_find_seeded_user() {
        let db = memory_db();
        seed_user(&db, 7, "carol");
        let conn = db.lock().unwrap();
        assert_eq!(user_by_id(&conn, 7).unwrap().unwrap().username, "carol");
        assert_eq!(user_by_username(&conn, "carol").unwrap().unwrap().id, 7);
        assert_eq!(login_data_by_email(&conn, "carol@example.com").unwrap().unwrap().id, 7);
        assert!(self_user(&conn, 8).unwrap().is_none());
    }
}
