use rusqlite::{params, Connection};

use crate::auth::token::TokenIdentity;

pub fn insert_user_token(
    conn: &Connection,
    identity: &TokenIdentity,
    created_at: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO user_tokens (user_id, key_hash, created_at) VALUES (?1, ?2, ?3)",
        params![identity.user_id as i64, &identity.key_hash[..], created_at],
    )?;
    Ok(())
}

pub fn has_user_token(conn: &Connection, identity: &TokenIdentity) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM user_tokens WHERE user_id = ?1 AND key_hash = ?2)",
        params![identity.user_id as i64, &identity.key_hash[..]],
        |row| row.get(0),
    )
}

/// Returns true if a token row was deleted.
pub fn revoke_user_token(conn: &Connection, identity: &TokenIdentity) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM user_tokens WHERE user_id = ?1 AND key_hash = ?2",
        params![identity.user_id as i64, &identity.key_hash[..]],
    )?;
    Ok(rows > 0)
}
