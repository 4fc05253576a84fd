use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::models::{ChannelRecord, ChannelSnapshot, UserSummary};
use crate::ids::{ChannelId, UserId};

// Column order shared by every channel query; `{last_accessed}` differs.
const CHANNEL_SELECT: &str = "SELECT c.id, c.name, c.member_count, c.created_at, {last_accessed},
        o.id, o.username, o.created_at";

fn channel_from_row(row: &Row) -> rusqlite::Result<ChannelRecord> {
    let owner_id: Option<i64> = row.get(5)?;
    let owner = match owner_id {
        Some(id) => Some(UserSummary {
            id: id as u64,
            username: row.get(6)?,
            created_at: row.get(7)?,
        }),
        None => None,
    };

    Ok(ChannelRecord {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
        member_count: row.get(2)?,
        created_at: row.get(3)?,
        last_accessed: row.get(4)?,
        owner,
    })
}

fn member_select() -> String {
    CHANNEL_SELECT.replace("{last_accessed}", "cm.last_accessed")
}

/// Every channel `user_id` belongs to, most recently accessed first.
pub fn list_for_user(conn: &Connection, user_id: UserId) -> rusqlite::Result<Vec<ChannelRecord>> {
    let sql = format!(
        "{}
         FROM channel_members cm
         JOIN channels c ON c.id = cm.channel_id
         LEFT JOIN users o ON o.id = c.owner
         WHERE cm.user_id = ?1
         ORDER BY cm.last_accessed DESC, c.id DESC",
        member_select()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id as i64], channel_from_row)?;
    rows.collect()
}

/// The login snapshot: every channel of `user_id` with its full member list.
pub fn memberships_with_members(
    conn: &Connection,
    user_id: UserId,
) -> rusqlite::Result<Vec<ChannelSnapshot>> {
    let channels = list_for_user(conn, user_id)?;
    if channels.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT cm.channel_id, u.id, u.username, u.created_at
         FROM channel_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.channel_id IN (SELECT channel_id FROM channel_members WHERE user_id = ?1)
         ORDER BY cm.channel_id, u.id",
    )?;
    let mut members: HashMap<ChannelId, Vec<UserSummary>> = HashMap::new();
    let rows = stmt.query_map(params![user_id as i64], |row| {
        Ok((
            row.get::<_, i64>(0)? as u64,
            UserSummary {
                id: row.get::<_, i64>(1)? as u64,
                username: row.get(2)?,
                created_at: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (channel_id, member) = row?;
        members.entry(channel_id).or_default().push(member);
    }

    Ok(channels
        .into_iter()
        .map(|channel| ChannelSnapshot {
            members: members.remove(&channel.id).unwrap_or_default(),
            channel,
        })
        .collect())
}

/// A channel as seen by `user_id`, or `None` if they are not a member.
pub fn channel_for_member(
    conn: &Connection,
    channel_id: ChannelId,
    user_id: UserId,
) -> rusqlite::Result<Option<ChannelRecord>> {
    let sql = format!(
        "{}
         FROM channel_members cm
         JOIN channels c ON c.id = cm.channel_id
         LEFT JOIN users o ON o.id = c.owner
         WHERE cm.channel_id = ?1 AND cm.user_id = ?2",
        member_select()
    );
    conn.query_row(&sql, params![channel_id as i64, user_id as i64], channel_from_row)
        .optional()
}

/// A channel independent of any member; `last_accessed` is the creation time.
pub fn channel_by_id(
    conn: &Connection,
    channel_id: ChannelId,
) -> rusqlite::Result<Option<ChannelRecord>> {
    let sql = format!(
        "{}
         FROM channels c
         LEFT JOIN users o ON o.id = c.owner
         WHERE c.id = ?1",
        CHANNEL_SELECT.replace("{last_accessed}", "c.created_at")
    );
    conn.query_row(&sql, params![channel_id as i64], channel_from_row)
        .optional()
}

pub fn channel_members(
    conn: &Connection,
    channel_id: ChannelId,
) -> rusqlite::Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.created_at
         FROM channel_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.channel_id = ?1
         ORDER BY u.id",
    )?;
    let rows = stmt.query_map(params![channel_id as i64], |row| {
        Ok(UserSummary {
            id: row.get::<_, i64>(0)? as u64,
            username: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn is_member(conn: &Connection, channel_id: ChannelId, user_id: UserId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2)",
        params![channel_id as i64, user_id as i64],
        |row| row.get(0),
    )
}

/// Insert a channel owned by `owner` with `owner` plus `members` joined.
/// An unknown member id fails with a foreign key violation.
pub fn create_channel(
    conn: &Connection,
    channel_id: ChannelId,
    owner: UserId,
    name: &str,
    members: &[UserId],
    now: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO channels (id, owner, name, member_count, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            channel_id as i64,
            owner as i64,
            name,
            (members.len() + 1) as i64,
            now
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO channel_members (user_id, channel_id, last_accessed) VALUES (?1, ?2, ?3)",
    )?;
    for user_id in std::iter::once(&owner).chain(members) {
        stmt.execute(params![*user_id as i64, channel_id as i64, now])?;
    }
    Ok(())
}

/// Returns false if the channel does not exist.
pub fn update_channel(
    conn: &Connection,
    channel_id: ChannelId,
    name: Option<&str>,
    owner: Option<UserId>,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE channels SET name = COALESCE(?2, name), owner = COALESCE(?3, owner) WHERE id = ?1",
        params![channel_id as i64, name, owner.map(|id| id as i64)],
    )?;
    Ok(rows > 0)
}

pub fn channel_owner(conn: &Connection, channel_id: ChannelId) -> rusqlite::Result<Option<UserId>> {
    let owner: Option<Option<i64>> = conn
        .query_row(
            "SELECT owner FROM channels WHERE id = ?1",
            params![channel_id as i64],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner.flatten().map(|id| id as u64))
}

pub fn delete_channel(conn: &Connection, channel_id: ChannelId) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM channels WHERE id = ?1", params![channel_id as i64])?;
    Ok(rows > 0)
}

/// Returns false if `user_id` already was a member.
pub fn add_member(
    conn: &Connection,
    channel_id: ChannelId,
    user_id: UserId,
    now: i64,
) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO channel_members (user_id, channel_id, last_accessed) VALUES (?1, ?2, ?3)",
        params![user_id as i64, channel_id as i64, now],
    )?;
    if inserted > 0 {
        conn.execute(
            "UPDATE channels SET member_count = member_count + 1 WHERE id = ?1",
            params![channel_id as i64],
        )?;
    }
    Ok(inserted > 0)
}

/// Returns false if `user_id` was not a member. A departing owner leaves
/// the channel ownerless.
pub fn remove_member(
    conn: &Connection,
    channel_id: ChannelId,
    user_id: UserId,
) -> rusqlite::Result<bool> {
    let removed = conn.execute(
        "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
        params![channel_id as i64, user_id as i64],
    )?;
    if removed > 0 {
        conn.execute(
            "UPDATE channels
             SET member_count = member_count - 1,
                 owner = CASE WHEN owner = ?2 THEN NULL ELSE owner END
             WHERE id = ?1",
            params![channel_id as i64, user_id as i64],
        )?;
    }
    Ok(removed > 0)
}

pub fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
