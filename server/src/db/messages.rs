use rusqlite::{params, Connection};

use super::models::{MessageRecord, UserSummary};
use crate::ids::{ChannelId, MessageId, UserId};

pub fn insert_message(
    conn: &Connection,
    id: MessageId,
    channel_id: ChannelId,
    author_id: UserId,
    content: &str,
    timestamp: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO messages (id, channel_id, author_id, content, timestamp, edited_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        params![id as i64, channel_id as i64, author_id as i64, content, timestamp],
    )?;
    Ok(())
}

/// Up to `limit` messages of a channel, newest first, optionally strictly
/// older than `before`.
pub fn history(
    conn: &Connection,
    channel_id: ChannelId,
    before: Option<MessageId>,
    limit: u32,
) -> rusqlite::Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.channel_id, m.content, m.timestamp, m.edited_timestamp,
                u.id, u.username, u.created_at
         FROM messages m
         LEFT JOIN users u ON u.id = m.author_id
         WHERE m.channel_id = ?1 AND (?2 IS NULL OR m.id < ?2)
         ORDER BY m.id DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![channel_id as i64, before.map(|id| id as i64), limit],
        |row| {
            let author_id: Option<i64> = row.get(5)?;
            let author = match author_id {
                Some(id) => Some(UserSummary {
                    id: id as u64,
                    username: row.get(6)?,
                    created_at: row.get(7)?,
                }),
                None => None,
            };
            Ok(MessageRecord {
                id: row.get::<_, i64>(0)? as u64,
                channel_id: row.get::<_, i64>(1)? as u64,
                content: row.get(2)?,
                timestamp: row.get(3)?,
                edited: row.get(4)?,
                author,
            })
        },
    )?;
    rows.collect()
}
