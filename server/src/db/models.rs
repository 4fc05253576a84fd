/// Row types read out of SQLite.
/// Ids are snowflakes and always serialize as decimal strings.
use serde::Serialize;

use crate::ids::{ChannelId, MessageId, UserId};

/// Public view of a user, as embedded in channels, members and messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    #[serde(with = "crate::ids::string")]
    pub id: UserId,
    pub username: String,
    pub created_at: i64,
}

/// The authenticated user's own record.
#[derive(Debug, Clone, Serialize)]
pub struct SelfUser {
    #[serde(with = "crate::ids::string")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub created_at: i64,
}

/// Credentials looked up during password login.
#[derive(Debug, Clone)]
pub struct LoginData {
    pub id: UserId,
    pub password_hash: Vec<u8>,
    pub password_salt: Vec<u8>,
}

/// A channel as seen by one member. `owner` is `None` once the owner's
/// account is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelRecord {
    #[serde(with = "crate::ids::string")]
    pub id: ChannelId,
    pub name: String,
    pub owner: Option<UserSummary>,
    pub member_count: u32,
    pub created_at: i64,
    pub last_accessed: i64,
}

/// A channel together with its full member list, as delivered to a
/// session at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    #[serde(flatten)]
    pub channel: ChannelRecord,
    pub members: Vec<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    #[serde(with = "crate::ids::string")]
    pub id: MessageId,
    #[serde(rename = "channel", with = "crate::ids::string")]
    pub channel_id: ChannelId,
    pub author: Option<UserSummary>,
    pub content: String,
    pub timestamp: i64,
    pub edited: Option<i64>,
}
