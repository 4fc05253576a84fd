//! Server → client frames. Every frame is a flat JSON object with a `type`
//! discriminator; ids are written as decimal strings.

use serde::Serialize;

use crate::db::models::{ChannelRecord, ChannelSnapshot, MessageRecord, UserSummary};
use crate::ids::{ChannelId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event<'a> {
    AuthAck {
        #[serde(with = "crate::ids::string")]
        user_id: UserId,
        channels: &'a [ChannelSnapshot],
    },
    AuthError {
        error: &'a str,
        code: u16,
    },
    HeartbeatAck {},
    Error {
        respond_type: &'a str,
        error: &'a str,
        code: u16,
    },
    PushChannel {
        channel: &'a ChannelRecord,
        members: &'a [UserSummary],
    },
    UpdateChannel {
        channel: &'a ChannelRecord,
    },
    DeleteChannel {
        #[serde(with = "crate::ids::string")]
        channel: ChannelId,
    },
    PushChannelMember {
        #[serde(with = "crate::ids::string")]
        channel: ChannelId,
        member: &'a UserSummary,
    },
    DeleteChannelMember {
        #[serde(with = "crate::ids::string")]
        channel: ChannelId,
        #[serde(with = "crate::ids::string")]
        member: UserId,
    },
    PushMessage {
        #[serde(with = "crate::ids::string")]
        channel: ChannelId,
        message: &'a MessageRecord,
    },
    PushPresence {
        #[serde(with = "crate::ids::string")]
        user: UserId,
        status: Presence,
    },
    StartTyping {
        #[serde(with = "crate::ids::string")]
        member: UserId,
        #[serde(with = "crate::ids::string")]
        channel: ChannelId,
    },
    StopTyping {
        #[serde(with = "crate::ids::string")]
        member: UserId,
        #[serde(with = "crate::ids::string")]
        channel: ChannelId,
    },
}

impl Event<'_> {
    pub fn typing(started: bool, member: UserId, channel: ChannelId) -> Event<'static> {
        if started {
            Event::StartTyping { member, channel }
        } else {
            Event::StopTyping { member, channel }
        }
    }
}
