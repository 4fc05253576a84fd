//! The process-wide fan-out hub.
//!
//! Three registries map user ids, token identities and channel ids to the
//! live connections interested in them. REST handlers call the `announce_*`,
//! `push_*` and `delete_*` helpers after committing a change; connections
//! subscribe themselves on login and leave everything on cleanup.

pub mod events;
pub mod registry;

use axum::extract::ws::Message;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::auth::token::TokenIdentity;
use crate::db::models::{ChannelRecord, MessageRecord, UserSummary};
use crate::ids::{ChannelId, UserId};
use crate::ws::{ChannelSubscription, ConnectionHandle, Session};
use events::{Event, Presence};
use registry::{encode, TopicRegistry};

pub const LOGGED_OUT: &str = "You've been logged out.";

#[derive(Default)]
pub struct Hub {
    pub users: TopicRegistry<UserId>,
    pub tokens: TopicRegistry<TokenIdentity>,
    pub channels: TopicRegistry<ChannelId>,
    /// Held across a user's online/offline transition and its broadcast.
    transitions: Mutex<()>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock order: store, then session, then this, then subscriber sets.
    pub(crate) fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn presence(&self, user_id: UserId) -> Presence {
        if self.users.contains(&user_id) {
            Presence::Online
        } else {
            Presence::Offline
        }
    }

    /// Record `channel_id` in the session and subscribe the handle to it.
    /// The caller holds the session lock.
    pub(crate) fn join(&self, handle: &ConnectionHandle, session: &mut Session, channel_id: ChannelId) {
        session
            .channels
            .entry(channel_id)
            .or_insert(ChannelSubscription {
                channel_id,
                is_typing: false,
            });
        self.channels.subscribe(channel_id, handle);
    }

    /// Tell the rest of a channel that `user_id` came online or went offline.
    pub fn broadcast_presence(&self, channel_id: ChannelId, user_id: UserId, status: Presence) -> usize {
        self.channels.broadcast_excluding(
            &channel_id,
            &Event::PushPresence {
                user: user_id,
                status,
            },
            user_id,
        )
    }

    pub fn broadcast_typing(&self, channel_id: ChannelId, member: UserId, started: bool) -> usize {
        self.channels
            .broadcast(&channel_id, &Event::typing(started, member, channel_id))
    }

    /// `push_presence` frames for every online member other than `user_id`.
    fn presence_frames(&self, user_id: UserId, members: &[UserSummary]) -> Vec<Message> {
        members
            .iter()
            .filter(|member| member.id != user_id && self.users.contains(&member.id))
            .filter_map(|member| {
                encode(&Event::PushPresence {
                    user: member.id,
                    status: Presence::Online,
                })
            })
            .collect()
    }

    /// Push a new channel to each handle and subscribe it. Returns how many
    /// handles joined.
    fn deliver_channel(
        &self,
        user_id: UserId,
        handles: &[ConnectionHandle],
        channel: &ChannelRecord,
        members: &[UserSummary],
    ) -> usize {
        let Some(frame) = encode(&Event::PushChannel { channel, members }) else {
            return 0;
        };
        let presence = self.presence_frames(user_id, members);

        let mut joined = 0;
        for handle in handles {
            let mut session = handle.session();
            if session.closed {
                continue;
            }
            handle.send(frame.clone());
            for frame in &presence {
                handle.send(frame.clone());
            }
            self.join(handle, &mut session, channel.id);
            joined += 1;
        }
        joined
    }

    /// Deliver a channel `user_id` was just added to on every live session of
    /// that user, then announce the user as online to the other members.
    pub fn announce_channel(&self, user_id: UserId, channel: &ChannelRecord, members: &[UserSummary]) {
        let handles = self.users.members(&user_id);
        if handles.is_empty() {
            return;
        }
        if self.deliver_channel(user_id, &handles, channel, members) > 0 {
            self.broadcast_presence(channel.id, user_id, Presence::Online);
        }
    }

    /// `announce_channel` for many recipients at once. The member list is
    /// only fetched, once, if some recipient is online.
    pub fn announce_channel_bulk<F, E>(
        &self,
        recipients: &[UserId],
        channel: &ChannelRecord,
        fetch_members: F,
    ) -> Result<(), E>
    where
        F: FnOnce() -> Result<Vec<UserSummary>, E>,
    {
        let online: Vec<(UserId, Vec<ConnectionHandle>)> = recipients
            .iter()
            .filter_map(|&user_id| {
                let handles = self.users.members(&user_id);
                (!handles.is_empty()).then_some((user_id, handles))
            })
            .collect();
        if online.is_empty() {
            return Ok(());
        }

        let members = fetch_members()?;
        for (user_id, handles) in online {
            if self.deliver_channel(user_id, &handles, channel, &members) > 0 {
                self.broadcast_presence(channel.id, user_id, Presence::Online);
            }
        }
        Ok(())
    }

    /// Drop every subscription to a deleted channel and tell its sessions.
    pub fn delete_channel(&self, channel_id: ChannelId) {
        let handles = self.channels.take(&channel_id);
        if handles.is_empty() {
            return;
        }
        let Some(frame) = encode(&Event::DeleteChannel {
            channel: channel_id,
        }) else {
            return;
        };
        for handle in handles {
            handle.session().channels.remove(&channel_id);
            handle.send(frame.clone());
        }
        tracing::debug!(channel_id, "Channel subscriptions dropped");
    }

    /// Remove a channel from every session of one user.
    pub fn leave_channel(&self, user_id: UserId, channel_id: ChannelId) {
        let handles = self.users.members(&user_id);
        if handles.is_empty() {
            return;
        }
        let Some(frame) = encode(&Event::DeleteChannel {
            channel: channel_id,
        }) else {
            return;
        };
        for handle in handles {
            let mut session = handle.session();
            let subscription = session.channels.remove(&channel_id);
            self.channels.unsubscribe(&channel_id, handle.id());
            if subscription.is_some_and(|s| s.is_typing) {
                self.broadcast_typing(channel_id, user_id, false);
            }
            drop(session);
            handle.send(frame.clone());
        }
    }

    pub fn push_message(&self, message: &MessageRecord) -> usize {
        self.channels.broadcast(
            &message.channel_id,
            &Event::PushMessage {
                channel: message.channel_id,
                message,
            },
        )
    }

    pub fn update_channel(&self, channel: &ChannelRecord) -> usize {
        self.channels
            .broadcast(&channel.id, &Event::UpdateChannel { channel })
    }

    pub fn push_channel_member(&self, channel_id: ChannelId, member: &UserSummary) -> usize {
        self.channels.broadcast(
            &channel_id,
            &Event::PushChannelMember {
                channel: channel_id,
                member,
            },
        )
    }

    pub fn remove_channel_member(&self, channel_id: ChannelId, member: UserId) -> usize {
        self.channels.broadcast(
            &channel_id,
            &Event::DeleteChannelMember {
                channel: channel_id,
                member,
            },
        )
    }

    /// Close every session authenticated with a revoked token.
    pub fn revoke_token(&self, identity: &TokenIdentity) -> usize {
        self.tokens.close_and_broadcast(
            identity,
            &Event::AuthError {
                error: LOGGED_OUT,
                code: 401,
            },
            1000,
            LOGGED_OUT,
        )
    }
}
