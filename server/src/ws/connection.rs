//! Per-connection protocol state machine.
//!
//! A `Connection` starts unauthenticated, may log in exactly once, and then
//! tracks the channels it is subscribed to and whether it is typing in each.
//! Frames are handled one at a time by the actor's read loop; everything the
//! hub may touch concurrently lives in the shared `Session`.

use axum::extract::ws::Message;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::auth::token::decode_token;
use crate::db::models::ChannelSnapshot;
use crate::db::{self, channels, tokens, DbPool};
use crate::hub::events::{Event, Presence};
use crate::hub::registry::encode;
use crate::hub::Hub;
use crate::ids::{ChannelId, UserId};
use crate::ws::error::{CommandError, ConnectionError};
use crate::ws::protocol::{parse_frame, Command};
use crate::ws::{
    lock_session, next_connection_id, ConnectionHandle, ConnectionId, ConnectionSender, Session,
    SharedSession,
};

pub const LOGIN_EXPIRED: &str = "You've been logged out. Please log in and try again.";

enum LoginOutcome {
    Authenticated(Vec<ChannelSnapshot>),
    Revoked,
    /// Cleanup already ran; nothing was subscribed.
    Closed,
}

pub struct Connection {
    id: ConnectionId,
    hub: Arc<Hub>,
    db: DbPool,
    sender: ConnectionSender,
    session: SharedSession,
    max_frame_bytes: usize,
}

impl Connection {
    pub fn new(hub: Arc<Hub>, db: DbPool, sender: ConnectionSender, max_frame_bytes: usize) -> Self {
        Self {
            id: next_connection_id(),
            hub,
            db,
            sender,
            session: Arc::new(Mutex::new(Session::default())),
            max_frame_bytes,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        lock_session(&self.session).user_id
    }

    /// Serialize and enqueue a unicast reply.
    pub fn send<T: Serialize>(&self, payload: &T) {
        if let Some(frame) = encode(payload) {
            self.send_and_forget(frame);
        }
    }

    /// Enqueue a frame; a connection whose writer is gone drops it.
    pub fn send_and_forget(&self, frame: Message) {
        let _ = self.sender.send(frame);
    }

    /// `handle_frame`, abandoned as soon as `cancel` fires. An abandoned
    /// login finishes its store call in the background and, finding the
    /// session closed by cleanup, subscribes nothing.
    pub async fn handle_frame_or_cancel(
        &mut self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = self.handle_frame(payload) => result,
        }
    }

    /// Decode and dispatch one inbound data frame.
    pub async fn handle_frame(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        if payload.len() > self.max_frame_bytes {
            return Err(ConnectionError::too_big());
        }
        let raw = std::str::from_utf8(payload).map_err(|_| ConnectionError::InvalidJson)?;
        match parse_frame(raw)? {
            Command::Login { token } => self.login(&token).await,
            Command::Heartbeat => {
                self.send(&Event::HeartbeatAck {});
                Ok(())
            }
            command @ Command::StartTyping { channel } => {
                self.set_typing(command.kind(), channel, true)
            }
            command @ Command::StopTyping { channel } => {
                self.set_typing(command.kind(), channel, false)
            }
        }
    }

    async fn login(&mut self, raw_token: &str) -> Result<(), ConnectionError> {
        if self.user_id().is_some() {
            return Err(ConnectionError::policy("Already logged in"));
        }
        let token = decode_token(raw_token).map_err(|_| ConnectionError::policy("Invalid token"))?;
        let identity = token.identity();
        let user_id = identity.user_id;

        let handle = ConnectionHandle::new(self.id, user_id, self.sender.clone(), self.session.clone());
        let hub = self.hub.clone();

        // The store connection stays locked from snapshot read through
        // subscription, so no REST change can fall between the two.
        let outcome = db::run(&self.db, move |conn| -> Result<LoginOutcome, ConnectionError> {
            let tx = conn.transaction()?;
            if !tokens::has_user_token(&tx, &identity)? {
                return Ok(LoginOutcome::Revoked);
            }
            let snapshot = channels::memberships_with_members(&tx, user_id)?;

            let mut session = handle.session();
            if session.closed {
                return Ok(LoginOutcome::Closed);
            }
            session.user_id = Some(user_id);
            session.token = Some(identity);

            // Queued ahead of any event the new subscriptions can produce.
            if let Some(ack) = encode(&Event::AuthAck {
                user_id,
                channels: &snapshot,
            }) {
                handle.send(ack);
            }

            let transition = hub.lock_transitions();
            let went_online = hub.users.subscribe(user_id, &handle);
            hub.tokens.subscribe(identity, &handle);
            for entry in &snapshot {
                hub.join(&handle, &mut session, entry.channel.id);
                if went_online {
                    hub.broadcast_presence(entry.channel.id, user_id, Presence::Online);
                }
            }
            drop(transition);
            drop(session);

            tx.commit()?;
            Ok(LoginOutcome::Authenticated(snapshot))
        })
        .await?;

        let snapshot = match outcome {
            LoginOutcome::Authenticated(snapshot) => snapshot,
            LoginOutcome::Revoked => {
                self.send(&Event::AuthError {
                    error: LOGIN_EXPIRED,
                    code: 401,
                });
                return Err(ConnectionError::Unauthorized(LOGIN_EXPIRED.into()));
            }
            LoginOutcome::Closed => return Err(ConnectionError::Cancelled),
        };

        tracing::info!(
            user_id,
            connection_id = self.id,
            channels = snapshot.len(),
            "WebSocket session authenticated"
        );

        let mut seen = HashSet::new();
        for member in snapshot.iter().flat_map(|entry| &entry.members) {
            if member.id != user_id && seen.insert(member.id) {
                self.send(&Event::PushPresence {
                    user: member.id,
                    status: self.hub.presence(member.id),
                });
            }
        }
        Ok(())
    }

    fn set_typing(
        &self,
        respond_type: &'static str,
        channel_id: ChannelId,
        started: bool,
    ) -> Result<(), ConnectionError> {
        let mut session = lock_session(&self.session);
        let Some(user_id) = session.user_id else {
            return Err(ConnectionError::command(respond_type, CommandError::Unauthenticated));
        };
        let Some(subscription) = session.channels.get_mut(&channel_id) else {
            return Err(ConnectionError::command(respond_type, CommandError::UnknownChannel));
        };
        subscription.is_typing = started;
        self.hub.broadcast_typing(channel_id, user_id, started);
        Ok(())
    }

    /// Act on a handler error: reply in-band for command errors, otherwise
    /// log and queue the matching close frame.
    pub fn report(&self, err: &ConnectionError) {
        match err {
            ConnectionError::Command {
                respond_type,
                source,
            } => {
                self.send(&Event::Error {
                    respond_type: *respond_type,
                    error: &source.to_string(),
                    code: source.code(),
                });
                return;
            }
            ConnectionError::Store(e) => {
                tracing::error!(connection_id = self.id, error = %e, "Store failure on WebSocket connection");
            }
            ConnectionError::Internal(e) => {
                tracing::error!(connection_id = self.id, error = %e, "Internal WebSocket error");
            }
            ConnectionError::Transport(e) => {
                tracing::debug!(connection_id = self.id, error = %e, "WebSocket transport error");
            }
            other => {
                tracing::info!(connection_id = self.id, reason = %other, "Closing WebSocket connection");
            }
        }
        if let Some(frame) = err.close_frame() {
            self.send_and_forget(Message::Close(Some(frame)));
        }
    }

    /// Leave every registry. Safe to call more than once.
    pub fn cleanup(&self) {
        let (user_id, token, subscriptions) = {
            let mut session = lock_session(&self.session);
            if session.closed {
                return;
            }
            session.closed = true;
            (
                session.user_id,
                session.token.take(),
                std::mem::take(&mut session.channels),
            )
        };
        let Some(user_id) = user_id else {
            return;
        };

        // A concurrent login of the same user either sees this session
        // still online or announces itself after the offline broadcast.
        let transition = self.hub.lock_transitions();
        let went_offline = self.hub.users.unsubscribe(&user_id, self.id);
        if let Some(token) = token {
            self.hub.tokens.unsubscribe(&token, self.id);
        }
        for subscription in subscriptions.values() {
            self.hub.channels.unsubscribe(&subscription.channel_id, self.id);
            if subscription.is_typing {
                self.hub.broadcast_typing(subscription.channel_id, user_id, false);
            }
            if went_offline {
                self.hub
                    .broadcast_presence(subscription.channel_id, user_id, Presence::Offline);
            }
        }
        drop(transition);

        tracing::debug!(
            user_id,
            connection_id = self.id,
            went_offline,
            "WebSocket session cleaned up"
        );
    }
}
