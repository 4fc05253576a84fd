pub mod actor;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::auth::token::TokenIdentity;
use crate::ids::{ChannelId, UserId};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Process-unique id of one WebSocket connection.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSubscription {
    pub channel_id: ChannelId,
    pub is_typing: bool,
}

/// Mutable per-connection state shared between the connection's own loop
/// and the hub.
///
/// Lock order: a session lock may be held while taking a subscriber-set
/// lock, never the reverse.
#[derive(Debug, Default)]
pub struct Session {
    pub user_id: Option<UserId>,
    pub token: Option<TokenIdentity>,
    pub channels: HashMap<ChannelId, ChannelSubscription>,
    /// Set once by cleanup; nothing subscribes a closed session again.
    pub closed: bool,
}

pub type SharedSession = Arc<Mutex<Session>>;

pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the registries store for an authenticated connection: its id, the
/// user it is logged in as, its outbound queue and its session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    sender: ConnectionSender,
    session: SharedSession,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        sender: ConnectionSender,
        session: SharedSession,
    ) -> Self {
        Self {
            id,
            user_id,
            sender,
            session,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Enqueue a frame for the writer task. False once the connection is gone.
    pub fn send(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        lock_session(&self.session)
    }
}
