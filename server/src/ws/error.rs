use axum::extract::ws::CloseFrame;
use std::error::Error as _;

use crate::db::StoreError;

/// WebSocket close codes used by the connection protocol.
pub mod close_code {
    /// Logged out.
    pub const NORMAL: u16 = 1000;
    /// Server shutdown or pong timeout.
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Token invalid or revoked.
    pub const UNAUTHORIZED: u16 = 4001;
}

/// A close reason may not exceed 123 bytes.
const MAX_REASON_BYTES: usize = 123;

/// Non-fatal command failures, answered in-band with an `error` frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("You need to be logged in.")]
    Unauthenticated,
    #[error("Unknown Channel.")]
    UnknownChannel,
}

impl CommandError {
    pub fn code(&self) -> u16 {
        match self {
            CommandError::Unauthenticated => 401,
            CommandError::UnknownChannel => 404,
        }
    }
}

/// Outcome of one frame's handling, classified once by the read loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("protocol violation ({code}): {reason}")]
    Protocol { code: u16, reason: String },
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("{respond_type} rejected: {source}")]
    Command {
        respond_type: &'static str,
        #[source]
        source: CommandError,
    },
    /// The `auth_error` reply has already been queued.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("transport error: {0}")]
    Transport(axum::Error),
    #[error("connection cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for ConnectionError {
    fn from(e: rusqlite::Error) -> Self {
        ConnectionError::Store(StoreError::Sqlite(e))
    }
}

/// Frames the transport refused for size still get a 1009 close.
impl From<axum::Error> for ConnectionError {
    fn from(e: axum::Error) -> Self {
        let over_capacity = e
            .source()
            .and_then(|source| source.downcast_ref::<tungstenite::Error>())
            .is_some_and(|source| matches!(source, tungstenite::Error::Capacity(_)));
        if over_capacity {
            ConnectionError::too_big()
        } else {
            ConnectionError::Transport(e)
        }
    }
}

impl ConnectionError {
    pub fn too_big() -> Self {
        ConnectionError::Protocol {
            code: close_code::TOO_BIG,
            reason: "Frame too large".into(),
        }
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        ConnectionError::Protocol {
            code: close_code::POLICY_VIOLATION,
            reason: reason.into(),
        }
    }

    pub fn command(respond_type: &'static str, source: CommandError) -> Self {
        ConnectionError::Command {
            respond_type,
            source,
        }
    }

    /// Whether the connection must stop reading after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConnectionError::Command { .. })
    }

    /// The close frame this error maps to. `None` when the transport is
    /// already unusable or the connection stays open.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            ConnectionError::Protocol { code, reason } => (*code, reason.as_str()),
            ConnectionError::InvalidJson => (close_code::POLICY_VIOLATION, "Invalid JSON"),
            ConnectionError::Unauthorized(reason) => (close_code::UNAUTHORIZED, reason.as_str()),
            ConnectionError::Store(_) | ConnectionError::Internal(_) => {
                (close_code::INTERNAL_ERROR, "Internal Server Error")
            }
            ConnectionError::Cancelled => (close_code::GOING_AWAY, "Server shutting down"),
            ConnectionError::Command { .. } | ConnectionError::Transport(_) => return None,
        };
        Some(CloseFrame {
            code,
            reason: truncate_reason(reason).into(),
        })
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
