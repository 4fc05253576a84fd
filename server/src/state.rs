use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::DbPool;
use crate::hub::Hub;
use crate::snowflake::SnowflakeGenerator;

/// WebSocket liveness and framing limits.
#[derive(Debug, Clone, Copy)]
pub struct WsSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl WsSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

impl Default for WsSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live connection registries
    pub hub: Arc<Hub>,
    /// Snowflake ids for users, channels and messages
    pub ids: Arc<SnowflakeGenerator>,
    /// Password pepper (256-bit random key, stored in data_dir)
    pub pepper: Arc<Vec<u8>>,
    /// Cancelled on shutdown; every connection holds a child token
    pub shutdown: CancellationToken,
    pub ws: WsSettings,
    /// Burst size of the per-IP limiter on auth routes
    pub auth_rate_limit_burst: u32,
}

impl AppState {
    pub fn new(db: DbPool, pepper: Vec<u8>, config: &Config) -> Self {
        Self {
            db,
            hub: Arc::new(Hub::new()),
            ids: Arc::new(SnowflakeGenerator::default()),
            pepper: Arc::new(pepper),
            shutdown: CancellationToken::new(),
            ws: WsSettings::from_config(config),
            auth_rate_limit_burst: config.auth_rate_limit_burst,
        }
    }
}
