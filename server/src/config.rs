use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Noctes chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "noctes-server", version, about = "Noctes chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "NOCTES_PORT", default_value = "5080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "NOCTES_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./noctes.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "NOCTES_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, pepper)
    #[arg(long, env = "NOCTES_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds between WebSocket pings
    #[arg(long, env = "NOCTES_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long, env = "NOCTES_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,

    /// Largest inbound WebSocket frame in bytes
    #[arg(long, env = "NOCTES_MAX_FRAME_BYTES", default_value = "4096")]
    pub max_frame_bytes: usize,

    /// Burst size of the per-IP rate limit on auth endpoints
    #[arg(long, env = "NOCTES_AUTH_RATE_LIMIT_BURST", default_value = "5")]
    pub auth_rate_limit_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5080,
            bind_address: "0.0.0.0".to_string(),
            config: "./noctes.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            max_frame_bytes: 4096,
            auth_rate_limit_burst: 5,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (NOCTES_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("NOCTES_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Noctes Server Configuration
# Place this file at ./noctes.toml or specify with --config <path>
# All settings can be overridden via environment variables (NOCTES_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5080)
# port = 5080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and password pepper
# data_dir = "./data"

# ---- WebSocket ----

# Seconds between server pings (default: 30)
# ping_interval_secs = 30

# Seconds to wait for a pong before closing with 1001 (default: 10)
# pong_timeout_secs = 10

# Largest accepted inbound frame in bytes; larger frames close with 1009
# max_frame_bytes = 4096

# ---- Rate limiting ----

# Requests a single IP may burst against /api/auth/* (refills 1 per 12s)
# auth_rate_limit_burst = 5
"#
    .to_string()
}
