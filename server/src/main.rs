use std::net::SocketAddr;
use tokio::net::TcpListener;

use noctes_server::auth::password::load_or_generate_pepper;
use noctes_server::config::{generate_config_template, Config};
use noctes_server::state::AppState;
use noctes_server::{db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("noctes_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Noctes server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate the password pepper (256-bit random, stored in data_dir)
    let pepper = load_or_generate_pepper(&config.data_dir)?;

    let app_state = AppState::new(db, pepper, &config);
    let shutdown = app_state.shutdown.clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested, closing WebSocket connections");
        // Every live connection closes with 1001 before the server stops.
        shutdown.cancel();
    })
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
