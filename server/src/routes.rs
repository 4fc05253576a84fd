use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::api::{auth, channels, error::api_not_found, messages, users};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let mut auth_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout));

    // Rate limiting on auth endpoints, 1 token every 12 seconds per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    if state.auth_rate_limit_burst > 0 {
        match GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12)
            .burst_size(state.auth_rate_limit_burst)
            .finish()
        {
            Some(config) => {
                let config = Arc::new(config);
                let limiter = config.limiter().clone();

                // Spawn background task to clean up rate limiter state
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        limiter.retain_recent();
                    }
                });

                auth_routes = auth_routes.layer(GovernorLayer { config });
            }
            None => tracing::warn!("Invalid auth rate limit, auth routes are not rate limited"),
        }
    }

    let user_routes = Router::new()
        .route("/api/users/@me", get(users::get_self))
        .route("/api/users/{id}", get(users::get_user))
        .route("/api/usernames/{username}", get(users::get_user_by_username));

    let channel_routes = Router::new()
        .route(
            "/api/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route(
            "/api/channels/{id}",
            get(channels::get_channel)
                .patch(channels::update_channel)
                .delete(channels::delete_channel),
        )
        .route(
            "/api/channels/{id}/members/{user_id}",
            put(channels::add_member).delete(channels::remove_member),
        )
        .route(
            "/api/channels/{id}/messages",
            get(messages::get_messages).post(messages::post_message),
        );

    // WebSocket endpoint (auth happens in-band with a login frame)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(user_routes)
        .merge(channel_routes)
        .merge(ws_routes)
        .merge(health)
        .fallback(api_not_found)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

