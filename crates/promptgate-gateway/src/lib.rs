//! PromptGate gateway — library interface.
//!
//! Re-exports the router builder, shared state, and handlers so that
//! integration tests and other crates can programmatically construct a
//! gateway.

pub mod api;
pub mod auth;
pub mod blocklist;
pub mod config;
pub mod events;
pub mod inspect;
pub mod ml_client;
pub mod rate_limit;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

// Re-export key types for convenience
pub use blocklist::BlocklistGate;
pub use events::EventEmitter;
pub use inspect::AppState;
pub use ml_client::MlFallbackClient;
pub use rate_limit::RateLimiter;

/// Build the axum [`Router`] with all routes.
///
/// `/health` is unauthenticated; every `/v1/*` route sits behind the
/// API-key middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/inspect", post(inspect::inspect_handler))
        .route("/v1/inspect/batch", post(inspect::batch_handler))
        .route("/v1/stats", get(api::stats_handler))
        .route("/v1/events", get(api::events_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(api::health_handler))
        .merge(protected)
        .with_state(state)
}
