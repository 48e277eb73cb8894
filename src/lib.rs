//! Keypool - per-tenant API key rotation with cooldowns and error backoff.
//!
//! The library exposes the engine (services, models, store plumbing) so the
//! binary in `main.rs` and the integration tests can share it.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post},
};
use state::AppState;
use tower_http::trace::TraceLayer;

/// Build the application router with all routes and middleware attached.
///
/// Extracted from `main` so integration tests can serve the exact same app
/// against a test database.
pub fn build_router(state: AppState) -> Router {
    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        // Key dispensing routes (static segments win over {id})
        .route("/api/v1/keys/next", get(handlers::keys::get_next_key))
        .route("/api/v1/keys/random", get(handlers::keys::get_random_key))
        .route(
            "/api/v1/keys/report-error",
            post(handlers::keys::report_error),
        )
        // Key management routes
        .route("/api/v1/keys", post(handlers::keys::create_key))
        .route("/api/v1/keys", get(handlers::keys::list_keys))
        .route(
            "/api/v1/keys/fingerprints",
            get(handlers::keys::get_fingerprints),
        )
        .route("/api/v1/keys/stats", get(handlers::keys::get_stats))
        .route("/api/v1/keys/{id}", patch(handlers::keys::update_key))
        .route("/api/v1/keys/{id}", delete(handlers::keys::delete_key))
        // Service key management routes
        .route(
            "/api/v1/service-keys",
            post(handlers::service_keys::create_service_key),
        )
        .route(
            "/api/v1/service-keys",
            get(handlers::service_keys::list_service_keys),
        )
        .route(
            "/api/v1/service-keys/{id}",
            delete(handlers::service_keys::revoke_service_key),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine authenticated routes with public routes
    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        // Merge authenticated routes
        .merge(authenticated_routes)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        // Share state with all handlers via State extraction
        .with_state(state)
}
