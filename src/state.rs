//! Shared application state handed to handlers and middleware.

use crate::db::DbPool;

/// State shared across all routes via Axum's `State` extractor.
///
/// Cloning is cheap: the pool is internally reference-counted.
#[derive(Debug, Clone)]
pub struct AppState {
    /// PostgreSQL connection pool
    pub pool: DbPool,

    /// Upper bound on exponential error backoff, from configuration
    pub backoff_cap_seconds: i64,
}
