//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// This enum represents all possible errors that can occur in the application.
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Invalid or missing service keys
/// - **Resource Errors**: Requested keys not found (including cross-tenant
///   access, which is indistinguishable from non-existence on purpose)
/// - **Pool Exhaustion**: No key currently eligible — an expected, retryable
///   outcome, not a fault
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    ///
    /// This wraps any sqlx::Error using the `#[from]` attribute, which
    /// automatically implements `From<sqlx::Error> for AppError`.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Service key is missing, invalid, inactive, or expired.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid service key")]
    InvalidServiceKey,

    /// Requested key does not exist or doesn't belong to the authenticated
    /// tenant. Cross-tenant access deliberately surfaces as this variant
    /// rather than 403, so key ids cannot be probed for existence.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Key not found")]
    KeyNotFound,

    /// No key in the pool is currently eligible for dispensing.
    ///
    /// This is a normal outcome under load: every key may simply be resting
    /// in its cooldown window. Callers are expected to retry.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("No available keys")]
    NoKeysAvailable,

    /// A key with the requested name already exists for this tenant.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("A key with this name already exists")]
    DuplicateKeyName,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// This implementation allows Axum handlers to return `Result<T, AppError>`
/// and have errors automatically converted to proper HTTP responses.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidServiceKey` → 401 Unauthorized
/// - `KeyNotFound` → 404 Not Found
/// - `NoKeysAvailable` → 503 Service Unavailable
/// - `DuplicateKeyName` → 409 Conflict
/// - `InvalidRequest` → 400 Bad Request
/// - `Database` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Map each error variant to (HTTP status, error code, message)
        let (status, code, message) = match self {
            AppError::InvalidServiceKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_service_key",
                self.to_string(),
            ),
            AppError::KeyNotFound => (StatusCode::NOT_FOUND, "key_not_found", self.to_string()),
            AppError::NoKeysAvailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no_keys_available",
                self.to_string(),
            ),
            AppError::DuplicateKeyName => {
                (StatusCode::CONFLICT, "duplicate_key_name", self.to_string())
            }
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        // Build JSON response body
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        // Return the response with status code and JSON body
        (status, body).into_response()
    }
}

impl AppError {
    /// Map a sqlx error to `DuplicateKeyName` when it is a unique-constraint
    /// violation on the given constraint, otherwise pass it through as a
    /// database error.
    ///
    /// Used by create handlers so that inserting a second key with the same
    /// (tenant, name) pair returns 409 instead of 500.
    pub fn from_unique_violation(err: sqlx::Error, constraint: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.constraint() == Some(constraint) {
                return AppError::DuplicateKeyName;
            }
        }
        AppError::Database(err)
    }
}
