//! Service key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the service key from the Authorization header
//! 2. Hash it and verify it exists in the database
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{error::AppError, models::service_key::ServiceKey, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know which tenant made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant the request is acting on behalf of
    ///
    /// Used to filter every database query; this is the multi-tenancy
    /// boundary, so no handler ever accepts a user id from the client.
    pub user_id: String,

    /// ID of the service key that authenticated this request
    pub service_key_id: Uuid,
}

/// Hash a service key token with SHA-256 to its stored hex form.
pub fn hash_service_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Service key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Match an active, unexpired row in `service_keys` and stamp its
///    `last_used_at` in the same statement
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
///
/// # Headers
///
/// Expected header format:
/// ```text
/// Authorization: Bearer sk_live_abc123...
/// ```
///
/// # Returns
///
/// - `Ok(Response)` if authenticated successfully (calls next handler)
/// - `Err(AppError::InvalidServiceKey)` if authentication fails (returns 401)
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Step 1: Extract Authorization header
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidServiceKey)?;

    // Step 2: Extract Bearer token
    // Expected format: "Bearer <service_key>"
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidServiceKey)?;

    // Step 3: Hash the service key using SHA-256
    let key_hash = hash_service_key(token);

    // Step 4: Lookup hashed key and touch last_used_at in one round trip.
    // Expired and revoked keys fail the WHERE clause and fall through to 401.
    let service_key = sqlx::query_as::<_, ServiceKey>(
        r#"
        UPDATE service_keys
        SET last_used_at = NOW()
        WHERE key_hash = $1
          AND is_active = TRUE
          AND (expires_at IS NULL OR expires_at > NOW())
        RETURNING id, user_id, name, key_hash, key_prefix, is_active,
                  last_used_at, created_at, expires_at
        "#,
    )
    .bind(&key_hash)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::InvalidServiceKey)?;

    // Step 5: Create authentication context
    let auth_context = AuthContext {
        user_id: service_key.user_id,
        service_key_id: service_key.id,
    };

    // Step 6: Inject context into request extensions
    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(auth_context);

    // Step 7: Call the next middleware/handler
    Ok(next.run(request).await)
}
