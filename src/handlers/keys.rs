//! Pooled key HTTP handlers.
//!
//! This module implements the key-related API endpoints:
//! - POST /api/v1/keys - Create new key
//! - GET /api/v1/keys - List all keys for the tenant (secrets omitted)
//! - GET /api/v1/keys/fingerprints - Encryption fingerprints for all keys
//! - GET /api/v1/keys/stats - Aggregated pool health
//! - GET /api/v1/keys/next - Dispense the longest-idle eligible key (FIFO)
//! - GET /api/v1/keys/random - Dispense a uniformly random eligible key
//! - POST /api/v1/keys/report-error - Report a failure, compounding backoff
//! - PATCH /api/v1/keys/:id - Update administrative fields
//! - DELETE /api/v1/keys/:id - Hard-delete a key

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::api_key::{
        ApiKeyResponse, CreateKeyRequest, DispensedKey, KeyFingerprint, KeyStats,
        ReportErrorRequest, SelectKeyQuery, UpdateKeyRequest,
    },
    services::key_service::{self, SelectionStrategy},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

/// Create a new pooled key.
///
/// # Endpoint
///
/// `POST /api/v1/keys`
///
/// # Request Body
///
/// ```json
/// {
///   "name": "openai-main",
///   "encrypted_secret": "gcm:Zm9vYmFy...",
///   "key_type": "openai",
///   "default_cooldown_seconds": 30
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: Returns the created key, secret omitted
/// - **Error (400)**: Validation failure
/// - **Error (409)**: Tenant already has a key with this name
/// - **Error (401)**: Invalid service key
pub async fn create_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<ApiKeyResponse>), AppError> {
    let key = key_service::create_key(&state.pool, &auth.user_id, request).await?;

    tracing::info!(key_id = %key.id, "key created");

    // Convert ApiKey to ApiKeyResponse (removes encrypted_secret)
    Ok((StatusCode::CREATED, Json(key.into())))
}

/// List all keys for the authenticated tenant.
///
/// # Endpoint
///
/// `GET /api/v1/keys`
///
/// # Response
///
/// - **Success (200 OK)**: Array of keys, newest first, secrets omitted
/// - **Error (401)**: Invalid service key
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    let keys = key_service::list_keys(&state.pool, &auth.user_id).await?;

    // Convert each ApiKey to ApiKeyResponse
    let responses: Vec<ApiKeyResponse> = keys.into_iter().map(Into::into).collect();

    Ok(Json(responses))
}

/// Return (id, fingerprint) pairs for every key of the tenant.
///
/// Used by clients to check that their local encryption key still matches
/// the one every stored secret was encrypted with.
///
/// # Endpoint
///
/// `GET /api/v1/keys/fingerprints`
pub async fn get_fingerprints(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<KeyFingerprint>>, AppError> {
    let fingerprints = key_service::get_fingerprints(&state.pool, &auth.user_id).await?;

    Ok(Json(fingerprints))
}

/// Aggregated pool health for the tenant.
///
/// # Endpoint
///
/// `GET /api/v1/keys/stats`
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<KeyStats>, AppError> {
    let stats = key_service::get_stats(&state.pool, &auth.user_id).await?;

    Ok(Json(stats))
}

/// Dispense the first available key in FIFO order.
///
/// # Endpoint
///
/// `GET /api/v1/keys/next?key_type=openai&cooldown_seconds=60`
///
/// # Response
///
/// - **Success (200 OK)**: `{id, encrypted_secret, key_type}` — the secret
///   is the opaque blob exactly as stored
/// - **Error (503 no_keys_available)**: Every key is resting or disabled;
///   retry later. This is the expected outcome under load, not a fault.
/// - **Error (400)**: cooldown_seconds out of range
pub async fn get_next_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SelectKeyQuery>,
) -> Result<Json<DispensedKey>, AppError> {
    dispense(&state, &auth, SelectionStrategy::Ordered, query).await
}

/// Dispense a uniformly random available key.
///
/// Same contract as `get_next_key`, but the choice among eligible keys is
/// random instead of longest-idle-first.
///
/// # Endpoint
///
/// `GET /api/v1/keys/random?key_type=openai&cooldown_seconds=60`
pub async fn get_random_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SelectKeyQuery>,
) -> Result<Json<DispensedKey>, AppError> {
    dispense(&state, &auth, SelectionStrategy::Random, query).await
}

/// Shared body of the two dispensing endpoints.
async fn dispense(
    state: &AppState,
    auth: &AuthContext,
    strategy: SelectionStrategy,
    query: SelectKeyQuery,
) -> Result<Json<DispensedKey>, AppError> {
    let dispensed = key_service::select_key(
        &state.pool,
        &auth.user_id,
        strategy,
        query.key_type,
        query.cooldown_seconds,
    )
    .await?
    .ok_or(AppError::NoKeysAvailable)?;

    tracing::debug!(key_id = %dispensed.id, ?strategy, "key dispensed");

    Ok(Json(dispensed))
}

/// Report that a dispensed key failed.
///
/// # Endpoint
///
/// `POST /api/v1/keys/report-error`
///
/// # Request Body
///
/// ```json
/// {
///   "key_id": "550e8400-e29b-41d4-a716-446655440000",
///   "error_message": "upstream returned 429"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: `{"success": true}`; the key's backoff doubled
/// - **Error (404)**: Unknown key id — or one owned by another tenant,
///   which is deliberately indistinguishable
pub async fn report_error(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ReportErrorRequest>,
) -> Result<Json<Value>, AppError> {
    let reported = key_service::report_error(
        &state.pool,
        &auth.user_id,
        request.key_id,
        request.error_message,
        state.backoff_cap_seconds,
    )
    .await?;

    if !reported {
        return Err(AppError::KeyNotFound);
    }

    tracing::info!(key_id = %request.key_id, "key error reported");

    Ok(Json(json!({ "success": true })))
}

/// Partially update a key's administrative fields.
///
/// # Endpoint
///
/// `PATCH /api/v1/keys/{id}`
///
/// # Response
///
/// - **Success (200 OK)**: The updated key, secret omitted
/// - **Error (404)**: Key not found or not owned by the tenant
/// - **Error (409)**: Renamed to a name the tenant already uses
pub async fn update_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<Uuid>,
    Json(request): Json<UpdateKeyRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let updated = key_service::update_key(&state.pool, &auth.user_id, key_id, request)
        .await?
        // Return 404 if not found (or cross-tenant)
        .ok_or(AppError::KeyNotFound)?;

    Ok(Json(updated.into()))
}

/// Hard-delete a key.
///
/// # Endpoint
///
/// `DELETE /api/v1/keys/{id}`
///
/// # Response
///
/// - **Success (200 OK)**: `{"success": true}`
/// - **Error (404)**: Already deleted, never existed, or another tenant's —
///   so a second delete of the same id yields 404, making retries harmless
pub async fn delete_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = key_service::delete_key(&state.pool, &auth.user_id, key_id).await?;

    if !deleted {
        return Err(AppError::KeyNotFound);
    }

    tracing::info!(%key_id, "key deleted");

    Ok(Json(json!({ "success": true })))
}
