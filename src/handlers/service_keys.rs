//! Service key management HTTP handlers.
//!
//! This module implements the service-key endpoints:
//! - POST /api/v1/service-keys - Create a key (plaintext returned once)
//! - GET /api/v1/service-keys - List keys without hashes
//! - DELETE /api/v1/service-keys/:id - Revoke a key

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::service_key::{CreateServiceKeyRequest, GeneratedServiceKey, ServiceKeyResponse},
    services::service_key_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

/// Create a new service key for the authenticated tenant.
///
/// # Endpoint
///
/// `POST /api/v1/service-keys`
///
/// # Response
///
/// - **Success (201 Created)**: Includes the plaintext key. This is the only
///   response that ever carries it; store it now or regenerate.
/// - **Error (409)**: Tenant already has a service key with this name
pub async fn create_service_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateServiceKeyRequest>,
) -> Result<(StatusCode, Json<GeneratedServiceKey>), AppError> {
    let generated =
        service_key_service::create_service_key(&state.pool, &auth.user_id, &request.name).await?;

    tracing::info!(service_key_id = %generated.id, "service key created");

    Ok((StatusCode::CREATED, Json(generated)))
}

/// List the tenant's service keys, newest first.
///
/// # Endpoint
///
/// `GET /api/v1/service-keys`
pub async fn list_service_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ServiceKeyResponse>>, AppError> {
    let keys = service_key_service::list_service_keys(&state.pool, &auth.user_id).await?;

    Ok(Json(keys))
}

/// Revoke (delete) a service key.
///
/// # Endpoint
///
/// `DELETE /api/v1/service-keys/{id}`
///
/// # Response
///
/// - **Success (200 OK)**: `{"success": true}`
/// - **Error (404)**: Unknown id or another tenant's key
pub async fn revoke_service_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let revoked =
        service_key_service::revoke_service_key(&state.pool, &auth.user_id, key_id).await?;

    if !revoked {
        return Err(AppError::KeyNotFound);
    }

    tracing::info!(service_key_id = %key_id, "service key revoked");

    Ok(Json(json!({ "success": true })))
}
