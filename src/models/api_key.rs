//! Pooled API key data models and API request/response types.
//!
//! This module defines:
//! - `ApiKey`: Database entity representing one pooled credential
//! - `CreateKeyRequest` / `UpdateKeyRequest`: Request bodies for key management
//! - `ApiKeyResponse`: Response body returned to clients (secret omitted)
//! - `DispensedKey`: Payload returned by the selection endpoints
//! - `KeyStats` / `KeyFingerprint`: Read-only rollup types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum stored length of a reported error message, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Maximum accepted cooldown, in seconds (4 hours).
pub const MAX_COOLDOWN_SECONDS: i32 = 14_400;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table. Each key:
/// - Belongs to one tenant (via `user_id`)
/// - Carries a client-side encrypted secret the server never decodes
/// - Tracks its own cooldown and error-backoff state
///
/// # Secret Storage
///
/// `encrypted_secret` is produced by the client's encryption module and
/// stored verbatim. The server treats it as an opaque string: no decryption,
/// no inspection, no re-encoding. `secret_fingerprint` is an equally opaque
/// tag identifying which encryption key produced the blob.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique identifier for this key
    pub id: Uuid,

    /// Tenant that owns this key
    ///
    /// Supplied by the authentication layer; every query filters by this
    /// column so one tenant can never see or mutate another's keys.
    pub user_id: String,

    /// Human-readable label, unique per tenant
    pub name: String,

    /// Client-side encrypted secret, stored and returned verbatim
    pub encrypted_secret: String,

    /// Optional free-text category used as a selection filter
    pub key_type: Option<String>,

    /// Opaque fingerprint of the encryption key that produced the secret
    ///
    /// NULL for keys created before fingerprinting was added.
    pub secret_fingerprint: Option<String>,

    /// Rest interval applied after each dispense, in seconds
    pub default_cooldown_seconds: i32,

    /// Whether this key participates in selection at all
    ///
    /// Inactive keys are never eligible. This provides a way to pull a key
    /// out of rotation without deleting its history.
    pub is_active: bool,

    /// Earliest instant at which this key may be dispensed again
    pub available_at: DateTime<Utc>,

    /// Timestamp of the most recent dispense
    pub last_used_at: Option<DateTime<Utc>>,

    /// Lifetime number of successful dispenses
    pub use_count: i64,

    /// Lifetime number of reported errors (never reset)
    pub error_count: i64,

    /// Errors reported since the last successful dispense
    ///
    /// Drives exponential backoff; reset to 0 when the key is next dispensed.
    pub consecutive_errors: i32,

    /// Timestamp of the most recent reported error
    pub last_error_at: Option<DateTime<Utc>>,

    /// Most recent reported error message, truncated to 500 characters
    pub last_error_message: Option<String>,

    /// Timestamp when the key was created
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last mutation
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a new pooled key.
///
/// # JSON Example
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
/// # Validation
///
/// - `name`: Required, 1–100 characters
/// - `encrypted_secret`: Required, non-empty (already encrypted by the client)
/// - `key_type`: Optional, at most 50 characters
/// - `secret_fingerprint`: Optional, opaque
/// - `default_cooldown_seconds`: Optional, 1–14400, defaults to 30
#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    /// Label for the new key, unique per tenant
    pub name: String,

    /// Client-side encrypted secret
    pub encrypted_secret: String,

    /// Optional category filter value
    pub key_type: Option<String>,

    /// Optional fingerprint of the encryption key used by the client
    pub secret_fingerprint: Option<String>,

    /// Cooldown in seconds applied after each dispense (defaults to 30)
    #[serde(default = "default_cooldown")]
    pub default_cooldown_seconds: i32,
}

/// Default cooldown when not specified in the create request.
fn default_cooldown() -> i32 {
    30
}

/// Request body for partially updating a key.
///
/// Only the administrative fields can be patched; the encrypted secret and
/// all usage counters are immutable through this endpoint. Absent fields are
/// left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    /// New label (1–100 characters)
    pub name: Option<String>,

    /// New category filter value (at most 50 characters)
    pub key_type: Option<String>,

    /// New default cooldown in seconds (1–14400)
    pub default_cooldown_seconds: Option<i32>,

    /// Enable or disable the key
    pub is_active: Option<bool>,
}

/// Response body for key management endpoints.
///
/// Identical to `ApiKey` minus `encrypted_secret`: the blob is only ever
/// returned by the dispensing endpoints, never by listing or CRUD.
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    /// Key unique identifier
    pub id: Uuid,

    /// Key label
    pub name: String,

    /// Category filter value
    pub key_type: Option<String>,

    /// Encryption key fingerprint
    pub secret_fingerprint: Option<String>,

    /// Default cooldown in seconds
    pub default_cooldown_seconds: i32,

    /// Whether the key participates in selection
    pub is_active: bool,

    /// Earliest next dispense time
    pub available_at: DateTime<Utc>,

    /// Most recent dispense time
    pub last_used_at: Option<DateTime<Utc>>,

    /// Lifetime dispense count
    pub use_count: i64,

    /// Lifetime error count
    pub error_count: i64,

    /// Errors since the last successful dispense
    pub consecutive_errors: i32,

    /// Most recent error time
    pub last_error_at: Option<DateTime<Utc>>,

    /// Most recent error message
    pub last_error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Convert database ApiKey to ApiKeyResponse.
///
/// This transformation removes the internal `user_id` field and, crucially,
/// the `encrypted_secret`.
impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            key_type: key.key_type,
            secret_fingerprint: key.secret_fingerprint,
            default_cooldown_seconds: key.default_cooldown_seconds,
            is_active: key.is_active,
            available_at: key.available_at,
            last_used_at: key.last_used_at,
            use_count: key.use_count,
            error_count: key.error_count,
            consecutive_errors: key.consecutive_errors,
            last_error_at: key.last_error_at,
            last_error_message: key.last_error_message,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Payload handed to a caller by the selection endpoints.
///
/// This is the only place the encrypted secret leaves the server, and it
/// leaves exactly as it was stored.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DispensedKey {
    /// Id of the dispensed key (used later with report-error)
    pub id: Uuid,

    /// Opaque encrypted secret for the caller to decrypt locally
    pub encrypted_secret: String,

    /// Category of the dispensed key, if any
    pub key_type: Option<String>,
}

/// Query parameters accepted by the selection endpoints.
///
/// `GET /api/v1/keys/next?key_type=openai&cooldown_seconds=60`
#[derive(Debug, Deserialize)]
pub struct SelectKeyQuery {
    /// Restrict selection to keys of this category
    pub key_type: Option<String>,

    /// Override the selected key's default cooldown (1–14400 seconds)
    pub cooldown_seconds: Option<i32>,
}

/// Request body for reporting that a dispensed key failed.
#[derive(Debug, Deserialize)]
pub struct ReportErrorRequest {
    /// Id returned by a previous selection call
    pub key_id: Uuid,

    /// Optional description of the failure; stored truncated to 500 chars
    pub error_message: Option<String>,
}

/// Aggregated pool health for one tenant.
///
/// # JSON Example
///
/// ```json
/// {
///   "total_keys": 3,
///   "active_keys": 2,
///   "available_now": 1,
///   "total_uses": 1042,
///   "total_errors": 7
/// }
/// ```
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct KeyStats {
    /// All keys belonging to the tenant
    pub total_keys: i64,

    /// Keys with is_active = true
    pub active_keys: i64,

    /// Active keys whose cooldown has elapsed
    pub available_now: i64,

    /// Sum of use_count across all keys
    pub total_uses: i64,

    /// Sum of error_count across all keys
    pub total_errors: i64,
}

/// Fingerprint entry for one key.
///
/// Returned in bulk so a client can verify that every stored secret was
/// encrypted with the encryption key it currently holds.
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct KeyFingerprint {
    /// Key unique identifier
    pub id: Uuid,

    /// Opaque fingerprint, NULL for legacy keys
    pub secret_fingerprint: Option<String>,
}
