//! Service key model for authentication.
//!
//! Service keys authenticate programmatic callers making requests to the API.
//! They are stored in the database as SHA-256 hashes for security.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a service key record from the database.
///
/// # Database Table
///
/// Maps to the `service_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `user_id`: Tenant this key belongs to
/// - `name`: Human label, unique per tenant
/// - `key_hash`: SHA-256 hash of the actual key
/// - `key_prefix`: First 12 characters for display
/// - `is_active` / `expires_at`: Validity controls
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceKey {
    /// Unique identifier for this service key
    pub id: Uuid,

    /// Tenant this key authenticates as
    pub user_id: String,

    /// Human-readable name, unique per tenant
    pub name: String,

    /// SHA-256 hash of the actual key (64 hex characters)
    ///
    /// When a request comes in with "Bearer sk_live_abc...", we:
    /// 1. Hash the token with SHA-256
    /// 2. Look up this hash in the database
    /// 3. If found, active and unexpired, authenticate the request
    pub key_hash: String,

    /// First characters of the plaintext key (sk_live_xxxx), display only
    pub key_prefix: String,

    /// Whether this service key is currently valid
    ///
    /// Inactive keys are rejected during authentication. This provides a way
    /// to revoke access without deleting the record.
    pub is_active: bool,

    /// Timestamp of the most recent authenticated request
    pub last_used_at: Option<DateTime<Utc>>,

    /// Timestamp when this key was created
    pub created_at: DateTime<Utc>,

    /// Optional expiration; None means the key never expires
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request body for creating a new service key.
#[derive(Debug, Deserialize)]
pub struct CreateServiceKeyRequest {
    /// Name for the new key (1–100 characters)
    pub name: String,
}

/// Response body for service key creation.
///
/// The `key` field carries the plaintext service key. It is returned exactly
/// once, here; only its hash is stored, so it can never be shown again.
#[derive(Debug, Serialize)]
pub struct GeneratedServiceKey {
    /// Service key unique identifier
    pub id: Uuid,

    /// Key name
    pub name: String,

    /// Plaintext key — shown only in this response
    pub key: String,

    /// Display prefix (sk_live_xxxx)
    pub key_prefix: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Response body for service key listing (hash omitted).
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct ServiceKeyResponse {
    /// Service key unique identifier
    pub id: Uuid,

    /// Key name
    pub name: String,

    /// Display prefix
    pub key_prefix: String,

    /// Whether the key is currently valid
    pub is_active: bool,

    /// Most recent authenticated use
    pub last_used_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Optional expiration
    pub expires_at: Option<DateTime<Utc>>,
}
