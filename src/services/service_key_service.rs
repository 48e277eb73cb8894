//! Service key management - issuing and revoking authentication keys.
//!
//! A service key is the bearer credential programmatic callers present to
//! every `/api/v1` endpoint. The plaintext key is generated here, returned
//! exactly once, and only its SHA-256 hash is stored.

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::hash_service_key,
    models::service_key::{GeneratedServiceKey, ServiceKey, ServiceKeyResponse},
};
use rand::RngCore;
use uuid::Uuid;

/// Number of random bytes in a generated key (32 hex characters).
const KEY_RANDOM_BYTES: usize = 16;

/// Display prefix length: "sk_live_" plus the first four hex characters.
const KEY_PREFIX_LEN: usize = 12;

/// Generate a cryptographically secure service key.
///
/// Format: `sk_live_{32 random hex chars}`.
fn generate_service_key() -> String {
    let mut random = [0u8; KEY_RANDOM_BYTES];
    rand::rng().fill_bytes(&mut random);
    format!("sk_live_{}", hex::encode(random))
}

/// Create a new service key for a tenant.
///
/// # Process
///
/// 1. Generate the plaintext key from OS randomness
/// 2. Hash it with SHA-256 for storage
/// 3. Insert hash + display prefix; the plaintext is never persisted
///
/// # Returns
///
/// The generated key including its plaintext — the only time it is visible.
///
/// # Errors
///
/// - `InvalidRequest`: name out of bounds
/// - `DuplicateKeyName`: the tenant already has a service key with this name
pub async fn create_service_key(
    pool: &DbPool,
    user_id: &str,
    name: &str,
) -> Result<GeneratedServiceKey, AppError> {
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::InvalidRequest(
            "name must be between 1 and 100 characters".to_string(),
        ));
    }

    let key = generate_service_key();
    let key_hash = hash_service_key(&key);
    let key_prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();

    let created = sqlx::query_as::<_, ServiceKey>(
        r#"
        INSERT INTO service_keys (user_id, name, key_hash, key_prefix)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, name, key_hash, key_prefix, is_active,
                  last_used_at, created_at, expires_at
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(&key_hash)
    .bind(&key_prefix)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_unique_violation(e, "service_keys_user_id_name_key"))?;

    Ok(GeneratedServiceKey {
        id: created.id,
        name: created.name,
        // Only returned at creation - not stored
        key,
        key_prefix,
        created_at: created.created_at,
    })
}

/// List all service keys for a tenant, newest first, without hashes.
pub async fn list_service_keys(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<ServiceKeyResponse>, AppError> {
    let keys = sqlx::query_as::<_, ServiceKeyResponse>(
        "SELECT id, name, key_prefix, is_active, last_used_at, created_at, expires_at
         FROM service_keys
         WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(keys)
}

/// Revoke (delete) a service key.
///
/// # Returns
///
/// `true` if a row was deleted; `false` for an unknown id or a key belonging
/// to another tenant.
pub async fn revoke_service_key(
    pool: &DbPool,
    user_id: &str,
    key_id: Uuid,
) -> Result<bool, AppError> {
    let deleted = sqlx::query("DELETE FROM service_keys WHERE id = $1 AND user_id = $2")
        .bind(key_id)
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_the_documented_format() {
        let key = generate_service_key();
        assert!(key.starts_with("sk_live_"));
        assert_eq!(key.len(), "sk_live_".len() + 2 * KEY_RANDOM_BYTES);
        assert!(key["sk_live_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_service_key(), generate_service_key());
    }

    #[test]
    fn prefix_is_a_prefix_of_the_key() {
        let key = generate_service_key();
        let prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();
        assert!(key.starts_with(&prefix));
        assert_eq!(prefix.len(), KEY_PREFIX_LEN);
    }
}
