//! Key rotation service - Core logic for dispensing pooled keys.
//!
//! This service handles:
//! - Atomic key selection under concurrent load
//! - Cooldown accounting on every dispense
//! - Exponential backoff on reported errors
//! - Tenant-scoped CRUD and statistics
//!
//! # Atomicity Guarantees
//!
//! Selection and dispense happen in a single UPDATE statement, and error
//! reporting inside an explicit PostgreSQL transaction. The database ensures
//! all-or-nothing execution; there is no in-process locking anywhere.
//!
//! # Contention Policy
//!
//! The candidate row is locked with `FOR UPDATE SKIP LOCKED`: a row already
//! claimed by a concurrent caller is treated as ineligible and the next
//! candidate is considered instead. Selection therefore never blocks on a
//! contended row, and two concurrent callers can never dispense the same key
//! within one cooldown window.

use crate::{
    db::DbPool,
    error::AppError,
    models::api_key::{
        ApiKey, CreateKeyRequest, DispensedKey, KeyFingerprint, KeyStats, MAX_COOLDOWN_SECONDS,
        MAX_ERROR_MESSAGE_LEN, UpdateKeyRequest,
    },
    services::backoff::backoff_delay_seconds,
};
use uuid::Uuid;

/// How the selection algorithm picks among eligible keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// FIFO: the key with the smallest `available_at` (ties by id) wins,
    /// so the longest-idle key is reused first and load spreads evenly.
    Ordered,

    /// Uniform random choice among eligible keys, avoiding convergence on
    /// a single key under bursty concurrent traffic.
    Random,
}

/// All columns of `api_keys`, in declaration order, for query_as mapping.
const API_KEY_COLUMNS: &str = "id, user_id, name, encrypted_secret, key_type, secret_fingerprint, \
     default_cooldown_seconds, is_active, available_at, last_used_at, use_count, \
     error_count, consecutive_errors, last_error_at, last_error_message, \
     created_at, updated_at";

/// Select one eligible key and move it into cooldown, atomically.
///
/// # Process
///
/// 1. A CTE picks the best candidate among this tenant's keys that are
///    active, past their `available_at`, and match the optional type filter
/// 2. The candidate row is locked with `FOR UPDATE SKIP LOCKED`, so rows
///    claimed by concurrent callers are skipped rather than waited on
/// 3. The same statement stamps the dispense: `available_at` moves forward
///    by the effective cooldown, `last_used_at` and `use_count` are updated,
///    and `consecutive_errors` resets to 0
///
/// Because this is one statement, there is no window in which another caller
/// can observe the key as eligible between read and write.
///
/// # Arguments
///
/// * `user_id` - Authenticated tenant; only this tenant's keys are considered
/// * `strategy` - Ordered (FIFO) or Random choice among eligible keys
/// * `type_filter` - If given, only keys with exactly this `key_type`
/// * `cooldown_override` - Cooldown to apply instead of the key's default
///
/// # Returns
///
/// `Ok(None)` when no key is currently eligible. This is an expected,
/// frequent outcome (every key may be resting), not a fault; the handler
/// maps it to 503 so callers can retry.
pub async fn select_key(
    pool: &DbPool,
    user_id: &str,
    strategy: SelectionStrategy,
    type_filter: Option<String>,
    cooldown_override: Option<i32>,
) -> Result<Option<DispensedKey>, AppError> {
    // Validate the override before touching the store
    if let Some(cooldown) = cooldown_override {
        if !(1..=MAX_COOLDOWN_SECONDS).contains(&cooldown) {
            return Err(AppError::InvalidRequest(format!(
                "cooldown_seconds must be between 1 and {MAX_COOLDOWN_SECONDS}"
            )));
        }
    }

    // The two strategies differ only in candidate ordering
    let order_by = match strategy {
        SelectionStrategy::Ordered => "available_at ASC, id ASC",
        SelectionStrategy::Random => "random()",
    };

    let sql = format!(
        r#"
        WITH candidate AS (
            SELECT id
            FROM api_keys
            WHERE user_id = $1
              AND is_active = TRUE
              AND available_at <= NOW()
              AND ($2::text IS NULL OR key_type = $2)
            ORDER BY {order_by}
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE api_keys AS k
        SET available_at = NOW() + make_interval(
                secs => COALESCE($3::int, k.default_cooldown_seconds)::double precision),
            last_used_at = NOW(),
            use_count = k.use_count + 1,
            consecutive_errors = 0,
            updated_at = NOW()
        FROM candidate
        WHERE k.id = candidate.id
        RETURNING k.id, k.encrypted_secret, k.key_type
        "#
    );

    // No explicit transaction needed: a single statement is atomic on its own
    let dispensed = sqlx::query_as::<_, DispensedKey>(&sql)
        .bind(user_id)
        .bind(type_filter)
        .bind(cooldown_override)
        .fetch_optional(pool)
        .await?;

    Ok(dispensed)
}

/// Report that a previously dispensed key failed, compounding its backoff.
///
/// # Process
///
/// 1. Start database transaction
/// 2. Lock the key row with `FOR UPDATE`, scoped by tenant — a key id owned
///    by a different tenant simply does not match, so cross-tenant reports
///    return `false` without leaking whether the id exists
/// 3. Compute the new backoff from the incremented consecutive error count
/// 4. Stamp the error fields and push `available_at` forward
/// 5. Commit (or rollback on error)
///
/// Deliberately not idempotent: reporting the same failure twice doubles the
/// rest interval again. `use_count` is never touched here.
///
/// # Returns
///
/// `true` if a key was updated, `false` if no key matched (unknown id or
/// another tenant's key). Nothing is mutated in the `false` case.
pub async fn report_error(
    pool: &DbPool,
    user_id: &str,
    key_id: Uuid,
    error_message: Option<String>,
    backoff_cap_seconds: i64,
) -> Result<bool, AppError> {
    // Start database transaction
    let mut tx = pool.begin().await?;

    // Lock the key and read the counters that drive the backoff.
    // FOR UPDATE ensures a concurrent report or dispense serializes after us.
    let row: Option<(i32, i32)> = sqlx::query_as(
        "SELECT consecutive_errors, default_cooldown_seconds
         FROM api_keys
         WHERE id = $1 AND user_id = $2
         FOR UPDATE",
    )
    .bind(key_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((consecutive_errors, default_cooldown_seconds)) = row else {
        tx.rollback().await?;
        return Ok(false);
    };

    // This report makes one more consecutive error
    let new_consecutive = consecutive_errors.saturating_add(1);
    let delay_seconds =
        backoff_delay_seconds(new_consecutive, default_cooldown_seconds, backoff_cap_seconds);

    sqlx::query(
        r#"
        UPDATE api_keys
        SET error_count = error_count + 1,
            consecutive_errors = $1,
            last_error_at = NOW(),
            last_error_message = $2,
            available_at = NOW() + make_interval(secs => $3::double precision),
            updated_at = NOW()
        WHERE id = $4
        "#,
    )
    .bind(new_consecutive)
    .bind(error_message.map(|m| truncate_error_message(&m)))
    .bind(delay_seconds as f64)
    .bind(key_id)
    .execute(&mut *tx)
    .await?;

    // Commit all changes atomically
    tx.commit().await?;

    Ok(true)
}

/// Create a new pooled key for a tenant.
///
/// The encrypted secret arrives already encrypted by the client and is
/// stored verbatim. The new key starts immediately available with all
/// counters at zero.
///
/// # Errors
///
/// - `InvalidRequest`: name/secret/type/cooldown out of bounds
/// - `DuplicateKeyName`: the tenant already has a key with this name
/// - `Database`: database error occurred
pub async fn create_key(
    pool: &DbPool,
    user_id: &str,
    request: CreateKeyRequest,
) -> Result<ApiKey, AppError> {
    validate_name(&request.name)?;
    validate_key_type(request.key_type.as_deref())?;
    validate_cooldown(request.default_cooldown_seconds)?;

    if request.encrypted_secret.is_empty() {
        return Err(AppError::InvalidRequest(
            "encrypted_secret must not be empty".to_string(),
        ));
    }

    let sql = format!(
        r#"
        INSERT INTO api_keys
            (user_id, name, encrypted_secret, key_type, secret_fingerprint,
             default_cooldown_seconds)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {API_KEY_COLUMNS}
        "#
    );

    let key = sqlx::query_as::<_, ApiKey>(&sql)
        .bind(user_id)
        .bind(&request.name)
        .bind(&request.encrypted_secret)
        .bind(&request.key_type)
        .bind(&request.secret_fingerprint)
        .bind(request.default_cooldown_seconds)
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "api_keys_user_id_name_key"))?;

    Ok(key)
}

/// List all keys for a tenant, newest first.
///
/// The caller is expected to strip the encrypted secret before serializing;
/// `ApiKeyResponse::from` does exactly that.
pub async fn list_keys(pool: &DbPool, user_id: &str) -> Result<Vec<ApiKey>, AppError> {
    let sql = format!(
        "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
    );

    let keys = sqlx::query_as::<_, ApiKey>(&sql)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    Ok(keys)
}

/// Fetch (id, fingerprint) pairs for all of a tenant's keys.
///
/// Lets a client verify its local encryption key still matches what every
/// stored secret was encrypted with, without ever downloading a secret.
pub async fn get_fingerprints(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<KeyFingerprint>, AppError> {
    let fingerprints = sqlx::query_as::<_, KeyFingerprint>(
        "SELECT id, secret_fingerprint
         FROM api_keys
         WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(fingerprints)
}

/// Partially update a key's administrative fields.
///
/// Absent fields keep their current value. The secret, the counters and the
/// cooldown state are not reachable through this operation.
///
/// # Returns
///
/// `Ok(None)` if no key matched the (id, tenant) pair.
pub async fn update_key(
    pool: &DbPool,
    user_id: &str,
    key_id: Uuid,
    request: UpdateKeyRequest,
) -> Result<Option<ApiKey>, AppError> {
    if let Some(ref name) = request.name {
        validate_name(name)?;
    }
    validate_key_type(request.key_type.as_deref())?;
    if let Some(cooldown) = request.default_cooldown_seconds {
        validate_cooldown(cooldown)?;
    }

    let sql = format!(
        r#"
        UPDATE api_keys
        SET name = COALESCE($3, name),
            key_type = COALESCE($4, key_type),
            default_cooldown_seconds = COALESCE($5, default_cooldown_seconds),
            is_active = COALESCE($6, is_active),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING {API_KEY_COLUMNS}
        "#
    );

    let updated = sqlx::query_as::<_, ApiKey>(&sql)
        .bind(key_id)
        .bind(user_id)
        .bind(&request.name)
        .bind(&request.key_type)
        .bind(request.default_cooldown_seconds)
        .bind(request.is_active)
        .fetch_optional(pool)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "api_keys_user_id_name_key"))?;

    Ok(updated)
}

/// Hard-delete a key.
///
/// # Returns
///
/// `true` if a row was deleted. A second call with the same id returns
/// `false`, as does an id belonging to another tenant.
pub async fn delete_key(pool: &DbPool, user_id: &str, key_id: Uuid) -> Result<bool, AppError> {
    let deleted = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
        .bind(key_id)
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(deleted > 0)
}

/// Aggregate pool health for a tenant in one read-only query.
///
/// Advisory by design: no locks are taken, so the numbers are a consistent
/// point-in-time snapshot that may be stale by the time the caller reads it.
pub async fn get_stats(pool: &DbPool, user_id: &str) -> Result<KeyStats, AppError> {
    let stats = sqlx::query_as::<_, KeyStats>(
        r#"
        SELECT COUNT(*) AS total_keys,
               COUNT(*) FILTER (WHERE is_active) AS active_keys,
               COUNT(*) FILTER (WHERE is_active AND available_at <= NOW()) AS available_now,
               COALESCE(SUM(use_count), 0)::bigint AS total_uses,
               COALESCE(SUM(error_count), 0)::bigint AS total_errors
        FROM api_keys
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

/// Cap a reported error message at its stored length, on a char boundary.
fn truncate_error_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

/// Name must be 1–100 characters.
fn validate_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::InvalidRequest(
            "name must be between 1 and 100 characters".to_string(),
        ));
    }
    Ok(())
}

/// Key type, when present, must be at most 50 characters.
fn validate_key_type(key_type: Option<&str>) -> Result<(), AppError> {
    if let Some(kt) = key_type {
        if kt.chars().count() > 50 {
            return Err(AppError::InvalidRequest(
                "key_type must be at most 50 characters".to_string(),
            ));
        }
    }
    Ok(())
}

/// Cooldowns must fall in 1..=14400 seconds.
fn validate_cooldown(cooldown: i32) -> Result<(), AppError> {
    if !(1..=MAX_COOLDOWN_SECONDS).contains(&cooldown) {
        return Err(AppError::InvalidRequest(format!(
            "cooldown must be between 1 and {MAX_COOLDOWN_SECONDS} seconds"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_truncated_to_the_stored_cap() {
        let long = "x".repeat(2 * MAX_ERROR_MESSAGE_LEN);
        assert_eq!(truncate_error_message(&long).len(), MAX_ERROR_MESSAGE_LEN);

        let short = "upstream returned 429";
        assert_eq!(truncate_error_message(short), short);
    }

    #[test]
    fn truncation_respects_multibyte_characters() {
        let emoji = "🔑".repeat(MAX_ERROR_MESSAGE_LEN + 10);
        let truncated = truncate_error_message(&emoji);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn name_bounds_are_enforced() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"a".repeat(100)).is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn cooldown_bounds_are_enforced() {
        assert!(validate_cooldown(1).is_ok());
        assert!(validate_cooldown(MAX_COOLDOWN_SECONDS).is_ok());
        assert!(validate_cooldown(0).is_err());
        assert!(validate_cooldown(MAX_COOLDOWN_SECONDS + 1).is_err());
    }
}
