//! Integration tests for the key rotation engine.
//!
//! These tests run against a real PostgreSQL database because the engine's
//! correctness rests on row locking, which cannot be simulated in memory.
//! They are `#[ignore]`d by default; run them with a database available:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/keypool_test cargo test -- --ignored
//! ```
//!
//! Each test works under a freshly generated tenant id, so tests are
//! isolated from each other and can run concurrently against one database.

use chrono::{Duration, Utc};
use keypool::{
    db::{self, DbPool},
    models::api_key::{ApiKey, CreateKeyRequest, UpdateKeyRequest},
    services::key_service::{self, SelectionStrategy},
    services::service_key_service,
};
use uuid::Uuid;

const BACKOFF_CAP: i64 = 14_400;

async fn test_pool() -> DbPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for these tests");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to test database");
    db::run_migrations(&pool).await.expect("migrations failed");
    pool
}

fn fresh_tenant() -> String {
    format!("tenant-{}", Uuid::new_v4())
}

fn key_request(name: &str, cooldown: i32) -> CreateKeyRequest {
    CreateKeyRequest {
        name: name.to_string(),
        encrypted_secret: format!("gcm:{name}-ciphertext"),
        key_type: None,
        secret_fingerprint: None,
        default_cooldown_seconds: cooldown,
    }
}

async fn fetch_key(pool: &DbPool, id: Uuid) -> ApiKey {
    sqlx::query_as::<_, ApiKey>(
        "SELECT id, user_id, name, encrypted_secret, key_type, secret_fingerprint,
                default_cooldown_seconds, is_active, available_at, last_used_at, use_count,
                error_count, consecutive_errors, last_error_at, last_error_message,
                created_at, updated_at
         FROM api_keys WHERE id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("key should exist")
}

/// Shift a key's available_at relative to now, bypassing the service layer.
async fn set_available_at(pool: &DbPool, id: Uuid, offset_seconds: i64) {
    sqlx::query("UPDATE api_keys SET available_at = NOW() + make_interval(secs => $1) WHERE id = $2")
        .bind(offset_seconds as f64)
        .bind(id)
        .execute(pool)
        .await
        .expect("update should succeed");
}

#[tokio::test]
#[ignore]
async fn dispense_applies_cooldown_and_blocks_immediate_reuse() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let key = key_service::create_key(&pool, &tenant, key_request("solo", 30))
        .await
        .unwrap();

    // First call dispenses the key
    let before = Utc::now();
    let dispensed = key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap()
        .expect("one eligible key must be dispensed");
    assert_eq!(dispensed.id, key.id);
    assert_eq!(dispensed.encrypted_secret, "gcm:solo-ciphertext");

    // The key now rests for its default cooldown
    let after = fetch_key(&pool, key.id).await;
    assert_eq!(after.use_count, 1);
    assert_eq!(after.consecutive_errors, 0);
    assert!(after.last_used_at.is_some());
    let expected = before + Duration::seconds(30);
    let drift = (after.available_at - expected).num_seconds().abs();
    assert!(drift <= 2, "available_at should be ~now+30s, drift {drift}s");

    // Immediate second call finds nothing eligible
    let second = key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap();
    assert!(second.is_none(), "key mid-cooldown must not be re-dispensed");
}

#[tokio::test]
#[ignore]
async fn cooldown_override_takes_precedence_over_default() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let key = key_service::create_key(&pool, &tenant, key_request("override", 30))
        .await
        .unwrap();

    let before = Utc::now();
    key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, Some(120))
        .await
        .unwrap()
        .expect("key must be dispensed");

    let after = fetch_key(&pool, key.id).await;
    let expected = before + Duration::seconds(120);
    let drift = (after.available_at - expected).num_seconds().abs();
    assert!(drift <= 2, "override cooldown should apply, drift {drift}s");
}

#[tokio::test]
#[ignore]
async fn ordered_selection_is_fifo_by_available_at() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let a = key_service::create_key(&pool, &tenant, key_request("a", 30))
        .await
        .unwrap();
    let b = key_service::create_key(&pool, &tenant, key_request("b", 30))
        .await
        .unwrap();

    // A has been idle longer than B
    set_available_at(&pool, a.id, -10).await;
    set_available_at(&pool, b.id, -5).await;

    let first = key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap()
        .expect("first dispense");
    let second = key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap()
        .expect("second dispense");

    assert_eq!(first.id, a.id, "longest-idle key is dispensed first");
    assert_eq!(second.id, b.id);
}

#[tokio::test]
#[ignore]
async fn type_filter_restricts_selection() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let mut openai = key_request("openai-key", 30);
    openai.key_type = Some("openai".to_string());
    let openai = key_service::create_key(&pool, &tenant, openai).await.unwrap();

    let mut gemini = key_request("gemini-key", 30);
    gemini.key_type = Some("gemini".to_string());
    key_service::create_key(&pool, &tenant, gemini).await.unwrap();

    let dispensed = key_service::select_key(
        &pool,
        &tenant,
        SelectionStrategy::Ordered,
        Some("openai".to_string()),
        None,
    )
    .await
    .unwrap()
    .expect("a matching key exists");
    assert_eq!(dispensed.id, openai.id);

    // No key carries this type
    let none = key_service::select_key(
        &pool,
        &tenant,
        SelectionStrategy::Random,
        Some("mistral".to_string()),
        None,
    )
    .await
    .unwrap();
    assert!(none.is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn concurrent_callers_never_double_dispense() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    // k = 3 eligible keys, N = 8 simultaneous callers
    for i in 0..3 {
        key_service::create_key(&pool, &tenant, key_request(&format!("k{i}"), 60))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None).await
        }));
    }

    let mut dispensed_ids = Vec::new();
    let mut misses = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Some(key) => dispensed_ids.push(key.id),
            None => misses += 1,
        }
    }

    // Exactly min(k, N) = 3 callers win; the rest see an empty pool
    assert_eq!(dispensed_ids.len(), 3);
    assert_eq!(misses, 5);

    // And no key was handed to two callers
    dispensed_ids.sort();
    dispensed_ids.dedup();
    assert_eq!(dispensed_ids.len(), 3, "each key dispensed at most once");
}

#[tokio::test]
#[ignore]
async fn report_error_compounds_backoff_until_the_cap() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let key = key_service::create_key(&pool, &tenant, key_request("flaky", 30))
        .await
        .unwrap();

    // First report: backoff(1) = 60s > base cooldown of 30s
    let before = Utc::now();
    let ok = key_service::report_error(&pool, &tenant, key.id, Some("429".into()), BACKOFF_CAP)
        .await
        .unwrap();
    assert!(ok);

    let after_one = fetch_key(&pool, key.id).await;
    assert_eq!(after_one.error_count, 1);
    assert_eq!(after_one.consecutive_errors, 1);
    assert_eq!(after_one.last_error_message.as_deref(), Some("429"));
    assert!(after_one.last_error_at.is_some());
    let drift = (after_one.available_at - (before + Duration::seconds(60)))
        .num_seconds()
        .abs();
    assert!(drift <= 2, "first backoff should be ~60s, drift {drift}s");

    // Second report with no intervening success doubles again: 120s
    let before = Utc::now();
    key_service::report_error(&pool, &tenant, key.id, None, BACKOFF_CAP)
        .await
        .unwrap();
    let after_two = fetch_key(&pool, key.id).await;
    assert_eq!(after_two.error_count, 2);
    assert_eq!(after_two.consecutive_errors, 2);
    let drift = (after_two.available_at - (before + Duration::seconds(120)))
        .num_seconds()
        .abs();
    assert!(drift <= 2, "second backoff should be ~120s, drift {drift}s");

    // use_count is never touched by error reports
    assert_eq!(after_two.use_count, 0);
}

#[tokio::test]
#[ignore]
async fn successful_dispense_resets_consecutive_errors() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let key = key_service::create_key(&pool, &tenant, key_request("recovering", 30))
        .await
        .unwrap();

    key_service::report_error(&pool, &tenant, key.id, None, BACKOFF_CAP)
        .await
        .unwrap();
    key_service::report_error(&pool, &tenant, key.id, None, BACKOFF_CAP)
        .await
        .unwrap();

    // Make the key eligible again despite the backoff
    set_available_at(&pool, key.id, -1).await;

    key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap()
        .expect("key is eligible again");

    let after = fetch_key(&pool, key.id).await;
    assert_eq!(after.consecutive_errors, 0, "dispense resets the streak");
    assert_eq!(after.error_count, 2, "lifetime error count is preserved");
}

#[tokio::test]
#[ignore]
async fn cross_tenant_error_report_fails_silently_without_mutation() {
    let pool = test_pool().await;
    let owner = fresh_tenant();
    let intruder = fresh_tenant();

    let key = key_service::create_key(&pool, &owner, key_request("private", 30))
        .await
        .unwrap();

    let reported = key_service::report_error(&pool, &intruder, key.id, Some("x".into()), BACKOFF_CAP)
        .await
        .unwrap();
    assert!(!reported, "foreign key id must look like NotFound");

    let untouched = fetch_key(&pool, key.id).await;
    assert_eq!(untouched.error_count, 0);
    assert_eq!(untouched.consecutive_errors, 0);
    assert!(untouched.last_error_at.is_none());
}

#[tokio::test]
#[ignore]
async fn tenants_never_see_each_others_keys() {
    let pool = test_pool().await;
    let alice = fresh_tenant();
    let bob = fresh_tenant();

    key_service::create_key(&pool, &alice, key_request("alice-key", 30))
        .await
        .unwrap();

    assert!(key_service::list_keys(&pool, &bob).await.unwrap().is_empty());

    let none = key_service::select_key(&pool, &bob, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap();
    assert!(none.is_none(), "another tenant's pool must look empty");
}

#[tokio::test]
#[ignore]
async fn delete_is_idempotent_by_result() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let key = key_service::create_key(&pool, &tenant, key_request("doomed", 30))
        .await
        .unwrap();

    assert!(key_service::delete_key(&pool, &tenant, key.id).await.unwrap());
    assert!(!key_service::delete_key(&pool, &tenant, key.id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn duplicate_name_is_a_conflict_not_a_database_error() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    key_service::create_key(&pool, &tenant, key_request("taken", 30))
        .await
        .unwrap();

    let err = key_service::create_key(&pool, &tenant, key_request("taken", 30))
        .await
        .expect_err("same name for same tenant must conflict");
    assert!(matches!(err, keypool::error::AppError::DuplicateKeyName));

    // A different tenant can reuse the name freely
    let other = fresh_tenant();
    key_service::create_key(&pool, &other, key_request("taken", 30))
        .await
        .expect("names are only unique per tenant");
}

#[tokio::test]
#[ignore]
async fn stats_count_total_active_and_available() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let ready = key_service::create_key(&pool, &tenant, key_request("ready", 30))
        .await
        .unwrap();
    let resting = key_service::create_key(&pool, &tenant, key_request("resting", 30))
        .await
        .unwrap();
    let disabled = key_service::create_key(&pool, &tenant, key_request("disabled", 30))
        .await
        .unwrap();

    // One active key currently on cooldown, one disabled entirely
    set_available_at(&pool, resting.id, 3600).await;
    key_service::update_key(
        &pool,
        &tenant,
        disabled.id,
        UpdateKeyRequest {
            name: None,
            key_type: None,
            default_cooldown_seconds: None,
            is_active: Some(false),
        },
    )
    .await
    .unwrap()
    .expect("key exists");

    let stats = key_service::get_stats(&pool, &tenant).await.unwrap();
    assert_eq!(stats.total_keys, 3);
    assert_eq!(stats.active_keys, 2);
    assert_eq!(stats.available_now, 1);
    assert_eq!(stats.total_uses, 0);
    assert_eq!(stats.total_errors, 0);

    // The one available key is the one we expect
    let dispensed = key_service::select_key(&pool, &tenant, SelectionStrategy::Ordered, None, None)
        .await
        .unwrap()
        .expect("exactly one key is available");
    assert_eq!(dispensed.id, ready.id);
}

#[tokio::test]
#[ignore]
async fn update_patches_only_provided_fields() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let mut request = key_request("patchable", 30);
    request.key_type = Some("openai".to_string());
    let key = key_service::create_key(&pool, &tenant, request).await.unwrap();

    let updated = key_service::update_key(
        &pool,
        &tenant,
        key.id,
        UpdateKeyRequest {
            name: Some("renamed".to_string()),
            key_type: None,
            default_cooldown_seconds: Some(90),
            is_active: None,
        },
    )
    .await
    .unwrap()
    .expect("key exists");

    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.default_cooldown_seconds, 90);
    // Untouched fields survive
    assert_eq!(updated.key_type.as_deref(), Some("openai"));
    assert!(updated.is_active);

    // Cross-tenant update looks like NotFound
    let foreign = key_service::update_key(
        &pool,
        &fresh_tenant(),
        key.id,
        UpdateKeyRequest {
            name: Some("stolen".to_string()),
            key_type: None,
            default_cooldown_seconds: None,
            is_active: None,
        },
    )
    .await
    .unwrap();
    assert!(foreign.is_none());
}

#[tokio::test]
#[ignore]
async fn fingerprints_are_returned_without_secrets() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let mut request = key_request("printed", 30);
    request.secret_fingerprint = Some("fp-v1".to_string());
    let key = key_service::create_key(&pool, &tenant, request).await.unwrap();

    let fingerprints = key_service::get_fingerprints(&pool, &tenant).await.unwrap();
    assert_eq!(fingerprints.len(), 1);
    assert_eq!(fingerprints[0].id, key.id);
    assert_eq!(fingerprints[0].secret_fingerprint.as_deref(), Some("fp-v1"));
}

#[tokio::test]
#[ignore]
async fn service_keys_round_trip_and_revoke() {
    let pool = test_pool().await;
    let tenant = fresh_tenant();

    let generated = service_key_service::create_service_key(&pool, &tenant, "ci")
        .await
        .unwrap();
    assert!(generated.key.starts_with("sk_live_"));
    assert!(generated.key.starts_with(&generated.key_prefix));

    let listed = service_key_service::list_service_keys(&pool, &tenant)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "ci");

    assert!(
        service_key_service::revoke_service_key(&pool, &tenant, generated.id)
            .await
            .unwrap()
    );
    // Second revoke of the same id finds nothing
    assert!(
        !service_key_service::revoke_service_key(&pool, &tenant, generated.id)
            .await
            .unwrap()
    );
}
