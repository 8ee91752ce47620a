// ABOUTME: SQLite store tests over a temp-file database
// ABOUTME: Exercises schema round trips, atomic debits, buckets, and unique constraints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

use chrono::{Duration, TimeZone, Utc};
use keygate::errors::ErrorCode;
use keygate::models::{
    KeyRecord, OutcomeCode, OutcomeCounts, Permission, RateLimitOverride, RateLimitPolicy,
    RefillInterval, RefillPolicy, Role, RollupBucket, RollupPeriod, VerificationLogEntry,
};
use keygate::store::{
    CreditDebit, KeyStore, LogStore, PermissionStore, RateLimitStore, RoleStore, SqliteStore,
};
use uuid::Uuid;

async fn store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("keygate_test.db").display());
    let store = SqliteStore::new(&url).await.unwrap();
    (store, dir)
}

fn sample_key(remaining: Option<i64>) -> KeyRecord {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    KeyRecord {
        key_hash: format!("hash_{id}"),
        id,
        key_prefix: "kg_live_".into(),
        key_hint: "kg_live_abcd...wxyz".into(),
        owner_id: "owner_1".into(),
        namespace: "default".into(),
        name: Some("sample".into()),
        meta: Some(serde_json::json!({ "tier": "pro" })),
        environment: Some("test".into()),
        created_at: now,
        updated_at: now,
        revoked_at: None,
        rotation_grace_end: None,
        expires_at: None,
        enabled: true,
        remaining,
        refill: Some(RefillPolicy {
            amount: 100,
            interval: RefillInterval::Daily,
            last_refill_at: now,
        }),
        ratelimit: Some(RateLimitPolicy {
            limit: 5,
            duration_ms: 60_000,
        }),
        permissions: vec!["things.read".into()],
        roles: vec!["role_1".into()],
        rotated_from: None,
        external_key_id: None,
    }
}

#[tokio::test]
async fn test_key_round_trip() {
    let (store, _dir) = store().await;
    let key = sample_key(Some(10));
    store.insert_key(&key).await.unwrap();

    let loaded = store.find_by_hash(&key.key_hash).await.unwrap().unwrap();
    assert_eq!(loaded.id, key.id);
    assert_eq!(loaded.meta, key.meta);
    assert_eq!(loaded.refill, key.refill);
    assert_eq!(loaded.ratelimit, key.ratelimit);
    assert_eq!(loaded.permissions, key.permissions);
    assert_eq!(loaded.roles, key.roles);
    assert_eq!(loaded.remaining, Some(10));

    let by_id = store.find_by_id(&key.id).await.unwrap().unwrap();
    assert_eq!(by_id.key_hash, key.key_hash);
}

#[tokio::test]
async fn test_duplicate_digest_rejected() {
    let (store, _dir) = store().await;
    let key = sample_key(None);
    store.insert_key(&key).await.unwrap();

    let mut duplicate = sample_key(None);
    duplicate.key_hash.clone_from(&key.key_hash);
    let err = store.insert_key(&duplicate).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceAlreadyExists);
}

#[tokio::test]
async fn test_update_and_delete() {
    let (store, _dir) = store().await;
    let mut key = sample_key(None);
    store.insert_key(&key).await.unwrap();

    key.enabled = false;
    key.name = None;
    store.update_key(&key).await.unwrap();
    let loaded = store.find_by_id(&key.id).await.unwrap().unwrap();
    assert!(!loaded.enabled);
    assert_eq!(loaded.name, None);

    store.delete_by_id(&key.id).await.unwrap();
    assert!(store.find_by_id(&key.id).await.unwrap().is_none());
    assert_eq!(
        store.delete_by_id(&key.id).await.unwrap_err().code,
        ErrorCode::ResourceNotFound
    );
}

#[tokio::test]
async fn test_debit_credits_classification() {
    let (store, _dir) = store().await;

    let unlimited = sample_key(None);
    store.insert_key(&unlimited).await.unwrap();
    assert_eq!(
        store.debit_credits(&unlimited.key_hash).await.unwrap(),
        CreditDebit::Unlimited
    );

    let metered = sample_key(Some(2));
    store.insert_key(&metered).await.unwrap();
    assert_eq!(
        store.debit_credits(&metered.key_hash).await.unwrap(),
        CreditDebit::Debited(1)
    );
    assert_eq!(
        store.debit_credits(&metered.key_hash).await.unwrap(),
        CreditDebit::Debited(0)
    );
    assert_eq!(
        store.debit_credits(&metered.key_hash).await.unwrap(),
        CreditDebit::Exhausted
    );

    let err = store.debit_credits("no-such-hash").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_save_credits_is_conditional_on_refill_marker() {
    let (store, _dir) = store().await;
    let key = sample_key(Some(0));
    store.insert_key(&key).await.unwrap();
    let observed = key.refill.as_ref().unwrap().last_refill_at;

    // A writer whose observed marker no longer matches writes nothing
    let stale = store
        .save_credits(&key.key_hash, 100, Utc::now(), observed - Duration::hours(1))
        .await
        .unwrap();
    assert!(!stale);
    let unchanged = store.find_by_hash(&key.key_hash).await.unwrap().unwrap();
    assert_eq!(unchanged.remaining, Some(0));

    let applied = store
        .save_credits(&key.key_hash, 100, Utc::now(), observed)
        .await
        .unwrap();
    assert!(applied);
    let loaded = store.find_by_hash(&key.key_hash).await.unwrap().unwrap();
    assert_eq!(loaded.remaining, Some(100));

    // The marker moved, so replaying the same observation writes nothing
    let replay = store
        .save_credits(&key.key_hash, 100, Utc::now(), observed)
        .await
        .unwrap();
    assert!(!replay);
}

#[tokio::test]
async fn test_bucket_consumption_and_rollover() {
    let (store, _dir) = store().await;
    let start = Utc::now();

    let first = store
        .check_and_consume("subject", "ns", 2, 60_000, start)
        .await
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 1);

    let second = store
        .check_and_consume("subject", "ns", 2, 60_000, start)
        .await
        .unwrap();
    assert!(second.allowed);
    assert_eq!(second.remaining, 0);

    let denied = store
        .check_and_consume("subject", "ns", 2, 60_000, start)
        .await
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);

    // A fully elapsed window rolls over and admits again
    let later = start + Duration::milliseconds(60_001);
    let rolled = store
        .check_and_consume("subject", "ns", 2, 60_000, later)
        .await
        .unwrap();
    assert!(rolled.allowed);
    assert_eq!(rolled.remaining, 1);
}

#[tokio::test]
async fn test_override_lifecycle() {
    let (store, _dir) = store().await;
    let record = RateLimitOverride {
        subject: "owner_1".into(),
        namespace: "ns".into(),
        limit: 7,
        duration_ms: 30_000,
        created_at: Utc::now(),
    };
    store.set_override(&record).await.unwrap();

    let loaded = store.get_override("owner_1", "ns").await.unwrap().unwrap();
    assert_eq!(loaded.limit, 7);
    assert_eq!(loaded.duration_ms, 30_000);

    store.clear_override("owner_1", "ns").await.unwrap();
    assert!(store.get_override("owner_1", "ns").await.unwrap().is_none());
    // Clearing again is a no-op
    store.clear_override("owner_1", "ns").await.unwrap();
}

#[tokio::test]
async fn test_verification_log_window_and_purge() {
    let (store, _dir) = store().await;
    let now = Utc::now();

    for (offset_days, key_hash) in [(0, "hash_new"), (120, "hash_old")] {
        store
            .append_verification(&VerificationLogEntry {
                id: Uuid::new_v4().to_string(),
                key_hash: key_hash.into(),
                namespace: "ns".into(),
                timestamp: now - Duration::days(offset_days),
                success: true,
                code: OutcomeCode::Valid,
                remaining: Some(5),
                ratelimit_remaining: Some(2),
                tags: Some(serde_json::json!({ "route": "/v1" })),
                ip_address: Some("203.0.113.9".into()),
            })
            .await
            .unwrap();
    }

    let recent = store
        .verifications_in_window(now - Duration::days(30), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].key_hash, "hash_new");
    assert_eq!(recent[0].ratelimit_remaining, Some(2));

    let for_key = store.verifications_for_key("hash_old", 10).await.unwrap();
    assert_eq!(for_key.len(), 1);

    let removed = store
        .purge_verifications(now - Duration::days(90))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store
        .verifications_for_key("hash_old", 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_rollup_replacement_and_namespace_bucket() {
    let (store, _dir) = store().await;
    let bucket_start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();

    let mut outcomes = OutcomeCounts::default();
    outcomes.record(OutcomeCode::Valid);
    outcomes.record(OutcomeCode::RateLimited);

    for key_hash in [Some("hash_a".to_owned()), None] {
        store
            .put_rollup(&RollupBucket {
                namespace: "ns".into(),
                key_hash,
                period: RollupPeriod::Hour,
                bucket_start,
                total: outcomes.total(),
                outcomes,
            })
            .await
            .unwrap();
    }

    let per_key = store
        .get_rollup("ns", Some("hash_a"), RollupPeriod::Hour, bucket_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(per_key.total, 2);
    assert_eq!(per_key.key_hash.as_deref(), Some("hash_a"));

    let namespace_wide = store
        .get_rollup("ns", None, RollupPeriod::Hour, bucket_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(namespace_wide.key_hash, None);

    // Re-putting the same bucket identity replaces the counts
    let mut smaller = OutcomeCounts::default();
    smaller.record(OutcomeCode::Valid);
    store
        .put_rollup(&RollupBucket {
            namespace: "ns".into(),
            key_hash: Some("hash_a".into()),
            period: RollupPeriod::Hour,
            bucket_start,
            total: smaller.total(),
            outcomes: smaller,
        })
        .await
        .unwrap();
    let replaced = store
        .get_rollup("ns", Some("hash_a"), RollupPeriod::Hour, bucket_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replaced.total, 1);

    let in_window = store
        .rollups_in_window(
            RollupPeriod::Hour,
            bucket_start - Duration::hours(1),
            bucket_start + Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(in_window.len(), 2);
}

#[tokio::test]
async fn test_role_and_permission_unique_names() {
    let (store, _dir) = store().await;
    let now = Utc::now();

    let permission = Permission {
        id: Uuid::new_v4().to_string(),
        name: "things.read".into(),
        description: None,
        created_at: now,
    };
    store.insert_permission(&permission).await.unwrap();

    let duplicate = Permission {
        id: Uuid::new_v4().to_string(),
        name: "things.read".into(),
        description: Some("again".into()),
        created_at: now,
    };
    assert_eq!(
        store.insert_permission(&duplicate).await.unwrap_err().code,
        ErrorCode::ResourceAlreadyExists
    );

    let role = Role {
        id: Uuid::new_v4().to_string(),
        name: "reader".into(),
        description: None,
        permission_ids: vec![permission.id.clone()],
        created_at: now,
    };
    store.insert_role(&role).await.unwrap();

    let loaded = store.find_role(&role.id).await.unwrap().unwrap();
    assert_eq!(loaded.permission_ids, vec![permission.id]);

    let duplicate_role = Role {
        id: Uuid::new_v4().to_string(),
        name: "reader".into(),
        description: None,
        permission_ids: vec![],
        created_at: now,
    };
    assert_eq!(
        store.insert_role(&duplicate_role).await.unwrap_err().code,
        ErrorCode::ResourceAlreadyExists
    );
}

#[tokio::test]
async fn test_purge_expired_respects_namespace_filter() {
    let (store, _dir) = store().await;
    let past = Utc::now() - Duration::hours(2);

    let mut in_ns = sample_key(None);
    in_ns.namespace = "ns_a".into();
    in_ns.expires_at = Some(past);
    store.insert_key(&in_ns).await.unwrap();

    let mut other_ns = sample_key(None);
    other_ns.namespace = "ns_b".into();
    other_ns.expires_at = Some(past);
    store.insert_key(&other_ns).await.unwrap();

    let removed = store.purge_expired(Some("ns_a"), Utc::now()).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.find_by_id(&in_ns.id).await.unwrap().is_none());
    assert!(store.find_by_id(&other_ns.id).await.unwrap().is_some());

    let removed_all = store.purge_expired(None, Utc::now()).await.unwrap();
    assert_eq!(removed_all, 1);
}
