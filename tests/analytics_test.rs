// ABOUTME: Analytics rollup tests with controlled log timestamps
// ABOUTME: Verifies grouping, namespace-wide buckets, idempotent reruns, and retention
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use keygate::analytics::AnalyticsService;
use keygate::models::{OutcomeCode, RollupPeriod, VerificationLogEntry};
use keygate::store::LogStore;
use uuid::Uuid;

use common::harness;

fn entry(
    key_hash: &str,
    namespace: &str,
    timestamp: DateTime<Utc>,
    code: OutcomeCode,
) -> VerificationLogEntry {
    VerificationLogEntry {
        id: Uuid::new_v4().to_string(),
        key_hash: key_hash.to_owned(),
        namespace: namespace.to_owned(),
        timestamp,
        success: code.is_valid(),
        code,
        remaining: None,
        ratelimit_remaining: None,
        tags: None,
        ip_address: None,
    }
}

fn analytics(h: &common::Harness) -> AnalyticsService {
    AnalyticsService::new(h.store.clone(), h.store.clone(), h.config.clone())
}

#[tokio::test]
async fn test_hourly_rollup_groups_by_key_and_namespace() {
    let h = harness();
    let service = analytics(&h);

    // Activity inside the closed hour before "now"
    let hour_start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 15, 10, 0).unwrap();

    for (key, code) in [
        ("hash_a", OutcomeCode::Valid),
        ("hash_a", OutcomeCode::Valid),
        ("hash_a", OutcomeCode::RateLimited),
        ("hash_b", OutcomeCode::NotFound),
    ] {
        h.store
            .append_verification(&entry(key, "ns1", hour_start + Duration::minutes(5), code))
            .await
            .unwrap();
    }
    // Activity outside the window is ignored
    h.store
        .append_verification(&entry(
            "hash_a",
            "ns1",
            now - Duration::minutes(1),
            OutcomeCode::Valid,
        ))
        .await
        .unwrap();

    let written = service.rollup_hourly(now).await.unwrap();
    // hash_a, hash_b, and the namespace-wide bucket
    assert_eq!(written, 3);

    let per_key = h
        .store
        .get_rollup("ns1", Some("hash_a"), RollupPeriod::Hour, hour_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(per_key.total, 3);
    assert_eq!(per_key.outcomes.valid, 2);
    assert_eq!(per_key.outcomes.rate_limited, 1);

    let namespace_wide = h
        .store
        .get_rollup("ns1", None, RollupPeriod::Hour, hour_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(namespace_wide.total, 4);
    assert_eq!(namespace_wide.outcomes.not_found, 1);
}

#[tokio::test]
async fn test_hourly_rollup_rerun_is_idempotent() {
    let h = harness();
    let service = analytics(&h);
    let hour_start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap();

    h.store
        .append_verification(&entry(
            "hash_a",
            "ns1",
            hour_start + Duration::minutes(30),
            OutcomeCode::Valid,
        ))
        .await
        .unwrap();

    service.rollup_hourly(now).await.unwrap();
    service.rollup_hourly(now).await.unwrap();

    let bucket = h
        .store
        .get_rollup("ns1", Some("hash_a"), RollupPeriod::Hour, hour_start)
        .await
        .unwrap()
        .unwrap();
    // A rerun replaces the bucket instead of doubling it
    assert_eq!(bucket.total, 1);
}

#[tokio::test]
async fn test_empty_window_writes_nothing() {
    let h = harness();
    let service = analytics(&h);
    let written = service
        .rollup_hourly(Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(written, 0);
}

#[tokio::test]
async fn test_daily_rollup_merges_hourly_buckets() {
    let h = harness();
    let service = analytics(&h);
    let day_start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

    // Two closed hours of activity on June 1st
    for hour in [9, 17] {
        let hour_start = day_start + Duration::hours(hour);
        h.store
            .append_verification(&entry(
                "hash_a",
                "ns1",
                hour_start + Duration::minutes(10),
                OutcomeCode::Valid,
            ))
            .await
            .unwrap();
        service
            .rollup_hourly(hour_start + Duration::hours(1))
            .await
            .unwrap();
    }

    let written = service
        .rollup_daily(Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(written, 2);

    let daily = h
        .store
        .get_rollup("ns1", Some("hash_a"), RollupPeriod::Day, day_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(daily.total, 2);
    assert_eq!(daily.outcomes.valid, 2);
}

#[tokio::test]
async fn test_retention_purges_only_old_entries() {
    let h = harness();
    let service = analytics(&h);
    let now = Utc::now();

    h.store
        .append_verification(&entry(
            "hash_old",
            "ns1",
            now - Duration::days(120),
            OutcomeCode::Valid,
        ))
        .await
        .unwrap();
    h.store
        .append_verification(&entry("hash_new", "ns1", now, OutcomeCode::Valid))
        .await
        .unwrap();

    // Default retention is 90 days
    let removed = service.cleanup_logs().await.unwrap();
    assert_eq!(removed, 1);

    let remaining = h
        .store
        .verifications_in_window(now - Duration::days(365), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key_hash, "hash_new");
}
