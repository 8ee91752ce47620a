// ABOUTME: Analytics rollups aggregating verification logs into hourly and daily buckets
// ABOUTME: Rollups replace whole buckets, so reprocessing a window is idempotent
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Analytics Rollups
//!
//! The hourly job reads the raw verification log for the last closed hour
//! and writes one bucket per (namespace, key digest) pair plus one
//! namespace-wide bucket. The daily job merges the prior day's hourly
//! buckets. Both write by replacement keyed on the bucket identity, so a
//! rerun over the same window produces identical totals instead of
//! double-counting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::constants::audit_actions;
use crate::errors::{AppError, AppResult};
use crate::models::{AuditLogEntry, OutcomeCounts, RollupBucket, RollupPeriod};
use crate::store::{AuditStore, LogStore};

/// Scheduled aggregation and retention over the verification log
pub struct AnalyticsService {
    logs: Arc<dyn LogStore>,
    audit: Arc<dyn AuditStore>,
    config: ServiceConfig,
}

/// Truncate a timestamp to the start of its hour
fn hour_floor(ts: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| AppError::internal("Failed to truncate timestamp to hour"))
}

/// Truncate a timestamp to the start of its UTC day
fn day_floor(ts: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    hour_floor(ts)?
        .with_hour(0)
        .ok_or_else(|| AppError::internal("Failed to truncate timestamp to day"))
}

impl AnalyticsService {
    /// Create the service over the given stores
    #[must_use]
    pub fn new(logs: Arc<dyn LogStore>, audit: Arc<dyn AuditStore>, config: ServiceConfig) -> Self {
        Self {
            logs,
            audit,
            config,
        }
    }

    /// Roll up the last closed hour before `now`. Returns the number of
    /// buckets written.
    pub async fn rollup_hourly(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let window_end = hour_floor(now)?;
        let window_start = window_end - Duration::hours(1);
        let entries = self
            .logs
            .verifications_in_window(window_start, window_end)
            .await?;
        if entries.is_empty() {
            debug!(%window_start, "No verification activity to roll up");
            return Ok(0);
        }

        // Per-key counts plus a namespace-wide bucket keyed with no digest
        let mut groups: HashMap<(String, Option<String>), OutcomeCounts> = HashMap::new();
        for entry in &entries {
            groups
                .entry((entry.namespace.clone(), Some(entry.key_hash.clone())))
                .or_default()
                .record(entry.code);
            groups
                .entry((entry.namespace.clone(), None))
                .or_default()
                .record(entry.code);
        }

        let written = groups.len();
        for ((namespace, key_hash), outcomes) in groups {
            self.logs
                .put_rollup(&RollupBucket {
                    namespace,
                    key_hash,
                    period: RollupPeriod::Hour,
                    bucket_start: window_start,
                    total: outcomes.total(),
                    outcomes,
                })
                .await?;
        }

        self.record_audit(
            audit_actions::ANALYTICS_ROLLUP,
            json!({ "bucket_start": window_start, "buckets": written, "entries": entries.len() }),
        )
        .await?;
        info!(%window_start, buckets = written, "Completed hourly rollup");
        Ok(written)
    }

    /// Merge the prior UTC day's hourly buckets into daily buckets. Returns
    /// the number of buckets written.
    pub async fn rollup_daily(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let day_end = day_floor(now)?;
        let day_start = day_end - Duration::days(1);
        let hourly = self
            .logs
            .rollups_in_window(RollupPeriod::Hour, day_start, day_end)
            .await?;
        if hourly.is_empty() {
            debug!(%day_start, "No hourly buckets to merge");
            return Ok(0);
        }

        let mut groups: HashMap<(String, Option<String>), OutcomeCounts> = HashMap::new();
        for bucket in &hourly {
            groups
                .entry((bucket.namespace.clone(), bucket.key_hash.clone()))
                .or_default()
                .merge(&bucket.outcomes);
        }

        let written = groups.len();
        for ((namespace, key_hash), outcomes) in groups {
            self.logs
                .put_rollup(&RollupBucket {
                    namespace,
                    key_hash,
                    period: RollupPeriod::Day,
                    bucket_start: day_start,
                    total: outcomes.total(),
                    outcomes,
                })
                .await?;
        }

        self.record_audit(
            audit_actions::ANALYTICS_ROLLUP_DAILY,
            json!({ "bucket_start": day_start, "buckets": written }),
        )
        .await?;
        info!(%day_start, buckets = written, "Completed daily rollup");
        Ok(written)
    }

    /// Delete raw verification log entries older than `older_than`. Returns
    /// the number removed. Rollup buckets are never purged.
    pub async fn purge_verification_logs(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        self.logs.purge_verifications(older_than).await
    }

    /// Scheduled retention sweep using the configured retention window.
    /// Appends an audit entry only when entries were actually removed.
    pub async fn cleanup_logs(&self) -> AppResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.log_retention_days));
        let removed = self.purge_verification_logs(cutoff).await?;
        if removed > 0 {
            self.record_audit(
                audit_actions::LOGS_CLEANED,
                json!({ "removed": removed, "cutoff": cutoff }),
            )
            .await?;
            info!(removed, "Purged verification logs past retention");
        }
        Ok(removed)
    }

    async fn record_audit(&self, action: &str, detail: serde_json::Value) -> AppResult<()> {
        self.audit
            .append_audit(&AuditLogEntry {
                id: Uuid::new_v4().to_string(),
                action: action.to_owned(),
                actor_id: None,
                key_hash: None,
                timestamp: Utc::now(),
                detail,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_floor() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let floored = hour_floor(ts).unwrap();
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_day_floor() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let floored = day_floor(ts).unwrap();
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap());
    }
}
