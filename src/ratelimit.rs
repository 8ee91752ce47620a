// ABOUTME: Sliding-window rate-limit bucket arithmetic and the standalone limiter service
// ABOUTME: Fixed-window-reset counters keyed by (subject, namespace) with override resolution
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Rate Limiting
//!
//! Fixed-window-reset sliding approximation, not a true rolling log: the
//! counter resets when a full window has elapsed, so a burst immediately
//! after rollover can admit up to 2× the limit within a window-length span.
//! That boundary behavior is part of the compatibility contract and is
//! pinned by tests — do not "fix" it to a rolling log.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::{RateLimitDecision, RateLimitOverride, RateLimitPolicy};
use crate::store::RateLimitStore;

/// Sliding-window counter state for one (subject, namespace) pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitBucket {
    /// Start of the current window
    pub window_start: DateTime<Utc>,
    /// Requests admitted in the current window
    pub count: u32,
}

impl RateLimitBucket {
    /// Open a fresh bucket, consuming the first slot
    #[must_use]
    pub fn open(limit: u32, duration_ms: i64, now: DateTime<Utc>) -> (Self, RateLimitDecision) {
        let bucket = Self {
            window_start: now,
            count: 1,
        };
        let decision = RateLimitDecision {
            allowed: true,
            remaining: limit.saturating_sub(1),
            reset_at: now + Duration::milliseconds(duration_ms),
        };
        (bucket, decision)
    }

    /// Check the bucket and consume a slot if one is available, rolling the
    /// window over first when it has fully elapsed
    pub fn check_and_consume(
        &mut self,
        limit: u32,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let duration = Duration::milliseconds(duration_ms);

        // Window fully elapsed: reset to a fresh window anchored at now
        if now.signed_duration_since(self.window_start) > duration {
            self.window_start = now;
            self.count = 1;
            return RateLimitDecision {
                allowed: true,
                remaining: limit.saturating_sub(1),
                reset_at: now + duration,
            };
        }

        let reset_at = self.window_start + duration;

        if self.count >= limit {
            // Denied attempts do not consume a slot
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        self.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: limit.saturating_sub(self.count),
            reset_at,
        }
    }
}

/// Resolve the effective limit/duration for a subject: an override record
/// takes precedence over the key's (or owner's) default policy
#[must_use]
pub fn effective_limit(
    override_record: Option<&RateLimitOverride>,
    policy: Option<&RateLimitPolicy>,
) -> Option<(u32, i64)> {
    if let Some(ov) = override_record {
        return Some((ov.limit, ov.duration_ms));
    }
    policy.map(|p| (p.limit, p.duration_ms))
}

/// Validate that a limit and duration are both positive
pub fn validate_limit(limit: u32, duration_ms: i64) -> AppResult<()> {
    if limit == 0 {
        return Err(AppError::invalid_input("Rate limit must be positive"));
    }
    if duration_ms <= 0 {
        return Err(AppError::invalid_input(
            "Rate limit duration must be positive",
        ));
    }
    Ok(())
}

/// Standalone rate limiter: check-and-consume against an arbitrary
/// (identifier, namespace) bucket without any key lookup
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Create a limiter over the given bucket store
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Check the bucket for `identifier` in `namespace`, consuming a slot if
    /// one is available.
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` or `duration_ms` is non-positive, or if
    /// the store operation fails.
    pub async fn check(
        &self,
        identifier: &str,
        namespace: &str,
        limit: u32,
        duration_ms: i64,
    ) -> AppResult<RateLimitDecision> {
        validate_limit(limit, duration_ms)?;
        self.store
            .check_and_consume(identifier, namespace, limit, duration_ms, Utc::now())
            .await
    }
}

/// Override administration: set and clear per-subject limits, with audit
pub struct RateLimitAdmin {
    store: Arc<dyn RateLimitStore>,
    audit: Arc<dyn crate::store::AuditStore>,
}

impl RateLimitAdmin {
    /// Create the admin surface over the given stores
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>, audit: Arc<dyn crate::store::AuditStore>) -> Self {
        Self { store, audit }
    }

    /// Install or replace the override for (subject, namespace). The subject
    /// is a key digest for key-level overrides or an owner id for
    /// owner-level ones.
    ///
    /// # Errors
    /// Fails with `invalid_input` when the limit or duration is non-positive.
    pub async fn set_override(
        &self,
        subject: &str,
        namespace: &str,
        limit: u32,
        duration_ms: i64,
    ) -> AppResult<RateLimitOverride> {
        validate_limit(limit, duration_ms)?;
        let record = RateLimitOverride {
            subject: subject.to_owned(),
            namespace: namespace.to_owned(),
            limit,
            duration_ms,
            created_at: Utc::now(),
        };
        self.store.set_override(&record).await?;
        self.record_audit(
            crate::constants::audit_actions::OVERRIDE_SET,
            serde_json::json!({
                "subject": subject,
                "namespace": namespace,
                "limit": limit,
                "duration_ms": duration_ms,
            }),
        )
        .await?;
        Ok(record)
    }

    /// Remove the override for (subject, namespace); a no-op when none exists
    pub async fn clear_override(&self, subject: &str, namespace: &str) -> AppResult<()> {
        self.store.clear_override(subject, namespace).await?;
        self.record_audit(
            crate::constants::audit_actions::OVERRIDE_CLEARED,
            serde_json::json!({ "subject": subject, "namespace": namespace }),
        )
        .await
    }

    /// Fetch the override for (subject, namespace), if any
    pub async fn get_override(
        &self,
        subject: &str,
        namespace: &str,
    ) -> AppResult<Option<RateLimitOverride>> {
        self.store.get_override(subject, namespace).await
    }

    async fn record_audit(&self, action: &str, detail: serde_json::Value) -> AppResult<()> {
        self.audit
            .append_audit(&crate::models::AuditLogEntry {
                id: uuid::Uuid::new_v4().to_string(),
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

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_open_consumes_first_slot() {
        let (bucket, decision) = RateLimitBucket::open(5, 60_000, now());
        assert_eq!(bucket.count, 1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_exhaustion_within_window() {
        let start = now();
        let (mut bucket, _) = RateLimitBucket::open(3, 60_000, start);
        assert!(bucket.check_and_consume(3, 60_000, start).allowed);
        assert!(bucket.check_and_consume(3, 60_000, start).allowed);

        let denied = bucket.check_and_consume(3, 60_000, start);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, start + Duration::milliseconds(60_000));
        // Denied attempts must not consume slots
        assert_eq!(bucket.count, 3);
    }

    #[test]
    fn test_window_rollover_resets_count() {
        let start = now();
        let (mut bucket, _) = RateLimitBucket::open(2, 60_000, start);
        bucket.check_and_consume(2, 60_000, start);
        assert!(!bucket.check_and_consume(2, 60_000, start).allowed);

        let later = start + Duration::milliseconds(60_001);
        let decision = bucket.check_and_consume(2, 60_000, later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(bucket.window_start, later);
        assert_eq!(bucket.count, 1);
    }

    #[test]
    fn test_override_takes_precedence() {
        let policy = RateLimitPolicy {
            limit: 10,
            duration_ms: 1_000,
        };
        let ov = RateLimitOverride {
            subject: "s".into(),
            namespace: "ns".into(),
            limit: 3,
            duration_ms: 5_000,
            created_at: now(),
        };
        assert_eq!(effective_limit(Some(&ov), Some(&policy)), Some((3, 5_000)));
        assert_eq!(effective_limit(None, Some(&policy)), Some((10, 1_000)));
        assert_eq!(effective_limit(None, None), None);
    }

    #[test]
    fn test_validate_limit() {
        assert!(validate_limit(1, 1).is_ok());
        assert!(validate_limit(0, 1_000).is_err());
        assert!(validate_limit(5, 0).is_err());
        assert!(validate_limit(5, -1).is_err());
    }
}
