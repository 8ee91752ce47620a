// ABOUTME: Credit refill engine deciding when usage credits reset to their allotment
// ABOUTME: Single-reset semantics; multiple elapsed intervals never stack
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Credit Refill Engine
//!
//! Applied before the credit-exhaustion check on every verification. A key
//! with no refill policy or no credit counter is left untouched.

use chrono::{DateTime, Duration, Utc};

use crate::models::KeyRecord;

/// Reset the key's credits to the policy's allotment when a full refill
/// interval has elapsed since the last refill. Returns `true` when the key
/// was mutated and needs persisting.
///
/// A single reset only: if several intervals elapsed since the last refill,
/// credits still reset once to the configured amount.
pub fn maybe_refill(key: &mut KeyRecord, now: DateTime<Utc>) -> bool {
    let Some(refill) = key.refill.as_mut() else {
        return false;
    };
    if key.remaining.is_none() {
        return false;
    }

    let elapsed = now.signed_duration_since(refill.last_refill_at);
    if elapsed < Duration::milliseconds(refill.interval.span_ms()) {
        return false;
    }

    key.remaining = Some(refill.amount);
    refill.last_refill_at = now;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RefillInterval, RefillPolicy};

    fn metered_key(remaining: Option<i64>, refill: Option<RefillPolicy>) -> KeyRecord {
        let now = Utc::now();
        KeyRecord {
            id: "key_1".into(),
            key_hash: "hash".into(),
            key_prefix: "kg_live_".into(),
            key_hint: "kg_live_abcd...wxyz".into(),
            owner_id: "owner_1".into(),
            namespace: "default".into(),
            name: None,
            meta: None,
            environment: None,
            created_at: now,
            updated_at: now,
            revoked_at: None,
            rotation_grace_end: None,
            expires_at: None,
            enabled: true,
            remaining,
            refill,
            ratelimit: None,
            permissions: Vec::new(),
            roles: Vec::new(),
            rotated_from: None,
            external_key_id: None,
        }
    }

    #[test]
    fn test_no_policy_is_noop() {
        let mut key = metered_key(Some(3), None);
        assert!(!maybe_refill(&mut key, Utc::now()));
        assert_eq!(key.remaining, Some(3));
    }

    #[test]
    fn test_unlimited_key_is_noop() {
        let now = Utc::now();
        let mut key = metered_key(
            None,
            Some(RefillPolicy {
                amount: 100,
                interval: RefillInterval::Daily,
                last_refill_at: now - Duration::days(2),
            }),
        );
        assert!(!maybe_refill(&mut key, now));
        assert_eq!(key.remaining, None);
    }

    #[test]
    fn test_refill_after_interval_elapsed() {
        let now = Utc::now();
        let mut key = metered_key(
            Some(0),
            Some(RefillPolicy {
                amount: 100,
                interval: RefillInterval::Hourly,
                last_refill_at: now - Duration::hours(3),
            }),
        );
        assert!(maybe_refill(&mut key, now));
        // Single reset, even though three intervals elapsed
        assert_eq!(key.remaining, Some(100));
        assert_eq!(key.refill.as_ref().map(|r| r.last_refill_at), Some(now));
    }

    #[test]
    fn test_no_refill_before_interval() {
        let now = Utc::now();
        let mut key = metered_key(
            Some(2),
            Some(RefillPolicy {
                amount: 100,
                interval: RefillInterval::Daily,
                last_refill_at: now - Duration::hours(5),
            }),
        );
        assert!(!maybe_refill(&mut key, now));
        assert_eq!(key.remaining, Some(2));
    }
}
