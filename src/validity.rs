// ABOUTME: Validity state machine evaluating revocation, disablement, and expiry
// ABOUTME: Fixed precedence order, short-circuiting on the first matching rejection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Validity State Machine
//!
//! The precedence order is a contract: revoked before disabled before
//! expired before rotation-grace-expired. A record that is missing entirely
//! short-circuits to `NOT_FOUND` in the orchestrator before this machine
//! runs — there is no key to evaluate.

use chrono::{DateTime, Utc};

use crate::models::{KeyRecord, OutcomeCode};

/// Evaluate the key's validity checks in strict order against `now`.
/// Returns the first matching rejection, or `None` when all checks pass.
#[must_use]
pub fn evaluate(key: &KeyRecord, now: DateTime<Utc>) -> Option<OutcomeCode> {
    if key.revoked_at.is_some() {
        return Some(OutcomeCode::Revoked);
    }
    if !key.enabled {
        return Some(OutcomeCode::Disabled);
    }
    if key.expires_at.is_some_and(|expires| expires < now) {
        return Some(OutcomeCode::Expired);
    }
    if key.rotation_grace_end.is_some_and(|grace_end| grace_end < now) {
        return Some(OutcomeCode::RotationGraceExpired);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_key() -> KeyRecord {
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
            remaining: None,
            refill: None,
            ratelimit: None,
            permissions: Vec::new(),
            roles: Vec::new(),
            rotated_from: None,
            external_key_id: None,
        }
    }

    #[test]
    fn test_clean_key_passes() {
        assert_eq!(evaluate(&base_key(), Utc::now()), None);
    }

    #[test]
    fn test_revoked_takes_precedence_over_everything() {
        let now = Utc::now();
        let mut key = base_key();
        key.revoked_at = Some(now - Duration::minutes(1));
        key.enabled = false;
        key.expires_at = Some(now - Duration::hours(1));
        key.rotation_grace_end = Some(now - Duration::hours(1));
        assert_eq!(evaluate(&key, now), Some(OutcomeCode::Revoked));
    }

    #[test]
    fn test_disabled_takes_precedence_over_expired() {
        let now = Utc::now();
        let mut key = base_key();
        key.enabled = false;
        key.expires_at = Some(now - Duration::hours(1));
        assert_eq!(evaluate(&key, now), Some(OutcomeCode::Disabled));
    }

    #[test]
    fn test_expired_takes_precedence_over_grace() {
        let now = Utc::now();
        let mut key = base_key();
        key.expires_at = Some(now - Duration::hours(1));
        key.rotation_grace_end = Some(now - Duration::hours(1));
        assert_eq!(evaluate(&key, now), Some(OutcomeCode::Expired));
    }

    #[test]
    fn test_future_expiry_passes() {
        let now = Utc::now();
        let mut key = base_key();
        key.expires_at = Some(now + Duration::hours(1));
        assert_eq!(evaluate(&key, now), None);
    }

    #[test]
    fn test_grace_window_still_open_passes() {
        let now = Utc::now();
        let mut key = base_key();
        key.rotation_grace_end = Some(now + Duration::minutes(10));
        assert_eq!(evaluate(&key, now), None);
    }

    #[test]
    fn test_grace_window_elapsed_rejects() {
        let now = Utc::now();
        let mut key = base_key();
        key.rotation_grace_end = Some(now - Duration::minutes(10));
        assert_eq!(evaluate(&key, now), Some(OutcomeCode::RotationGraceExpired));
    }
}
