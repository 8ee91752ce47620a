// ABOUTME: Verification orchestrator running the full credential check pipeline
// ABOUTME: Lookup, validity, refill, credits, rate limits, RBAC resolution, logging
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Verification Pipeline
//!
//! One entry point, [`Verifier::verify`], runs every check in a fixed order
//! and returns a [`Verification`] value for both success and failure. Failed
//! verification is an expected outcome, not an operational error; `Err` is
//! reserved for store and infrastructure failures.
//!
//! Every attempt appends exactly one verification log entry, whichever
//! branch it takes. Unknown credentials are logged under a placeholder
//! digest so attacker-supplied strings never reach the log store in any
//! derived form.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::constants::NOT_FOUND_DIGEST;
use crate::credentials::CredentialCodec;
use crate::errors::AppResult;
use crate::models::{
    KeyRecord, OutcomeCode, RateLimitInfo, Verification, VerificationLogEntry, VerifyRequest,
};
use crate::store::{CreditDebit, KeyStore, LogStore, PermissionStore, RateLimitStore, RoleStore};
use crate::{ratelimit, rbac, refill, validity};

/// Full verification pipeline over the five stores it touches
pub struct Verifier {
    keys: Arc<dyn KeyStore>,
    rate_limits: Arc<dyn RateLimitStore>,
    logs: Arc<dyn LogStore>,
    roles: Arc<dyn RoleStore>,
    permissions: Arc<dyn PermissionStore>,
    codec: CredentialCodec,
    default_namespace: String,
}

impl Verifier {
    /// Create a verifier over the given stores
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyStore>,
        rate_limits: Arc<dyn RateLimitStore>,
        logs: Arc<dyn LogStore>,
        roles: Arc<dyn RoleStore>,
        permissions: Arc<dyn PermissionStore>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            rate_limits,
            logs,
            roles,
            permissions,
            codec: CredentialCodec::new(),
            default_namespace: default_namespace.into(),
        }
    }

    /// Verify a presented credential.
    ///
    /// # Errors
    /// Returns an error only for store or infrastructure failures. Every
    /// policy rejection is expressed in the returned [`Verification`].
    pub async fn verify(&self, request: &VerifyRequest) -> AppResult<Verification> {
        let digest = self.codec.digest(&request.key);

        let Some(mut key) = self.keys.find_by_hash(&digest).await? else {
            // The namespace hint is informational; the presented string is
            // not echoed into the log in any form
            let namespace = request
                .namespace
                .clone()
                .unwrap_or_else(|| self.default_namespace.clone());
            debug!(namespace, "Verification failed: credential not found");
            self.append_log(request, NOT_FOUND_DIGEST, &namespace, OutcomeCode::NotFound, None, None)
                .await?;
            return Ok(Verification::failure(OutcomeCode::NotFound));
        };

        let now = Utc::now();

        if let Some(code) = validity::evaluate(&key, now) {
            debug!(key_id = %key.id, code = code.as_str(), "Verification failed validity checks");
            self.append_log(request, &key.key_hash, &key.namespace, code, key.remaining, None)
                .await?;
            return Ok(Self::rejected(&key, code, key.remaining, None));
        }

        let observed_refill_at = key.refill.as_ref().map(|refill| refill.last_refill_at);
        if refill::maybe_refill(&mut key, now) {
            // Refill only fires on keys with a counter and a policy, so both
            // are set here. The write is conditional on the refill marker we
            // observed; a loser against a concurrent refill must not clobber
            // debits taken from the winner's allotment.
            if let (Some(remaining), Some(observed_refill_at)) = (key.remaining, observed_refill_at)
            {
                if self
                    .keys
                    .save_credits(&key.key_hash, remaining, now, observed_refill_at)
                    .await?
                {
                    debug!(key_id = %key.id, remaining, "Refilled usage credits");
                } else {
                    debug!(key_id = %key.id, "Refill already applied by a concurrent verification");
                }
            }
        }

        // Fast-path exhaustion check; the authoritative guard is the atomic
        // debit further down
        if key.remaining == Some(0) {
            self.append_log(
                request,
                &key.key_hash,
                &key.namespace,
                OutcomeCode::UsageExceeded,
                Some(0),
                None,
            )
            .await?;
            return Ok(Self::rejected(&key, OutcomeCode::UsageExceeded, Some(0), None));
        }

        // Key-level limit: a per-digest override beats the key's own policy
        let key_override = self
            .rate_limits
            .get_override(&key.key_hash, &key.namespace)
            .await?;
        let mut ratelimit_info = None;
        if let Some((limit, duration_ms)) =
            ratelimit::effective_limit(key_override.as_ref(), key.ratelimit.as_ref())
        {
            let decision = self
                .rate_limits
                .check_and_consume(&key.key_hash, &key.namespace, limit, duration_ms, now)
                .await?;
            let info = RateLimitInfo {
                remaining: decision.remaining,
                reset_at: decision.reset_at,
            };
            if !decision.allowed {
                self.append_log(
                    request,
                    &key.key_hash,
                    &key.namespace,
                    OutcomeCode::RateLimited,
                    key.remaining,
                    Some(info.remaining),
                )
                .await?;
                return Ok(Self::rejected(&key, OutcomeCode::RateLimited, key.remaining, Some(info)));
            }
            ratelimit_info = Some(info);
        }

        // Owner-level limit exists only as an override; no per-owner default
        if let Some(owner_override) = self
            .rate_limits
            .get_override(&key.owner_id, &key.namespace)
            .await?
        {
            let decision = self
                .rate_limits
                .check_and_consume(
                    &key.owner_id,
                    &key.namespace,
                    owner_override.limit,
                    owner_override.duration_ms,
                    now,
                )
                .await?;
            let info = RateLimitInfo {
                remaining: decision.remaining,
                reset_at: decision.reset_at,
            };
            if !decision.allowed {
                self.append_log(
                    request,
                    &key.key_hash,
                    &key.namespace,
                    OutcomeCode::RateLimited,
                    key.remaining,
                    Some(info.remaining),
                )
                .await?;
                return Ok(Self::rejected(&key, OutcomeCode::RateLimited, key.remaining, Some(info)));
            }
            if ratelimit_info.is_none() {
                ratelimit_info = Some(info);
            }
        }

        let access = rbac::resolve_access(&key, self.roles.as_ref(), self.permissions.as_ref())
            .await?;

        // Authoritative credit consumption; a racer can exhaust the counter
        // between the fast-path check and here
        let remaining = match self.keys.debit_credits(&key.key_hash).await? {
            CreditDebit::Unlimited => None,
            CreditDebit::Debited(balance) => Some(balance),
            CreditDebit::Exhausted => {
                self.append_log(
                    request,
                    &key.key_hash,
                    &key.namespace,
                    OutcomeCode::UsageExceeded,
                    Some(0),
                    ratelimit_info.map(|info| info.remaining),
                )
                .await?;
                return Ok(Self::rejected(&key, OutcomeCode::UsageExceeded, Some(0), ratelimit_info));
            }
        };

        self.append_log(
            request,
            &key.key_hash,
            &key.namespace,
            OutcomeCode::Valid,
            remaining,
            ratelimit_info.map(|info| info.remaining),
        )
        .await?;
        debug!(key_id = %key.id, owner_id = %key.owner_id, "Verification succeeded");

        Ok(Verification {
            valid: true,
            code: OutcomeCode::Valid,
            key_id: Some(key.id),
            owner_id: Some(key.owner_id),
            meta: key.meta,
            remaining,
            ratelimit: ratelimit_info,
            permissions: access.permissions,
            roles: access.roles,
            message: Some("API key is valid".to_owned()),
        })
    }

    /// Failure result that still identifies the matched key
    fn rejected(
        key: &KeyRecord,
        code: OutcomeCode,
        remaining: Option<i64>,
        ratelimit_info: Option<RateLimitInfo>,
    ) -> Verification {
        let mut result = Verification::failure(code);
        result.key_id = Some(key.id.clone());
        result.owner_id = Some(key.owner_id.clone());
        result.remaining = remaining;
        result.ratelimit = ratelimit_info;
        result
    }

    async fn append_log(
        &self,
        request: &VerifyRequest,
        key_hash: &str,
        namespace: &str,
        code: OutcomeCode,
        remaining: Option<i64>,
        ratelimit_remaining: Option<u32>,
    ) -> AppResult<()> {
        self.logs
            .append_verification(&VerificationLogEntry {
                id: Uuid::new_v4().to_string(),
                key_hash: key_hash.to_owned(),
                namespace: namespace.to_owned(),
                timestamp: Utc::now(),
                success: code.is_valid(),
                code,
                remaining,
                ratelimit_remaining,
                tags: request.tags.clone(),
                ip_address: request.ip_address.clone(),
            })
            .await
    }
}

/// Convenience constructor when every store trait is implemented by one
/// backend, as with [`crate::store::MemoryStore`] and
/// [`crate::store::SqliteStore`]
pub fn verifier_over<S>(store: Arc<S>, default_namespace: impl Into<String>) -> Verifier
where
    S: KeyStore + RateLimitStore + LogStore + RoleStore + PermissionStore + 'static,
{
    Verifier::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        default_namespace,
    )
}
