// ABOUTME: Key lifecycle service covering issuance, revocation, update, and rotation
// ABOUTME: Plaintext secrets exist only in the creation response, never at rest
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Key Lifecycle
//!
//! Issuance mints a secret, stores only its digest plus a display hint, and
//! returns the plaintext exactly once. Rotation mints a replacement record
//! that inherits the old key's policies, and either revokes the old key
//! immediately or leaves it usable through a grace window. Every mutation
//! appends an audit entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::constants::audit_actions;
use crate::credentials::CredentialCodec;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AuditLogEntry, CreateKeyRequest, CreatedKey, KeyPatch, KeyRecord, RefillPolicy,
};
use crate::ratelimit::validate_limit;
use crate::store::{AuditStore, KeyStore};

/// Key issuance, revocation, update, rotation, and expiry sweeping
pub struct KeyService {
    keys: Arc<dyn KeyStore>,
    audit: Arc<dyn AuditStore>,
    codec: CredentialCodec,
    config: ServiceConfig,
}

impl KeyService {
    /// Create the service over the given stores
    #[must_use]
    pub fn new(keys: Arc<dyn KeyStore>, audit: Arc<dyn AuditStore>, config: ServiceConfig) -> Self {
        Self {
            keys,
            audit,
            codec: CredentialCodec::new(),
            config,
        }
    }

    /// Mint a new key. The returned plaintext is shown exactly once; only
    /// its digest and a hint are stored.
    ///
    /// # Errors
    /// Fails with `invalid_input` on an empty owner, a non-positive rate
    /// limit, or a refill amount without an interval.
    pub async fn create(&self, request: &CreateKeyRequest) -> AppResult<CreatedKey> {
        if request.owner_id.trim().is_empty() {
            return Err(AppError::invalid_input("Owner id must not be empty"));
        }
        if let Some(policy) = request.ratelimit {
            validate_limit(policy.limit, policy.duration_ms)?;
        }
        if request.refill_amount.is_some() && request.refill_interval.is_none() {
            return Err(AppError::invalid_input(
                "Refill amount requires a refill interval",
            ));
        }

        let now = Utc::now();
        let prefix = request
            .prefix
            .clone()
            .unwrap_or_else(|| self.config.default_prefix.clone());
        let namespace = request
            .namespace
            .clone()
            .unwrap_or_else(|| self.config.default_namespace.clone());
        let entropy_bytes = request.key_bytes.unwrap_or(self.config.key_entropy_bytes);

        let plaintext = self.codec.generate(&prefix, entropy_bytes);
        let key_hash = self.codec.digest(&plaintext);
        let key_hint = self.codec.hint(&plaintext);

        let refill = match (request.refill_amount, request.refill_interval) {
            (Some(amount), Some(interval)) => Some(RefillPolicy {
                amount,
                interval,
                last_refill_at: now,
            }),
            _ => None,
        };

        let key = KeyRecord {
            id: Uuid::new_v4().to_string(),
            key_hash: key_hash.clone(),
            key_prefix: prefix,
            key_hint,
            owner_id: request.owner_id.clone(),
            namespace,
            name: request.name.clone(),
            meta: request.meta.clone(),
            environment: request.environment.clone(),
            created_at: now,
            updated_at: now,
            revoked_at: None,
            rotation_grace_end: None,
            expires_at: request.expires_at,
            enabled: true,
            remaining: request.remaining,
            refill,
            ratelimit: request.ratelimit,
            permissions: request.permissions.clone().unwrap_or_default(),
            roles: request.roles.clone().unwrap_or_default(),
            rotated_from: None,
            external_key_id: None,
        };
        self.keys.insert_key(&key).await?;

        self.record_audit(
            audit_actions::KEY_CREATED,
            Some(&key_hash),
            json!({
                "key_id": key.id,
                "owner_id": key.owner_id,
                "namespace": key.namespace,
                "hint": key.key_hint,
            }),
        )
        .await?;
        info!(key_id = %key.id, owner_id = %key.owner_id, "Created API key");

        Ok(CreatedKey {
            key: plaintext,
            key_id: key.id,
        })
    }

    /// Fetch a key record by surface id.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when no such key exists.
    pub async fn get_key(&self, key_id: &str) -> AppResult<KeyRecord> {
        self.keys
            .find_by_id(key_id)
            .await?
            .ok_or_else(|| AppError::not_found("API key"))
    }

    /// List an owner's keys in a namespace, newest first
    pub async fn list_keys(&self, owner_id: &str, namespace: Option<&str>) -> AppResult<Vec<KeyRecord>> {
        let namespace = namespace.unwrap_or(&self.config.default_namespace);
        self.keys.list_by_owner(owner_id, namespace).await
    }

    /// Revoke a key. A soft revoke marks the record revoked and disabled but
    /// keeps it for audit trails; a hard revoke deletes it outright.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when no such key exists.
    pub async fn revoke(&self, key_id: &str, soft: bool) -> AppResult<()> {
        let mut key = self.get_key(key_id).await?;
        let now = Utc::now();

        if soft {
            key.revoked_at = Some(now);
            key.enabled = false;
            key.updated_at = now;
            self.keys.update_key(&key).await?;
        } else {
            self.keys.delete_by_id(key_id).await?;
        }

        self.record_audit(
            audit_actions::KEY_REVOKED,
            Some(&key.key_hash),
            json!({ "key_id": key_id, "soft": soft }),
        )
        .await?;
        info!(key_id, soft, "Revoked API key");
        Ok(())
    }

    /// Apply a partial patch. Outer `None` leaves a field unchanged; inner
    /// `None` clears it.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when no such key exists, or with
    /// `invalid_input` on a non-positive rate limit.
    pub async fn update(&self, key_id: &str, patch: &KeyPatch) -> AppResult<KeyRecord> {
        if let Some(Some(policy)) = patch.ratelimit {
            validate_limit(policy.limit, policy.duration_ms)?;
        }

        let mut key = self.get_key(key_id).await?;
        if let Some(name) = &patch.name {
            key.name = name.clone();
        }
        if let Some(meta) = &patch.meta {
            key.meta = meta.clone();
        }
        if let Some(expires_at) = patch.expires_at {
            key.expires_at = expires_at;
        }
        if let Some(remaining) = patch.remaining {
            key.remaining = remaining;
        }
        if let Some(ratelimit) = patch.ratelimit {
            key.ratelimit = ratelimit;
        }
        if let Some(enabled) = patch.enabled {
            key.enabled = enabled;
        }
        key.updated_at = Utc::now();
        self.keys.update_key(&key).await?;

        let patch_detail = serde_json::to_value(patch)
            .map_err(|e| AppError::internal(format!("Failed to serialize key patch: {e}")))?;
        self.record_audit(
            audit_actions::KEY_UPDATED,
            Some(&key.key_hash),
            json!({ "key_id": key_id, "patch": patch_detail }),
        )
        .await?;
        info!(key_id, "Updated API key");
        Ok(key)
    }

    /// Rotate a key: mint a replacement inheriting the old key's policies,
    /// then either revoke the old key immediately or leave it usable through
    /// a grace window of `grace_period_ms`.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when no such key exists, or with
    /// `invalid_input` on a non-positive grace period.
    pub async fn rotate(
        &self,
        key_id: &str,
        grace_period_ms: Option<i64>,
    ) -> AppResult<CreatedKey> {
        if grace_period_ms.is_some_and(|ms| ms <= 0) {
            return Err(AppError::invalid_input("Grace period must be positive"));
        }

        let mut old = self.get_key(key_id).await?;
        let now = Utc::now();

        let plaintext = self
            .codec
            .generate(&old.key_prefix, self.config.key_entropy_bytes);
        let key_hash = self.codec.digest(&plaintext);
        let key_hint = self.codec.hint(&plaintext);

        let replacement = KeyRecord {
            id: Uuid::new_v4().to_string(),
            key_hash: key_hash.clone(),
            key_prefix: old.key_prefix.clone(),
            key_hint,
            owner_id: old.owner_id.clone(),
            namespace: old.namespace.clone(),
            name: old.name.clone(),
            meta: old.meta.clone(),
            environment: old.environment.clone(),
            created_at: now,
            updated_at: now,
            revoked_at: None,
            rotation_grace_end: None,
            expires_at: old.expires_at,
            enabled: true,
            remaining: old.remaining,
            refill: old.refill.clone(),
            ratelimit: old.ratelimit,
            permissions: old.permissions.clone(),
            roles: old.roles.clone(),
            rotated_from: Some(old.key_hash.clone()),
            external_key_id: old.external_key_id.clone(),
        };
        self.keys.insert_key(&replacement).await?;

        if let Some(grace_ms) = grace_period_ms {
            old.rotation_grace_end = Some(now + Duration::milliseconds(grace_ms));
        } else {
            old.revoked_at = Some(now);
            old.enabled = false;
        }
        old.updated_at = now;
        self.keys.update_key(&old).await?;

        self.record_audit(
            audit_actions::KEY_ROTATED,
            Some(&key_hash),
            json!({
                "key_id": replacement.id,
                "rotated_from": old.id,
                "grace_period_ms": grace_period_ms,
            }),
        )
        .await?;
        info!(
            key_id = %replacement.id,
            rotated_from = %old.id,
            grace = grace_period_ms.is_some(),
            "Rotated API key"
        );

        Ok(CreatedKey {
            key: plaintext,
            key_id: replacement.id,
        })
    }

    /// Physically delete keys whose expiration passed before `older_than`
    /// (defaulting to now), optionally restricted to one namespace. Returns
    /// the number removed.
    pub async fn purge_expired_keys(
        &self,
        namespace: Option<&str>,
        older_than: Option<DateTime<Utc>>,
    ) -> AppResult<u64> {
        let cutoff = older_than.unwrap_or_else(Utc::now);
        let removed = self.keys.purge_expired(namespace, cutoff).await?;
        if removed > 0 {
            warn!(removed, ?namespace, "Purged expired API keys");
        }
        Ok(removed)
    }

    /// Scheduled expiry sweep across all namespaces. Appends an audit entry
    /// only when keys were actually removed.
    pub async fn expire_keys(&self) -> AppResult<u64> {
        let removed = self.purge_expired_keys(None, None).await?;
        if removed > 0 {
            self.record_audit(
                audit_actions::KEYS_EXPIRED,
                None,
                json!({ "removed": removed }),
            )
            .await?;
        }
        Ok(removed)
    }

    async fn record_audit(
        &self,
        action: &str,
        key_hash: Option<&str>,
        detail: serde_json::Value,
    ) -> AppResult<()> {
        self.audit
            .append_audit(&AuditLogEntry {
                id: Uuid::new_v4().to_string(),
                action: action.to_owned(),
                actor_id: None,
                key_hash: key_hash.map(ToOwned::to_owned),
                timestamp: Utc::now(),
                detail,
            })
            .await
    }
}
