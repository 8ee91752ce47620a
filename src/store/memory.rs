// ABOUTME: In-memory store backing tests and embedded single-process deployments
// ABOUTME: DashMap entry locks provide the per-record atomicity the store contract requires
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # In-Memory Store
//!
//! Backed by [`dashmap::DashMap`] for record collections and plain mutexes
//! for the append-only logs. A `DashMap` entry guard holds the shard lock
//! for the duration of a read-modify-write, which is exactly the
//! single-record atomicity the store traits demand.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    AuditStore, CreditDebit, KeyStore, LogStore, PermissionStore, RateLimitStore, RoleStore,
};
use crate::errors::{AppError, AppResult};
use crate::models::{
    AuditLogEntry, KeyRecord, Permission, RateLimitDecision, RateLimitOverride, Role,
    RollupBucket, RollupPeriod, VerificationLogEntry,
};
use crate::ratelimit::RateLimitBucket;

type SubjectKey = (String, String);
type RollupKey = (String, Option<String>, RollupPeriod, DateTime<Utc>);

/// In-memory implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    keys: DashMap<String, KeyRecord>,
    key_ids: DashMap<String, String>,
    buckets: DashMap<SubjectKey, RateLimitBucket>,
    overrides: DashMap<SubjectKey, RateLimitOverride>,
    verifications: Mutex<Vec<VerificationLogEntry>>,
    rollups: DashMap<RollupKey, RollupBucket>,
    roles: DashMap<String, Role>,
    permissions: DashMap<String, Permission>,
    audit: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn verifications_guard(&self) -> AppResult<std::sync::MutexGuard<'_, Vec<VerificationLogEntry>>> {
        self.verifications
            .lock()
            .map_err(|_| AppError::internal("Verification log mutex poisoned"))
    }

    fn audit_guard(&self) -> AppResult<std::sync::MutexGuard<'_, Vec<AuditLogEntry>>> {
        self.audit
            .lock()
            .map_err(|_| AppError::internal("Audit log mutex poisoned"))
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert_key(&self, key: &KeyRecord) -> AppResult<()> {
        match self.keys.entry(key.key_hash.clone()) {
            Entry::Occupied(_) => Err(AppError::already_exists("API key digest")),
            Entry::Vacant(vacant) => {
                vacant.insert(key.clone());
                self.key_ids.insert(key.id.clone(), key.key_hash.clone());
                Ok(())
            }
        }
    }

    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<KeyRecord>> {
        Ok(self.keys.get(key_hash).map(|entry| entry.clone()))
    }

    async fn find_by_id(&self, key_id: &str) -> AppResult<Option<KeyRecord>> {
        let Some(hash) = self.key_ids.get(key_id).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        Ok(self.keys.get(&hash).map(|entry| entry.clone()))
    }

    async fn list_by_owner(&self, owner_id: &str, namespace: &str) -> AppResult<Vec<KeyRecord>> {
        let mut keys: Vec<KeyRecord> = self
            .keys
            .iter()
            .filter(|entry| entry.owner_id == owner_id && entry.namespace == namespace)
            .map(|entry| entry.clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn update_key(&self, key: &KeyRecord) -> AppResult<()> {
        let Some(hash) = self.key_ids.get(&key.id).map(|entry| entry.clone()) else {
            return Err(AppError::not_found("API key"));
        };
        self.keys.insert(hash, key.clone());
        Ok(())
    }

    async fn delete_by_id(&self, key_id: &str) -> AppResult<()> {
        let Some((_, hash)) = self.key_ids.remove(key_id) else {
            return Err(AppError::not_found("API key"));
        };
        self.keys.remove(&hash);
        Ok(())
    }

    async fn save_credits(
        &self,
        key_hash: &str,
        remaining: i64,
        last_refill_at: DateTime<Utc>,
        observed_refill_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        // The entry guard makes the compare-and-set atomic per key
        let Some(mut entry) = self.keys.get_mut(key_hash) else {
            return Err(AppError::not_found("API key"));
        };
        match entry.refill.as_mut() {
            Some(refill) if refill.last_refill_at == observed_refill_at => {
                refill.last_refill_at = last_refill_at;
            }
            _ => return Ok(false),
        }
        entry.remaining = Some(remaining);
        Ok(true)
    }

    async fn debit_credits(&self, key_hash: &str) -> AppResult<CreditDebit> {
        // The entry guard makes the check-and-decrement atomic per key
        let Some(mut entry) = self.keys.get_mut(key_hash) else {
            return Err(AppError::not_found("API key"));
        };
        match entry.remaining {
            None => Ok(CreditDebit::Unlimited),
            Some(remaining) if remaining <= 0 => Ok(CreditDebit::Exhausted),
            Some(remaining) => {
                entry.remaining = Some(remaining - 1);
                Ok(CreditDebit::Debited(remaining - 1))
            }
        }
    }

    async fn purge_expired(
        &self,
        namespace: Option<&str>,
        older_than: DateTime<Utc>,
    ) -> AppResult<u64> {
        let doomed: Vec<String> = self
            .keys
            .iter()
            .filter(|entry| {
                namespace.is_none_or(|ns| entry.namespace == ns)
                    && entry.expires_at.is_some_and(|expires| expires < older_than)
            })
            .map(|entry| entry.id.clone())
            .collect();

        let mut removed = 0u64;
        for key_id in doomed {
            if let Some((_, hash)) = self.key_ids.remove(&key_id) {
                self.keys.remove(&hash);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn check_and_consume(
        &self,
        subject: &str,
        namespace: &str,
        limit: u32,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitDecision> {
        // The entry guard serializes concurrent callers on the same bucket
        match self.buckets.entry((subject.to_owned(), namespace.to_owned())) {
            Entry::Occupied(mut occupied) => {
                Ok(occupied.get_mut().check_and_consume(limit, duration_ms, now))
            }
            Entry::Vacant(vacant) => {
                let (bucket, decision) = RateLimitBucket::open(limit, duration_ms, now);
                vacant.insert(bucket);
                Ok(decision)
            }
        }
    }

    async fn get_override(
        &self,
        subject: &str,
        namespace: &str,
    ) -> AppResult<Option<RateLimitOverride>> {
        Ok(self
            .overrides
            .get(&(subject.to_owned(), namespace.to_owned()))
            .map(|entry| entry.clone()))
    }

    async fn set_override(&self, record: &RateLimitOverride) -> AppResult<()> {
        self.overrides.insert(
            (record.subject.clone(), record.namespace.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn clear_override(&self, subject: &str, namespace: &str) -> AppResult<()> {
        self.overrides
            .remove(&(subject.to_owned(), namespace.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_verification(&self, entry: &VerificationLogEntry) -> AppResult<()> {
        self.verifications_guard()?.push(entry.clone());
        Ok(())
    }

    async fn verifications_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<VerificationLogEntry>> {
        Ok(self
            .verifications_guard()?
            .iter()
            .filter(|entry| entry.timestamp >= start && entry.timestamp < end)
            .cloned()
            .collect())
    }

    async fn verifications_for_key(
        &self,
        key_hash: &str,
        limit: usize,
    ) -> AppResult<Vec<VerificationLogEntry>> {
        Ok(self
            .verifications_guard()?
            .iter()
            .rev()
            .filter(|entry| entry.key_hash == key_hash)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_verifications(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let mut guard = self.verifications_guard()?;
        let before = guard.len();
        guard.retain(|entry| entry.timestamp >= older_than);
        Ok((before - guard.len()) as u64)
    }

    async fn put_rollup(&self, bucket: &RollupBucket) -> AppResult<()> {
        self.rollups.insert(
            (
                bucket.namespace.clone(),
                bucket.key_hash.clone(),
                bucket.period,
                bucket.bucket_start,
            ),
            bucket.clone(),
        );
        Ok(())
    }

    async fn rollups_in_window(
        &self,
        period: RollupPeriod,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<RollupBucket>> {
        Ok(self
            .rollups
            .iter()
            .filter(|entry| {
                entry.period == period && entry.bucket_start >= start && entry.bucket_start < end
            })
            .map(|entry| entry.clone())
            .collect())
    }

    async fn get_rollup(
        &self,
        namespace: &str,
        key_hash: Option<&str>,
        period: RollupPeriod,
        bucket_start: DateTime<Utc>,
    ) -> AppResult<Option<RollupBucket>> {
        Ok(self
            .rollups
            .get(&(
                namespace.to_owned(),
                key_hash.map(str::to_owned),
                period,
                bucket_start,
            ))
            .map(|entry| entry.clone()))
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn insert_role(&self, role: &Role) -> AppResult<()> {
        if self.roles.iter().any(|entry| entry.name == role.name) {
            return Err(AppError::already_exists(format!("Role '{}'", role.name)));
        }
        self.roles.insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn find_role(&self, role_id: &str) -> AppResult<Option<Role>> {
        Ok(self.roles.get(role_id).map(|entry| entry.clone()))
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.roles.iter().map(|entry| entry.clone()).collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn delete_role(&self, role_id: &str) -> AppResult<()> {
        self.roles
            .remove(role_id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("Role"))
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn insert_permission(&self, permission: &Permission) -> AppResult<()> {
        if self
            .permissions
            .iter()
            .any(|entry| entry.name == permission.name)
        {
            return Err(AppError::already_exists(format!(
                "Permission '{}'",
                permission.name
            )));
        }
        self.permissions
            .insert(permission.id.clone(), permission.clone());
        Ok(())
    }

    async fn find_permission(&self, permission_id: &str) -> AppResult<Option<Permission>> {
        Ok(self.permissions.get(permission_id).map(|entry| entry.clone()))
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let mut permissions: Vec<Permission> =
            self.permissions.iter().map(|entry| entry.clone()).collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn delete_permission(&self, permission_id: &str) -> AppResult<()> {
        self.permissions
            .remove(permission_id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("Permission"))
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> AppResult<()> {
        self.audit_guard()?.push(entry.clone());
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> AppResult<Vec<AuditLogEntry>> {
        Ok(self
            .audit_guard()?
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
