// ABOUTME: Typed store traits for keys, buckets, logs, RBAC records, and audit entries
// ABOUTME: Each trait exposes only the operations the orchestrator and services need
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Store Interfaces
//!
//! Explicit, minimal store traits passed into the services — no ambient
//! transaction context. Implementations must make each individual operation
//! atomic per record: [`KeyStore::debit_credits`] is a conditional
//! check-and-decrement, and [`RateLimitStore::check_and_consume`] never
//! admits two callers for one remaining slot.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AppResult;
use crate::models::{
    AuditLogEntry, KeyRecord, Permission, RateLimitDecision, RateLimitOverride, Role,
    RollupBucket, RollupPeriod, VerificationLogEntry,
};

/// Result of an atomic credit debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditDebit {
    /// The key has no credit counter; nothing was decremented
    Unlimited,
    /// One credit was consumed; carries the post-decrement balance
    Debited(i64),
    /// No credits were left at decrement time; nothing was decremented
    Exhausted,
}

/// Key record storage
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert a new key record
    async fn insert_key(&self, key: &KeyRecord) -> AppResult<()>;

    /// Look up a key by its secret's digest
    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<KeyRecord>>;

    /// Look up a key by its surface identifier
    async fn find_by_id(&self, key_id: &str) -> AppResult<Option<KeyRecord>>;

    /// List keys for an owner within a namespace, newest first
    async fn list_by_owner(&self, owner_id: &str, namespace: &str) -> AppResult<Vec<KeyRecord>>;

    /// Replace a key record in full. The digest must not change; rotation
    /// mints a new record instead.
    async fn update_key(&self, key: &KeyRecord) -> AppResult<()>;

    /// Physically delete a key record (hard revoke)
    async fn delete_by_id(&self, key_id: &str) -> AppResult<()>;

    /// Persist a refill result, conditional on the refill bookkeeping still
    /// matching `observed_refill_at`. Returns `false` without writing when
    /// another caller refilled first; a stale write must never overwrite a
    /// balance that concurrent debits have already moved.
    async fn save_credits(
        &self,
        key_hash: &str,
        remaining: i64,
        last_refill_at: DateTime<Utc>,
        observed_refill_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Atomically consume one usage credit. Must never take `remaining`
    /// below zero; concurrent callers racing for the last credit see exactly
    /// one `Debited(0)` and the rest `Exhausted`.
    async fn debit_credits(&self, key_hash: &str) -> AppResult<CreditDebit>;

    /// Physically delete keys whose expiration passed before `older_than`,
    /// optionally restricted to one namespace. Returns the number removed.
    async fn purge_expired(
        &self,
        namespace: Option<&str>,
        older_than: DateTime<Utc>,
    ) -> AppResult<u64>;
}

/// Rate-limit bucket and override storage
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically check the bucket for (subject, namespace) and consume a
    /// slot if one is available, creating or rolling the bucket as needed
    async fn check_and_consume(
        &self,
        subject: &str,
        namespace: &str,
        limit: u32,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitDecision>;

    /// Fetch the override for (subject, namespace), if any
    async fn get_override(
        &self,
        subject: &str,
        namespace: &str,
    ) -> AppResult<Option<RateLimitOverride>>;

    /// Insert or replace an override
    async fn set_override(&self, record: &RateLimitOverride) -> AppResult<()>;

    /// Remove an override; a no-op when none exists
    async fn clear_override(&self, subject: &str, namespace: &str) -> AppResult<()>;
}

/// Verification log and analytics rollup storage
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one verification log entry; entries are never mutated
    async fn append_verification(&self, entry: &VerificationLogEntry) -> AppResult<()>;

    /// Read entries in the closed-open window `[start, end)`
    async fn verifications_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<VerificationLogEntry>>;

    /// Read the most recent entries for a key digest
    async fn verifications_for_key(
        &self,
        key_hash: &str,
        limit: usize,
    ) -> AppResult<Vec<VerificationLogEntry>>;

    /// Delete entries older than `older_than`. Returns the number removed.
    async fn purge_verifications(&self, older_than: DateTime<Utc>) -> AppResult<u64>;

    /// Replace the rollup bucket identified by (namespace, key digest,
    /// period, bucket start) with the supplied totals. Replacement makes
    /// reprocessing a window idempotent.
    async fn put_rollup(&self, bucket: &RollupBucket) -> AppResult<()>;

    /// Read rollup buckets of one period class whose start falls in
    /// `[start, end)`
    async fn rollups_in_window(
        &self,
        period: RollupPeriod,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<RollupBucket>>;

    /// Fetch one rollup bucket, if present
    async fn get_rollup(
        &self,
        namespace: &str,
        key_hash: Option<&str>,
        period: RollupPeriod,
        bucket_start: DateTime<Utc>,
    ) -> AppResult<Option<RollupBucket>>;
}

/// Role storage
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a role; fails when the name is already taken
    async fn insert_role(&self, role: &Role) -> AppResult<()>;

    /// Look up a role by id
    async fn find_role(&self, role_id: &str) -> AppResult<Option<Role>>;

    /// List all roles
    async fn list_roles(&self) -> AppResult<Vec<Role>>;

    /// Delete a role by id; fails when it does not exist
    async fn delete_role(&self, role_id: &str) -> AppResult<()>;
}

/// Permission storage
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Insert a permission; fails when the name is already taken
    async fn insert_permission(&self, permission: &Permission) -> AppResult<()>;

    /// Look up a permission by id
    async fn find_permission(&self, permission_id: &str) -> AppResult<Option<Permission>>;

    /// List all permissions
    async fn list_permissions(&self) -> AppResult<Vec<Permission>>;

    /// Delete a permission by id; fails when it does not exist
    async fn delete_permission(&self, permission_id: &str) -> AppResult<()>;
}

/// Audit log storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one audit entry; entries are never mutated
    async fn append_audit(&self, entry: &AuditLogEntry) -> AppResult<()>;

    /// Read the most recent audit entries
    async fn recent_audit(&self, limit: usize) -> AppResult<Vec<AuditLogEntry>>;
}
