// ABOUTME: SQLite-backed store implementation using sqlx runtime queries
// ABOUTME: Conditional UPDATEs give the per-record atomicity the store contract requires
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # SQLite Store
//!
//! Production substrate. Schema bootstrap runs `CREATE TABLE IF NOT EXISTS`
//! statements on connect. Credit debits and bucket consumption are single
//! conditional statements, so SQLite's writer serialization is enough to
//! uphold the atomicity contract — no application-level locking.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use tracing::warn;

use super::{
    AuditStore, CreditDebit, KeyStore, LogStore, PermissionStore, RateLimitStore, RoleStore,
};
use crate::errors::{AppError, AppResult};
use crate::models::{
    AuditLogEntry, KeyRecord, OutcomeCode, OutcomeCounts, Permission, RateLimitDecision,
    RateLimitOverride, RateLimitPolicy, RefillInterval, RefillPolicy, Role, RollupBucket,
    RollupPeriod, VerificationLogEntry,
};

/// SQLite implementation of every store trait
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Connect to the database and bootstrap the schema
    pub async fn new(database_url: &str) -> AppResult<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:") {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_owned()
        };

        let pool = SqlitePool::connect(&connection_options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to SQLite: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool (the caller is responsible for migrations)
    #[must_use]
    pub const fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run schema bootstrap
    pub async fn migrate(&self) -> AppResult<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                key_hash TEXT NOT NULL UNIQUE,
                key_prefix TEXT NOT NULL,
                key_hint TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name TEXT,
                meta TEXT,
                environment TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                revoked_at TIMESTAMP,
                rotation_grace_end TIMESTAMP,
                expires_at TIMESTAMP,
                enabled INTEGER NOT NULL DEFAULT 1,
                remaining INTEGER,
                refill_amount INTEGER,
                refill_interval TEXT,
                last_refill_at TIMESTAMP,
                ratelimit_limit INTEGER,
                ratelimit_duration_ms INTEGER,
                permissions TEXT NOT NULL DEFAULT '[]',
                role_ids TEXT NOT NULL DEFAULT '[]',
                rotated_from TEXT,
                external_key_id TEXT
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_api_keys_owner
                ON api_keys (owner_id, namespace)
            ",
            r"
            CREATE TABLE IF NOT EXISTS rate_limit_buckets (
                subject TEXT NOT NULL,
                namespace TEXT NOT NULL,
                window_start TIMESTAMP NOT NULL,
                request_count INTEGER NOT NULL,
                PRIMARY KEY (subject, namespace)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS rate_limit_overrides (
                subject TEXT NOT NULL,
                namespace TEXT NOT NULL,
                limit_value INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (subject, namespace)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS verification_logs (
                id TEXT PRIMARY KEY,
                key_hash TEXT NOT NULL,
                namespace TEXT NOT NULL,
                timestamp TIMESTAMP NOT NULL,
                success INTEGER NOT NULL,
                code TEXT NOT NULL,
                remaining INTEGER,
                ratelimit_remaining INTEGER,
                tags TEXT,
                ip_address TEXT
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_verification_logs_timestamp
                ON verification_logs (timestamp)
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_verification_logs_key
                ON verification_logs (key_hash, timestamp)
            ",
            r"
            CREATE TABLE IF NOT EXISTS analytics_rollups (
                namespace TEXT NOT NULL,
                key_hash TEXT NOT NULL DEFAULT '',
                period TEXT NOT NULL,
                bucket_start TIMESTAMP NOT NULL,
                total INTEGER NOT NULL,
                valid_count INTEGER NOT NULL DEFAULT 0,
                not_found_count INTEGER NOT NULL DEFAULT 0,
                revoked_count INTEGER NOT NULL DEFAULT 0,
                disabled_count INTEGER NOT NULL DEFAULT 0,
                expired_count INTEGER NOT NULL DEFAULT 0,
                rotation_grace_expired_count INTEGER NOT NULL DEFAULT 0,
                usage_exceeded_count INTEGER NOT NULL DEFAULT 0,
                rate_limited_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (namespace, key_hash, period, bucket_start)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS permissions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at TIMESTAMP NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS roles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                permission_ids TEXT NOT NULL DEFAULT '[]',
                created_at TIMESTAMP NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                actor_id TEXT,
                key_hash TEXT,
                timestamp TIMESTAMP NOT NULL,
                detail TEXT NOT NULL
            )
            ",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        }
        Ok(())
    }

    fn row_to_key(row: &sqlx::sqlite::SqliteRow) -> AppResult<KeyRecord> {
        let meta = row
            .get::<Option<String>, _>("meta")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| AppError::internal(format!("Failed to parse key meta: {e}")))?;

        let permissions: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("permissions")).map_err(|e| {
                AppError::internal(format!("Failed to parse key permissions: {e}"))
            })?;
        let roles: Vec<String> = serde_json::from_str(&row.get::<String, _>("role_ids"))
            .map_err(|e| AppError::internal(format!("Failed to parse key roles: {e}")))?;

        let refill = match (
            row.get::<Option<i64>, _>("refill_amount"),
            row.get::<Option<String>, _>("refill_interval"),
            row.get::<Option<DateTime<Utc>>, _>("last_refill_at"),
        ) {
            (Some(amount), Some(interval), Some(last_refill_at)) => Some(RefillPolicy {
                amount,
                interval: interval.parse::<RefillInterval>()?,
                last_refill_at,
            }),
            _ => None,
        };

        let ratelimit = match (
            row.get::<Option<i64>, _>("ratelimit_limit"),
            row.get::<Option<i64>, _>("ratelimit_duration_ms"),
        ) {
            (Some(limit), Some(duration_ms)) => Some(RateLimitPolicy {
                limit: u32::try_from(limit).map_err(|e| {
                    AppError::internal(format!("Integer conversion failed for ratelimit: {e}"))
                })?,
                duration_ms,
            }),
            _ => None,
        };

        Ok(KeyRecord {
            id: row.get("id"),
            key_hash: row.get("key_hash"),
            key_prefix: row.get("key_prefix"),
            key_hint: row.get("key_hint"),
            owner_id: row.get("owner_id"),
            namespace: row.get("namespace"),
            name: row.get("name"),
            meta,
            environment: row.get("environment"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            revoked_at: row.get("revoked_at"),
            rotation_grace_end: row.get("rotation_grace_end"),
            expires_at: row.get("expires_at"),
            enabled: row.get("enabled"),
            remaining: row.get("remaining"),
            refill,
            ratelimit,
            permissions,
            roles,
            rotated_from: row.get("rotated_from"),
            external_key_id: row.get("external_key_id"),
        })
    }

    fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> AppResult<VerificationLogEntry> {
        let tags = row
            .get::<Option<String>, _>("tags")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| AppError::internal(format!("Failed to parse log tags: {e}")))?;
        let ratelimit_remaining = row
            .get::<Option<i64>, _>("ratelimit_remaining")
            .map(u32::try_from)
            .transpose()
            .map_err(|e| {
                AppError::internal(format!(
                    "Integer conversion failed for ratelimit_remaining: {e}"
                ))
            })?;

        Ok(VerificationLogEntry {
            id: row.get("id"),
            key_hash: row.get("key_hash"),
            namespace: row.get("namespace"),
            timestamp: row.get("timestamp"),
            success: row.get("success"),
            code: row.get::<String, _>("code").parse::<OutcomeCode>()?,
            remaining: row.get("remaining"),
            ratelimit_remaining,
            tags,
            ip_address: row.get("ip_address"),
        })
    }

    fn row_to_rollup(row: &sqlx::sqlite::SqliteRow) -> AppResult<RollupBucket> {
        let key_hash: String = row.get("key_hash");
        let count = |column: &str| -> AppResult<u64> {
            u64::try_from(row.get::<i64, _>(column)).map_err(|e| {
                AppError::internal(format!("Integer conversion failed for {column}: {e}"))
            })
        };

        Ok(RollupBucket {
            namespace: row.get("namespace"),
            key_hash: if key_hash.is_empty() {
                None
            } else {
                Some(key_hash)
            },
            period: row.get::<String, _>("period").parse::<RollupPeriod>()?,
            bucket_start: row.get("bucket_start"),
            total: count("total")?,
            outcomes: OutcomeCounts {
                valid: count("valid_count")?,
                not_found: count("not_found_count")?,
                revoked: count("revoked_count")?,
                disabled: count("disabled_count")?,
                expired: count("expired_count")?,
                rotation_grace_expired: count("rotation_grace_expired_count")?,
                usage_exceeded: count("usage_exceeded_count")?,
                rate_limited: count("rate_limited_count")?,
            },
        })
    }

    fn json_text(value: Option<&serde_json::Value>) -> AppResult<Option<String>> {
        value
            .map(|v| {
                serde_json::to_string(v)
                    .map_err(|e| AppError::internal(format!("Failed to serialize JSON: {e}")))
            })
            .transpose()
    }
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn insert_key(&self, key: &KeyRecord) -> AppResult<()> {
        let permissions = serde_json::to_string(&key.permissions)
            .map_err(|e| AppError::internal(format!("Failed to serialize permissions: {e}")))?;
        let roles = serde_json::to_string(&key.roles)
            .map_err(|e| AppError::internal(format!("Failed to serialize roles: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO api_keys (
                id, key_hash, key_prefix, key_hint, owner_id, namespace, name, meta,
                environment, created_at, updated_at, revoked_at, rotation_grace_end,
                expires_at, enabled, remaining, refill_amount, refill_interval,
                last_refill_at, ratelimit_limit, ratelimit_duration_ms,
                permissions, role_ids, rotated_from, external_key_id
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            ",
        )
        .bind(&key.id)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.key_hint)
        .bind(&key.owner_id)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(Self::json_text(key.meta.as_ref())?)
        .bind(&key.environment)
        .bind(key.created_at)
        .bind(key.updated_at)
        .bind(key.revoked_at)
        .bind(key.rotation_grace_end)
        .bind(key.expires_at)
        .bind(key.enabled)
        .bind(key.remaining)
        .bind(key.refill.as_ref().map(|r| r.amount))
        .bind(key.refill.as_ref().map(|r| r.interval.as_str()))
        .bind(key.refill.as_ref().map(|r| r.last_refill_at))
        .bind(key.ratelimit.map(|r| i64::from(r.limit)))
        .bind(key.ratelimit.map(|r| r.duration_ms))
        .bind(permissions)
        .bind(roles)
        .bind(&key.rotated_from)
        .bind(&key.external_key_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::already_exists("API key digest")
            }
            _ => AppError::database(format!("Failed to insert API key: {e}")),
        })?;

        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<KeyRecord>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get API key by digest: {e}")))?;
        row.as_ref().map(Self::row_to_key).transpose()
    }

    async fn find_by_id(&self, key_id: &str) -> AppResult<Option<KeyRecord>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get API key by id: {e}")))?;
        row.as_ref().map(Self::row_to_key).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str, namespace: &str) -> AppResult<Vec<KeyRecord>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM api_keys
            WHERE owner_id = $1 AND namespace = $2
            ORDER BY created_at DESC
            ",
        )
        .bind(owner_id)
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list API keys: {e}")))?;
        rows.iter().map(Self::row_to_key).collect()
    }

    async fn update_key(&self, key: &KeyRecord) -> AppResult<()> {
        let permissions = serde_json::to_string(&key.permissions)
            .map_err(|e| AppError::internal(format!("Failed to serialize permissions: {e}")))?;
        let roles = serde_json::to_string(&key.roles)
            .map_err(|e| AppError::internal(format!("Failed to serialize roles: {e}")))?;

        let result = sqlx::query(
            r"
            UPDATE api_keys SET
                name = $1, meta = $2, environment = $3, updated_at = $4,
                revoked_at = $5, rotation_grace_end = $6, expires_at = $7,
                enabled = $8, remaining = $9, refill_amount = $10,
                refill_interval = $11, last_refill_at = $12,
                ratelimit_limit = $13, ratelimit_duration_ms = $14,
                permissions = $15, role_ids = $16
            WHERE id = $17
            ",
        )
        .bind(&key.name)
        .bind(Self::json_text(key.meta.as_ref())?)
        .bind(&key.environment)
        .bind(key.updated_at)
        .bind(key.revoked_at)
        .bind(key.rotation_grace_end)
        .bind(key.expires_at)
        .bind(key.enabled)
        .bind(key.remaining)
        .bind(key.refill.as_ref().map(|r| r.amount))
        .bind(key.refill.as_ref().map(|r| r.interval.as_str()))
        .bind(key.refill.as_ref().map(|r| r.last_refill_at))
        .bind(key.ratelimit.map(|r| i64::from(r.limit)))
        .bind(key.ratelimit.map(|r| r.duration_ms))
        .bind(permissions)
        .bind(roles)
        .bind(&key.id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update API key: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("API key"));
        }
        Ok(())
    }

    async fn delete_by_id(&self, key_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete API key: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("API key"));
        }
        Ok(())
    }

    async fn save_credits(
        &self,
        key_hash: &str,
        remaining: i64,
        last_refill_at: DateTime<Utc>,
        observed_refill_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        // Compare-and-set on the refill marker: a concurrent refill moves
        // last_refill_at first, and the late writer's update matches no row
        let result = sqlx::query(
            r"
            UPDATE api_keys SET remaining = $1, last_refill_at = $2
            WHERE key_hash = $3 AND last_refill_at = $4
            ",
        )
        .bind(remaining)
        .bind(last_refill_at)
        .bind(key_hash)
        .bind(observed_refill_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to save credits: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn debit_credits(&self, key_hash: &str) -> AppResult<CreditDebit> {
        // Conditional decrement: the WHERE clause guarantees remaining never
        // goes below zero, even under concurrent verifications
        let debited = sqlx::query(
            r"
            UPDATE api_keys SET remaining = remaining - 1
            WHERE key_hash = $1 AND remaining IS NOT NULL AND remaining > 0
            RETURNING remaining
            ",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to debit credits: {e}")))?;

        if let Some(row) = debited {
            return Ok(CreditDebit::Debited(row.get::<i64, _>("remaining")));
        }

        let row = sqlx::query("SELECT remaining FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to read credits: {e}")))?
            .ok_or_else(|| AppError::not_found("API key"))?;

        match row.get::<Option<i64>, _>("remaining") {
            None => Ok(CreditDebit::Unlimited),
            Some(_) => Ok(CreditDebit::Exhausted),
        }
    }

    async fn purge_expired(
        &self,
        namespace: Option<&str>,
        older_than: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = if let Some(namespace) = namespace {
            sqlx::query(
                r"
                DELETE FROM api_keys
                WHERE namespace = $1 AND expires_at IS NOT NULL AND expires_at < $2
                ",
            )
            .bind(namespace)
            .bind(older_than)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                DELETE FROM api_keys
                WHERE expires_at IS NOT NULL AND expires_at < $1
                ",
            )
            .bind(older_than)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| AppError::database(format!("Failed to purge expired keys: {e}")))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn check_and_consume(
        &self,
        subject: &str,
        namespace: &str,
        limit: u32,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitDecision> {
        let duration = Duration::milliseconds(duration_ms);
        let rollover_threshold = now - duration;

        // Fresh bucket, or rollover of a fully elapsed window; either way the
        // first slot of the new window is consumed by this single statement
        let opened = sqlx::query(
            r"
            INSERT INTO rate_limit_buckets (subject, namespace, window_start, request_count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (subject, namespace) DO UPDATE
            SET window_start = excluded.window_start, request_count = 1
            WHERE rate_limit_buckets.window_start < $4
            ",
        )
        .bind(subject)
        .bind(namespace)
        .bind(now)
        .bind(rollover_threshold)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to open rate-limit bucket: {e}")))?;

        if opened.rows_affected() == 1 {
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: limit.saturating_sub(1),
                reset_at: now + duration,
            });
        }

        // Bucket exists in the current window: conditional increment
        let consumed = sqlx::query(
            r"
            UPDATE rate_limit_buckets SET request_count = request_count + 1
            WHERE subject = $1 AND namespace = $2 AND request_count < $3
            RETURNING request_count, window_start
            ",
        )
        .bind(subject)
        .bind(namespace)
        .bind(i64::from(limit))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to consume rate-limit slot: {e}")))?;

        if let Some(row) = consumed {
            let count = u32::try_from(row.get::<i64, _>("request_count")).map_err(|e| {
                AppError::internal(format!("Integer conversion failed for request_count: {e}"))
            })?;
            let window_start: DateTime<Utc> = row.get("window_start");
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: limit.saturating_sub(count),
                reset_at: window_start + duration,
            });
        }

        // Window full: denied attempts do not consume a slot
        let reset_at = sqlx::query(
            r"
            SELECT window_start FROM rate_limit_buckets
            WHERE subject = $1 AND namespace = $2
            ",
        )
        .bind(subject)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read rate-limit bucket: {e}")))?
        .map_or_else(
            || {
                warn!(subject, namespace, "Rate-limit bucket vanished mid-check");
                now + duration
            },
            |row| row.get::<DateTime<Utc>, _>("window_start") + duration,
        );

        Ok(RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at,
        })
    }

    async fn get_override(
        &self,
        subject: &str,
        namespace: &str,
    ) -> AppResult<Option<RateLimitOverride>> {
        let row = sqlx::query(
            r"
            SELECT subject, namespace, limit_value, duration_ms, created_at
            FROM rate_limit_overrides
            WHERE subject = $1 AND namespace = $2
            ",
        )
        .bind(subject)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get rate-limit override: {e}")))?;

        row.map(|row| {
            Ok(RateLimitOverride {
                subject: row.get("subject"),
                namespace: row.get("namespace"),
                limit: u32::try_from(row.get::<i64, _>("limit_value")).map_err(|e| {
                    AppError::internal(format!("Integer conversion failed for limit_value: {e}"))
                })?,
                duration_ms: row.get("duration_ms"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    async fn set_override(&self, record: &RateLimitOverride) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO rate_limit_overrides
                (subject, namespace, limit_value, duration_ms, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&record.subject)
        .bind(&record.namespace)
        .bind(i64::from(record.limit))
        .bind(record.duration_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to set rate-limit override: {e}")))?;
        Ok(())
    }

    async fn clear_override(&self, subject: &str, namespace: &str) -> AppResult<()> {
        sqlx::query(
            r"
            DELETE FROM rate_limit_overrides WHERE subject = $1 AND namespace = $2
            ",
        )
        .bind(subject)
        .bind(namespace)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to clear rate-limit override: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append_verification(&self, entry: &VerificationLogEntry) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO verification_logs (
                id, key_hash, namespace, timestamp, success, code,
                remaining, ratelimit_remaining, tags, ip_address
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&entry.id)
        .bind(&entry.key_hash)
        .bind(&entry.namespace)
        .bind(entry.timestamp)
        .bind(entry.success)
        .bind(entry.code.as_str())
        .bind(entry.remaining)
        .bind(entry.ratelimit_remaining.map(i64::from))
        .bind(Self::json_text(entry.tags.as_ref())?)
        .bind(&entry.ip_address)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to append verification log: {e}")))?;
        Ok(())
    }

    async fn verifications_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<VerificationLogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM verification_logs
            WHERE timestamp >= $1 AND timestamp < $2
            ORDER BY timestamp ASC
            ",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read verification logs: {e}")))?;
        rows.iter().map(Self::row_to_log).collect()
    }

    async fn verifications_for_key(
        &self,
        key_hash: &str,
        limit: usize,
    ) -> AppResult<Vec<VerificationLogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM verification_logs
            WHERE key_hash = $1
            ORDER BY timestamp DESC
            LIMIT $2
            ",
        )
        .bind(key_hash)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read key verification logs: {e}")))?;
        rows.iter().map(Self::row_to_log).collect()
    }

    async fn purge_verifications(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM verification_logs WHERE timestamp < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to purge verification logs: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn put_rollup(&self, bucket: &RollupBucket) -> AppResult<()> {
        let to_i64 = |value: u64, column: &str| -> AppResult<i64> {
            i64::try_from(value).map_err(|e| {
                AppError::internal(format!("Integer conversion failed for {column}: {e}"))
            })
        };

        sqlx::query(
            r"
            INSERT OR REPLACE INTO analytics_rollups (
                namespace, key_hash, period, bucket_start, total,
                valid_count, not_found_count, revoked_count, disabled_count,
                expired_count, rotation_grace_expired_count,
                usage_exceeded_count, rate_limited_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(&bucket.namespace)
        .bind(bucket.key_hash.as_deref().unwrap_or(""))
        .bind(bucket.period.as_str())
        .bind(bucket.bucket_start)
        .bind(to_i64(bucket.total, "total")?)
        .bind(to_i64(bucket.outcomes.valid, "valid_count")?)
        .bind(to_i64(bucket.outcomes.not_found, "not_found_count")?)
        .bind(to_i64(bucket.outcomes.revoked, "revoked_count")?)
        .bind(to_i64(bucket.outcomes.disabled, "disabled_count")?)
        .bind(to_i64(bucket.outcomes.expired, "expired_count")?)
        .bind(to_i64(
            bucket.outcomes.rotation_grace_expired,
            "rotation_grace_expired_count",
        )?)
        .bind(to_i64(bucket.outcomes.usage_exceeded, "usage_exceeded_count")?)
        .bind(to_i64(bucket.outcomes.rate_limited, "rate_limited_count")?)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert rollup bucket: {e}")))?;
        Ok(())
    }

    async fn rollups_in_window(
        &self,
        period: RollupPeriod,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<RollupBucket>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM analytics_rollups
            WHERE period = $1 AND bucket_start >= $2 AND bucket_start < $3
            ",
        )
        .bind(period.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read rollup buckets: {e}")))?;
        rows.iter().map(Self::row_to_rollup).collect()
    }

    async fn get_rollup(
        &self,
        namespace: &str,
        key_hash: Option<&str>,
        period: RollupPeriod,
        bucket_start: DateTime<Utc>,
    ) -> AppResult<Option<RollupBucket>> {
        let row = sqlx::query(
            r"
            SELECT * FROM analytics_rollups
            WHERE namespace = $1 AND key_hash = $2 AND period = $3 AND bucket_start = $4
            ",
        )
        .bind(namespace)
        .bind(key_hash.unwrap_or(""))
        .bind(period.as_str())
        .bind(bucket_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get rollup bucket: {e}")))?;
        row.as_ref().map(Self::row_to_rollup).transpose()
    }
}

#[async_trait]
impl RoleStore for SqliteStore {
    async fn insert_role(&self, role: &Role) -> AppResult<()> {
        let permission_ids = serde_json::to_string(&role.permission_ids)
            .map_err(|e| AppError::internal(format!("Failed to serialize permission ids: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO roles (id, name, description, permission_ids, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(permission_ids)
        .bind(role.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::already_exists(format!("Role '{}'", role.name))
            }
            _ => AppError::database(format!("Failed to insert role: {e}")),
        })?;
        Ok(())
    }

    async fn find_role(&self, role_id: &str) -> AppResult<Option<Role>> {
        let row = sqlx::query("SELECT * FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get role: {e}")))?;

        row.map(|row| {
            let permission_ids: Vec<String> =
                serde_json::from_str(&row.get::<String, _>("permission_ids")).map_err(|e| {
                    AppError::internal(format!("Failed to parse role permission ids: {e}"))
                })?;
            Ok(Role {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                permission_ids,
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let rows = sqlx::query("SELECT * FROM roles ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list roles: {e}")))?;

        rows.iter()
            .map(|row| {
                let permission_ids: Vec<String> =
                    serde_json::from_str(&row.get::<String, _>("permission_ids")).map_err(|e| {
                        AppError::internal(format!("Failed to parse role permission ids: {e}"))
                    })?;
                Ok(Role {
                    id: row.get("id"),
                    name: row.get("name"),
                    description: row.get("description"),
                    permission_ids,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn delete_role(&self, role_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete role: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Role"));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for SqliteStore {
    async fn insert_permission(&self, permission: &Permission) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO permissions (id, name, description, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&permission.id)
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(permission.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::already_exists(format!("Permission '{}'", permission.name))
            }
            _ => AppError::database(format!("Failed to insert permission: {e}")),
        })?;
        Ok(())
    }

    async fn find_permission(&self, permission_id: &str) -> AppResult<Option<Permission>> {
        let row = sqlx::query("SELECT * FROM permissions WHERE id = $1")
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get permission: {e}")))?;

        Ok(row.map(|row| Permission {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        }))
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query("SELECT * FROM permissions ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list permissions: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| Permission {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete_permission(&self, permission_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete permission: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Permission"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> AppResult<()> {
        let detail = serde_json::to_string(&entry.detail)
            .map_err(|e| AppError::internal(format!("Failed to serialize audit detail: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO audit_logs (id, action, actor_id, key_hash, timestamp, detail)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(&entry.id)
        .bind(&entry.action)
        .bind(&entry.actor_id)
        .bind(&entry.key_hash)
        .bind(entry.timestamp)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to append audit entry: {e}")))?;
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> AppResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM audit_logs ORDER BY timestamp DESC LIMIT $1
            ",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read audit entries: {e}")))?;

        rows.iter()
            .map(|row| {
                let detail = serde_json::from_str(&row.get::<String, _>("detail"))
                    .map_err(|e| AppError::internal(format!("Failed to parse audit detail: {e}")))?;
                Ok(AuditLogEntry {
                    id: row.get("id"),
                    action: row.get("action"),
                    actor_id: row.get("actor_id"),
                    key_hash: row.get("key_hash"),
                    timestamp: row.get("timestamp"),
                    detail,
                })
            })
            .collect()
    }
}
