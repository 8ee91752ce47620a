// ABOUTME: Entity types and request/response DTOs for keys, RBAC, logs, and rollups
// ABOUTME: Canonical definitions shared by the stores, the verifier, and lifecycle code
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Data Model
//!
//! Every table-backed entity gets its own statically-typed struct; record
//! kinds are never distinguished by runtime tag fields. Metadata and
//! verification tags are opaque [`serde_json::Value`] blobs passed through
//! verbatim — the core never inspects them.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Outcome of a single verification attempt (stable wire contract)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeCode {
    /// The key is valid and all policies passed
    Valid,
    /// No key record matches the presented secret's digest
    NotFound,
    /// The key has been revoked
    Revoked,
    /// The key is disabled
    Disabled,
    /// The key's absolute expiration has passed
    Expired,
    /// The key was superseded by rotation and its grace window has ended
    RotationGraceExpired,
    /// The key's usage credits are exhausted
    UsageExceeded,
    /// A rate limit (per-key or per-owner) rejected the attempt
    RateLimited,
}

impl OutcomeCode {
    /// String representation for storage and the wire
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::NotFound => "NOT_FOUND",
            Self::Revoked => "REVOKED",
            Self::Disabled => "DISABLED",
            Self::Expired => "EXPIRED",
            Self::RotationGraceExpired => "ROTATION_GRACE_EXPIRED",
            Self::UsageExceeded => "USAGE_EXCEEDED",
            Self::RateLimited => "RATE_LIMITED",
        }
    }

    /// Whether this outcome represents a successful verification
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl Display for OutcomeCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(Self::Valid),
            "NOT_FOUND" => Ok(Self::NotFound),
            "REVOKED" => Ok(Self::Revoked),
            "DISABLED" => Ok(Self::Disabled),
            "EXPIRED" => Ok(Self::Expired),
            "ROTATION_GRACE_EXPIRED" => Ok(Self::RotationGraceExpired),
            "USAGE_EXCEEDED" => Ok(Self::UsageExceeded),
            "RATE_LIMITED" => Ok(Self::RateLimited),
            _ => Err(AppError::invalid_input(format!("Invalid outcome code: {s}"))),
        }
    }
}

/// Interval classes for credit refill, mapped to fixed millisecond spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefillInterval {
    /// Every hour
    Hourly,
    /// Every day
    Daily,
    /// Every seven days
    Weekly,
    /// Every 30 days (monthly approximation)
    Monthly,
}

impl RefillInterval {
    /// Fixed span of this interval in milliseconds
    #[must_use]
    pub const fn span_ms(&self) -> i64 {
        match self {
            Self::Hourly => 3_600_000,
            Self::Daily => 86_400_000,
            Self::Weekly => 604_800_000,
            Self::Monthly => 2_592_000_000,
        }
    }

    /// String representation for database storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl FromStr for RefillInterval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(AppError::invalid_input(format!(
                "Invalid refill interval: {s}"
            ))),
        }
    }
}

/// Credit refill policy attached to a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillPolicy {
    /// Credit allotment restored on each refill
    pub amount: i64,
    /// How often credits reset
    pub interval: RefillInterval,
    /// When credits were last reset
    pub last_refill_at: DateTime<Utc>,
}

/// Per-key rate-limit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests admitted per window
    pub limit: u32,
    /// Window length in milliseconds
    pub duration_ms: i64,
}

/// Replacement limit/duration for a (subject, namespace) pair, taking
/// precedence over the key's or owner's default policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitOverride {
    /// Key digest or owner id the override applies to
    pub subject: String,
    /// Namespace the override is scoped to
    pub namespace: String,
    /// Replacement request limit
    pub limit: u32,
    /// Replacement window length in milliseconds
    pub duration_ms: i64,
    /// When the override was created
    pub created_at: DateTime<Utc>,
}

/// Result of a rate-limit check-and-consume
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Slots left in the current window after this call
    pub remaining: u32,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

/// Rate-limit summary attached to verification responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Slots left in the current window
    pub remaining: u32,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

/// The central key record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Stable surface identifier
    pub id: String,
    /// One-way SHA-256 digest of the secret; sole lookup key
    pub key_hash: String,
    /// Display prefix (e.g. `kg_live_`)
    pub key_prefix: String,
    /// Display-safe partial secret for UIs
    pub key_hint: String,
    /// Opaque owner identifier supplied by the embedding application
    pub owner_id: String,
    /// Logical tenant/environment partition
    pub namespace: String,
    /// Human-readable name
    pub name: Option<String>,
    /// Free-form metadata returned verbatim on successful verification
    pub meta: Option<serde_json::Value>,
    /// Deployment environment tag (e.g. `production`, `test`)
    pub environment: Option<String>,
    /// When the key was created
    pub created_at: DateTime<Utc>,
    /// When the key was last updated
    pub updated_at: DateTime<Utc>,
    /// Set when the key was soft-revoked
    pub revoked_at: Option<DateTime<Utc>>,
    /// Set when the key was superseded by rotation with a grace period
    pub rotation_grace_end: Option<DateTime<Utc>>,
    /// Optional absolute expiration instant
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the key is enabled (default true)
    pub enabled: bool,
    /// Usage credits left; `None` means unlimited usage
    pub remaining: Option<i64>,
    /// Optional periodic credit refill policy
    pub refill: Option<RefillPolicy>,
    /// Optional per-key rate-limit policy
    pub ratelimit: Option<RateLimitPolicy>,
    /// Directly-assigned permission ids
    pub permissions: Vec<String>,
    /// Assigned role ids
    pub roles: Vec<String>,
    /// Digest of the predecessor key when this key was produced by rotation
    pub rotated_from: Option<String>,
    /// Reference to an externally issued key for mirrored-provider integration
    pub external_key_id: Option<String>,
}

/// Named atomic capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Unique identifier
    pub id: String,
    /// Unique name (opaque string, no hierarchy)
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// When the permission was created
    pub created_at: DateTime<Utc>,
}

/// Named bundle of permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Unique identifier
    pub id: String,
    /// Unique name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Permission ids bundled by this role (order irrelevant)
    pub permission_ids: Vec<String>,
    /// When the role was created
    pub created_at: DateTime<Utc>,
}

/// Resolved authorization for a verified key: direct permissions unioned with
/// role-inherited ones, plus the role names themselves
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedAccess {
    /// Deduplicated permission names
    pub permissions: Vec<String>,
    /// Role names
    pub roles: Vec<String>,
}

/// Append-only record of a single verification attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationLogEntry {
    /// Unique identifier
    pub id: String,
    /// Digest of the verified key, or [`crate::constants::NOT_FOUND_DIGEST`]
    pub key_hash: String,
    /// Namespace the attempt was recorded under
    pub namespace: String,
    /// When the attempt happened
    pub timestamp: DateTime<Utc>,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Outcome code
    pub code: OutcomeCode,
    /// Credits left after the attempt, if the key meters usage
    pub remaining: Option<i64>,
    /// Rate-limit slots left after the attempt, if a limit applied
    pub ratelimit_remaining: Option<u32>,
    /// Caller-supplied opaque tag map
    pub tags: Option<serde_json::Value>,
    /// Caller IP address
    pub ip_address: Option<String>,
}

/// Rollup period class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupPeriod {
    /// One-hour buckets
    Hour,
    /// One-day buckets
    Day,
}

impl RollupPeriod {
    /// String representation for database storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl FromStr for RollupPeriod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            _ => Err(AppError::invalid_input(format!(
                "Invalid rollup period: {s}"
            ))),
        }
    }
}

/// Per-outcome attempt counters inside a rollup bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    /// VALID outcomes
    pub valid: u64,
    /// NOT_FOUND outcomes
    pub not_found: u64,
    /// REVOKED outcomes
    pub revoked: u64,
    /// DISABLED outcomes
    pub disabled: u64,
    /// EXPIRED outcomes
    pub expired: u64,
    /// ROTATION_GRACE_EXPIRED outcomes
    pub rotation_grace_expired: u64,
    /// USAGE_EXCEEDED outcomes
    pub usage_exceeded: u64,
    /// RATE_LIMITED outcomes
    pub rate_limited: u64,
}

impl OutcomeCounts {
    /// Tally one outcome
    pub fn record(&mut self, code: OutcomeCode) {
        match code {
            OutcomeCode::Valid => self.valid += 1,
            OutcomeCode::NotFound => self.not_found += 1,
            OutcomeCode::Revoked => self.revoked += 1,
            OutcomeCode::Disabled => self.disabled += 1,
            OutcomeCode::Expired => self.expired += 1,
            OutcomeCode::RotationGraceExpired => self.rotation_grace_expired += 1,
            OutcomeCode::UsageExceeded => self.usage_exceeded += 1,
            OutcomeCode::RateLimited => self.rate_limited += 1,
        }
    }

    /// Merge another counter set into this one
    pub fn merge(&mut self, other: &Self) {
        self.valid += other.valid;
        self.not_found += other.not_found;
        self.revoked += other.revoked;
        self.disabled += other.disabled;
        self.expired += other.expired;
        self.rotation_grace_expired += other.rotation_grace_expired;
        self.usage_exceeded += other.usage_exceeded;
        self.rate_limited += other.rate_limited;
    }

    /// Total attempts across all outcomes
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.valid
            + self.not_found
            + self.revoked
            + self.disabled
            + self.expired
            + self.rotation_grace_expired
            + self.usage_exceeded
            + self.rate_limited
    }
}

/// Time-bucketed aggregate of verification attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupBucket {
    /// Namespace the bucket is scoped to
    pub namespace: String,
    /// Key digest, or `None` for the namespace-wide aggregate
    pub key_hash: Option<String>,
    /// Period class
    pub period: RollupPeriod,
    /// Start of the bucket's time range
    pub bucket_start: DateTime<Utc>,
    /// Total attempts in the bucket
    pub total: u64,
    /// Per-outcome counters
    pub outcomes: OutcomeCounts,
}

/// Append-only record of a mutating administrative or lifecycle operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique identifier
    pub id: String,
    /// Action tag, e.g. `key.created`
    pub action: String,
    /// Optional actor id
    pub actor_id: Option<String>,
    /// Optional target key digest
    pub key_hash: Option<String>,
    /// When the operation happened
    pub timestamp: DateTime<Utc>,
    /// Structured detail payload
    pub detail: serde_json::Value,
}

/// Request to mint a new key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateKeyRequest {
    /// Opaque owner identifier
    pub owner_id: String,
    /// Optional human-readable name
    pub name: Option<String>,
    /// Optional metadata blob
    pub meta: Option<serde_json::Value>,
    /// Key prefix; falls back to the configured default
    pub prefix: Option<String>,
    /// Optional absolute expiration
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional usage-credit allotment
    pub remaining: Option<i64>,
    /// Optional refill amount (requires `refill_interval`)
    pub refill_amount: Option<i64>,
    /// Optional refill interval class
    pub refill_interval: Option<RefillInterval>,
    /// Optional per-key rate-limit policy
    pub ratelimit: Option<RateLimitPolicy>,
    /// Role ids to assign
    pub roles: Option<Vec<String>>,
    /// Permission ids to assign directly
    pub permissions: Option<Vec<String>>,
    /// Optional environment tag
    pub environment: Option<String>,
    /// Namespace; falls back to the configured default
    pub namespace: Option<String>,
    /// Entropy bytes for the secret; falls back to the configured default
    pub key_bytes: Option<usize>,
}

/// One-time result of minting or rotating a key. The plaintext is never
/// stored or logged again.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedKey {
    /// The plaintext secret, shown exactly once
    pub key: String,
    /// The new key's surface identifier
    pub key_id: String,
}

/// Partial patch for an existing key. Outer `None` leaves a field unchanged;
/// inner `None` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyPatch {
    /// New name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<Option<String>>,
    /// New metadata blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Option<serde_json::Value>>,
    /// New expiration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    /// New credit counter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<Option<i64>>,
    /// New rate-limit policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratelimit: Option<Option<RateLimitPolicy>>,
    /// New enabled flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Request to verify a presented credential
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    /// The presented plaintext secret
    pub key: String,
    /// Caller-supplied opaque tag map, recorded in the verification log
    pub tags: Option<serde_json::Value>,
    /// Caller IP address
    pub ip_address: Option<String>,
    /// Namespace hint; informational only — the key's own namespace is
    /// authoritative for policy lookups
    pub namespace: Option<String>,
}

impl VerifyRequest {
    /// Build a bare request carrying only the secret
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tags: None,
            ip_address: None,
            namespace: None,
        }
    }
}

/// Result of a verification attempt. Failed verification is the common case
/// callers must branch on, so it is a value here, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// Whether the key is valid
    pub valid: bool,
    /// Outcome code
    pub code: OutcomeCode,
    /// Surface identifier of the matched key, when one was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Owner of the matched key, when one was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Metadata blob, returned verbatim on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Credits left after this attempt, if the key meters usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    /// Rate-limit state, when a limit applied to this attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratelimit: Option<RateLimitInfo>,
    /// Resolved permission names; empty on every failure path
    pub permissions: Vec<String>,
    /// Resolved role names; empty on every failure path
    pub roles: Vec<String>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Verification {
    /// Build a failure result carrying only the outcome code
    #[must_use]
    pub fn failure(code: OutcomeCode) -> Self {
        Self {
            valid: false,
            code,
            key_id: None,
            owner_id: None,
            meta: None,
            remaining: None,
            ratelimit: None,
            permissions: Vec::new(),
            roles: Vec::new(),
            message: None,
        }
    }
}
