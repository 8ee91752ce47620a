// ABOUTME: Shared constants for key prefixes, audit actions, and defaults
// ABOUTME: Single source of truth for magic strings used across subsystems
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! Crate-wide constants.

/// Key prefix constants
pub mod key_prefixes {
    /// Default prefix for newly minted keys
    pub const DEFAULT: &str = "kg_live_";
}

/// Namespace constants
pub mod namespaces {
    /// Namespace used when the caller does not supply one
    pub const DEFAULT: &str = "default";
}

/// Placeholder digest recorded for verification attempts that matched no key.
/// The real digest of an unrecognized secret is never persisted, so the log
/// table cannot accumulate digests of arbitrary attacker-supplied strings.
pub const NOT_FOUND_DIGEST: &str = "unknown";

/// Audit log action tags
pub mod audit_actions {
    /// A key was created
    pub const KEY_CREATED: &str = "key.created";
    /// A key was revoked (soft or hard)
    pub const KEY_REVOKED: &str = "key.revoked";
    /// A key was updated
    pub const KEY_UPDATED: &str = "key.updated";
    /// A key was rotated
    pub const KEY_ROTATED: &str = "key.rotated";
    /// Roles assigned to a key (full replace)
    pub const KEY_ROLES_ASSIGNED: &str = "key.roles_assigned";
    /// Permissions assigned to a key (full replace)
    pub const KEY_PERMISSIONS_ASSIGNED: &str = "key.permissions_assigned";
    /// A permission was created
    pub const PERMISSION_CREATED: &str = "permission.created";
    /// A permission was deleted
    pub const PERMISSION_DELETED: &str = "permission.deleted";
    /// A role was created
    pub const ROLE_CREATED: &str = "role.created";
    /// A role was deleted
    pub const ROLE_DELETED: &str = "role.deleted";
    /// A rate-limit override was set
    pub const OVERRIDE_SET: &str = "ratelimit.override_set";
    /// A rate-limit override was cleared
    pub const OVERRIDE_CLEARED: &str = "ratelimit.override_cleared";
    /// Expired keys were purged
    pub const KEYS_EXPIRED: &str = "keys.expired";
    /// Verification logs were pruned
    pub const LOGS_CLEANED: &str = "logs.cleaned";
    /// Hourly analytics rollup completed
    pub const ANALYTICS_ROLLUP: &str = "analytics.rollup";
    /// Daily analytics rollup completed
    pub const ANALYTICS_ROLLUP_DAILY: &str = "analytics.rollup_daily";
}

/// System configuration defaults
pub mod system_config {
    /// Random bytes drawn for a new key secret
    pub const DEFAULT_KEY_ENTROPY_BYTES: usize = 24;
    /// Verification logs older than this many days are pruned by the cleanup job
    pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 90;
    /// Minimum secret body length eligible for hint truncation
    pub const MIN_HINT_BODY_LEN: usize = 8;
}
