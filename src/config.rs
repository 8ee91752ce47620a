// ABOUTME: Service configuration resolved from environment variables with safe defaults
// ABOUTME: Covers key minting defaults, namespaces, and log retention
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Configuration
//!
//! Everything is overridable through `KEYGATE_*` environment variables and
//! falls back to a sensible default, so a bare `ServiceConfig::from_env()`
//! always succeeds.

use std::env;

use tracing::warn;

use crate::constants::{key_prefixes, namespaces, system_config};

/// Runtime configuration for the key services
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Prefix prepended to newly minted secrets
    pub default_prefix: String,
    /// Namespace used when a request carries none
    pub default_namespace: String,
    /// Entropy bytes drawn for each new secret
    pub key_entropy_bytes: usize,
    /// Days of raw verification log to retain
    pub log_retention_days: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_prefix: key_prefixes::DEFAULT.to_owned(),
            default_namespace: namespaces::DEFAULT.to_owned(),
            key_entropy_bytes: system_config::DEFAULT_KEY_ENTROPY_BYTES,
            log_retention_days: system_config::DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparseable
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_prefix: env::var("KEYGATE_KEY_PREFIX").unwrap_or(defaults.default_prefix),
            default_namespace: env::var("KEYGATE_NAMESPACE")
                .unwrap_or(defaults.default_namespace),
            key_entropy_bytes: parse_env("KEYGATE_KEY_ENTROPY_BYTES", defaults.key_entropy_bytes),
            log_retention_days: parse_env(
                "KEYGATE_LOG_RETENTION_DAYS",
                defaults.log_retention_days,
            ),
        }
    }
}

fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(name, raw, "Ignoring unparseable environment variable");
            default
        }),
        Err(_) => default,
    }
}
