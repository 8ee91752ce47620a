// ABOUTME: Imports verification events for keys managed by an external provider
// ABOUTME: External identifiers are digested so the log store only ever sees hashes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # External Verification Mirror
//!
//! Some deployments verify a subset of keys in an upstream provider and
//! only mirror the outcomes here for unified analytics. Mirrored events
//! flow into the same verification log as native ones, keyed by the digest
//! of the provider's key identifier, so rollups cover both populations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::credentials::CredentialCodec;
use crate::errors::{AppError, AppResult};
use crate::models::{OutcomeCode, VerificationLogEntry};
use crate::store::LogStore;

/// One verification event reported by an external provider
#[derive(Debug, Clone, Deserialize)]
pub struct MirroredVerification {
    /// The provider's identifier for the key; digested before storage
    pub external_key_id: String,
    /// Namespace the event belongs to
    pub namespace: String,
    /// When the provider observed the event
    pub timestamp: DateTime<Utc>,
    /// Outcome reported by the provider
    pub code: OutcomeCode,
    /// Credits left after the event, if the provider meters usage
    pub remaining: Option<i64>,
    /// Caller IP address, if the provider reported one
    pub ip_address: Option<String>,
    /// Opaque tag map carried through to the log
    pub tags: Option<serde_json::Value>,
}

/// Ingests externally verified events into the verification log
pub struct VerificationMirror {
    logs: Arc<dyn LogStore>,
    codec: CredentialCodec,
}

impl VerificationMirror {
    /// Create the mirror over the given log store
    #[must_use]
    pub fn new(logs: Arc<dyn LogStore>) -> Self {
        Self {
            logs,
            codec: CredentialCodec::new(),
        }
    }

    /// Record one mirrored event.
    ///
    /// # Errors
    /// Fails with `invalid_input` on an empty external identifier or
    /// namespace, or when the log append fails.
    pub async fn record(&self, event: &MirroredVerification) -> AppResult<()> {
        if event.external_key_id.trim().is_empty() {
            return Err(AppError::invalid_input(
                "External key id must not be empty",
            ));
        }
        if event.namespace.trim().is_empty() {
            return Err(AppError::invalid_input("Namespace must not be empty"));
        }

        let key_hash = self.codec.digest(&event.external_key_id);
        self.logs
            .append_verification(&VerificationLogEntry {
                id: Uuid::new_v4().to_string(),
                key_hash,
                namespace: event.namespace.clone(),
                timestamp: event.timestamp,
                success: event.code.is_valid(),
                code: event.code,
                remaining: event.remaining,
                ratelimit_remaining: None,
                tags: event.tags.clone(),
                ip_address: event.ip_address.clone(),
            })
            .await?;
        debug!(namespace = %event.namespace, code = event.code.as_str(), "Mirrored external verification");
        Ok(())
    }

    /// Record a batch of mirrored events, stopping at the first failure.
    /// Returns the number recorded.
    pub async fn record_batch(&self, events: &[MirroredVerification]) -> AppResult<usize> {
        for event in events {
            self.record(event).await?;
        }
        Ok(events.len())
    }
}
