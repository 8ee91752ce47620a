// ABOUTME: Library root for the keygate API key issuance and verification service
// ABOUTME: Re-exports the service types and wires the module tree together
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Keygate
//!
//! Multi-tenant API key issuance, verification, and governance. Keys are
//! hashed at rest; verification runs validity checks, credit metering with
//! scheduled refills, sliding-window rate limits with per-subject overrides,
//! and RBAC resolution in one pipeline, logging every attempt for the
//! analytics rollups.
//!
//! Storage is pluggable through the traits in [`store`], with an in-memory
//! backend for tests and embedded use and a SQLite backend for production.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keygate::config::ServiceConfig;
//! use keygate::lifecycle::KeyService;
//! use keygate::models::{CreateKeyRequest, VerifyRequest};
//! use keygate::store::MemoryStore;
//! use keygate::verify::verifier_over;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let config = ServiceConfig::default();
//! let keys = KeyService::new(store.clone(), store.clone(), config.clone());
//!
//! let created = keys
//!     .create(&CreateKeyRequest {
//!         owner_id: "owner_1".into(),
//!         ..CreateKeyRequest::default()
//!     })
//!     .await?;
//!
//! let verifier = verifier_over(store, config.default_namespace.clone());
//! let result = verifier.verify(&VerifyRequest::new(created.key)).await?;
//! assert!(result.valid);
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod mirror;
pub mod models;
pub mod ratelimit;
pub mod rbac;
pub mod refill;
pub mod store;
pub mod validity;
pub mod verify;

pub use config::ServiceConfig;
pub use errors::{AppError, AppResult, ErrorCode};
pub use models::{
    CreateKeyRequest, CreatedKey, KeyPatch, KeyRecord, OutcomeCode, Verification, VerifyRequest,
};
