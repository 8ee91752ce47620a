// ABOUTME: Shared helpers for integration tests over the in-memory store
// ABOUTME: Builds the service graph once so tests stay focused on behavior
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

use std::sync::Arc;

use keygate::config::ServiceConfig;
use keygate::lifecycle::KeyService;
use keygate::models::{CreateKeyRequest, CreatedKey};
use keygate::store::MemoryStore;
use keygate::verify::{verifier_over, Verifier};

/// In-memory service graph for tests
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub keys: KeyService,
    pub verifier: Verifier,
    pub config: ServiceConfig,
}

#[must_use]
pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let config = ServiceConfig::default();
    let keys = KeyService::new(store.clone(), store.clone(), config.clone());
    let verifier = verifier_over(store.clone(), config.default_namespace.clone());
    Harness {
        store,
        keys,
        verifier,
        config,
    }
}

impl Harness {
    /// Mint a key for the default owner with the given request overrides
    pub async fn mint(&self, request: CreateKeyRequest) -> CreatedKey {
        let request = CreateKeyRequest {
            owner_id: if request.owner_id.is_empty() {
                "owner_1".into()
            } else {
                request.owner_id
            },
            ..request
        };
        self.keys.create(&request).await.unwrap()
    }
}
