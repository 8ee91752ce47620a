// ABOUTME: Key lifecycle tests covering issuance, revocation, patching, and rotation
// ABOUTME: Exercises the audit trail and grace-window semantics end to end
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

mod common;

use chrono::{Duration, Utc};
use keygate::errors::ErrorCode;
use keygate::models::{CreateKeyRequest, KeyPatch, OutcomeCode, VerifyRequest};
use keygate::store::AuditStore;

use common::harness;

#[tokio::test]
async fn test_create_stores_digest_not_plaintext() {
    let h = harness();
    let created = h
        .mint(CreateKeyRequest {
            name: Some("ci deploy key".into()),
            ..CreateKeyRequest::default()
        })
        .await;

    let record = h.keys.get_key(&created.key_id).await.unwrap();
    assert_ne!(record.key_hash, created.key);
    assert_eq!(record.key_hash.len(), 64);
    assert!(created.key.starts_with("kg_live_"));
    assert!(record.key_hint.starts_with("kg_live_"));
    assert!(record.key_hint.contains("..."));
    assert_eq!(record.name.as_deref(), Some("ci deploy key"));
}

#[tokio::test]
async fn test_create_rejects_empty_owner() {
    let h = harness();
    let err = h
        .keys
        .create(&CreateKeyRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_create_rejects_refill_without_interval() {
    let h = harness();
    let err = h
        .keys
        .create(&CreateKeyRequest {
            owner_id: "owner_1".into(),
            remaining: Some(100),
            refill_amount: Some(100),
            ..CreateKeyRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_soft_revoke_keeps_record() {
    let h = harness();
    let created = h.mint(CreateKeyRequest::default()).await;
    h.keys.revoke(&created.key_id, true).await.unwrap();

    let record = h.keys.get_key(&created.key_id).await.unwrap();
    assert!(record.revoked_at.is_some());
    assert!(!record.enabled);
}

#[tokio::test]
async fn test_hard_revoke_deletes_record() {
    let h = harness();
    let created = h.mint(CreateKeyRequest::default()).await;
    h.keys.revoke(&created.key_id, false).await.unwrap();

    let err = h.keys.get_key(&created.key_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    // The credential itself is gone, not merely revoked
    let result = h
        .verifier
        .verify(&VerifyRequest::new(created.key))
        .await
        .unwrap();
    assert_eq!(result.code, OutcomeCode::NotFound);
}

#[tokio::test]
async fn test_revoke_missing_key_fails() {
    let h = harness();
    let err = h.keys.revoke("no-such-key", true).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_patch_clears_and_sets_fields() {
    let h = harness();
    let created = h
        .mint(CreateKeyRequest {
            name: Some("before".into()),
            remaining: Some(10),
            ..CreateKeyRequest::default()
        })
        .await;

    let updated = h
        .keys
        .update(
            &created.key_id,
            &KeyPatch {
                name: Some(None),
                remaining: Some(Some(50)),
                ..KeyPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, None);
    assert_eq!(updated.remaining, Some(50));
    // Untouched fields survive
    assert!(updated.enabled);
}

#[tokio::test]
async fn test_rotation_without_grace_revokes_old_key() {
    let h = harness();
    let created = h.mint(CreateKeyRequest::default()).await;
    let rotated = h.keys.rotate(&created.key_id, None).await.unwrap();
    assert_ne!(rotated.key_id, created.key_id);

    // Old credential is dead immediately
    let old = h
        .verifier
        .verify(&VerifyRequest::new(created.key))
        .await
        .unwrap();
    assert_eq!(old.code, OutcomeCode::Revoked);

    // Replacement works and records its ancestry
    let fresh = h
        .verifier
        .verify(&VerifyRequest::new(rotated.key))
        .await
        .unwrap();
    assert!(fresh.valid);

    let old_record = h.keys.get_key(&created.key_id).await.unwrap();
    let new_record = h.keys.get_key(&rotated.key_id).await.unwrap();
    assert_eq!(
        new_record.rotated_from.as_deref(),
        Some(old_record.key_hash.as_str())
    );
}

#[tokio::test]
async fn test_rotation_with_grace_keeps_old_key_usable() {
    let h = harness();
    let created = h.mint(CreateKeyRequest::default()).await;
    let rotated = h
        .keys
        .rotate(&created.key_id, Some(3_600_000))
        .await
        .unwrap();

    let old = h
        .verifier
        .verify(&VerifyRequest::new(created.key))
        .await
        .unwrap();
    assert!(old.valid, "old key must stay usable inside the grace window");

    // Old and new credentials are both live during the window
    let fresh = h
        .verifier
        .verify(&VerifyRequest::new(rotated.key))
        .await
        .unwrap();
    assert!(fresh.valid);

    let record = h.keys.get_key(&created.key_id).await.unwrap();
    assert!(record.rotation_grace_end.is_some());
}

#[tokio::test]
async fn test_rotation_inherits_policies() {
    let h = harness();
    let created = h
        .mint(CreateKeyRequest {
            remaining: Some(42),
            permissions: Some(vec!["things.read".into()]),
            environment: Some("production".into()),
            ..CreateKeyRequest::default()
        })
        .await;

    let rotated = h.keys.rotate(&created.key_id, None).await.unwrap();
    let record = h.keys.get_key(&rotated.key_id).await.unwrap();
    assert_eq!(record.remaining, Some(42));
    assert_eq!(record.permissions, vec!["things.read".to_owned()]);
    assert_eq!(record.environment.as_deref(), Some("production"));
}

#[tokio::test]
async fn test_rotation_rejects_non_positive_grace() {
    let h = harness();
    let created = h.mint(CreateKeyRequest::default()).await;
    let err = h.keys.rotate(&created.key_id, Some(0)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_expiry_sweep_removes_only_expired() {
    let h = harness();
    let expired = h
        .mint(CreateKeyRequest {
            expires_at: Some(Utc::now() - Duration::hours(1)),
            ..CreateKeyRequest::default()
        })
        .await;
    let live = h
        .mint(CreateKeyRequest {
            expires_at: Some(Utc::now() + Duration::hours(1)),
            ..CreateKeyRequest::default()
        })
        .await;

    let removed = h.keys.expire_keys().await.unwrap();
    assert_eq!(removed, 1);
    assert!(h.keys.get_key(&expired.key_id).await.is_err());
    assert!(h.keys.get_key(&live.key_id).await.is_ok());
}

#[tokio::test]
async fn test_mutations_append_audit_entries() {
    let h = harness();
    let created = h.mint(CreateKeyRequest::default()).await;
    h.keys
        .update(
            &created.key_id,
            &KeyPatch {
                enabled: Some(false),
                ..KeyPatch::default()
            },
        )
        .await
        .unwrap();
    h.keys.revoke(&created.key_id, true).await.unwrap();

    let entries = h.store.recent_audit(10).await.unwrap();
    let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"key.created"));
    assert!(actions.contains(&"key.updated"));
    assert!(actions.contains(&"key.revoked"));
}

#[tokio::test]
async fn test_list_keys_newest_first() {
    let h = harness();
    let first = h.mint(CreateKeyRequest::default()).await;
    let second = h.mint(CreateKeyRequest::default()).await;

    let listed = h.keys.list_keys("owner_1", None).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].created_at >= listed[1].created_at);
    let ids: Vec<_> = listed.iter().map(|k| k.id.as_str()).collect();
    assert!(ids.contains(&first.key_id.as_str()));
    assert!(ids.contains(&second.key_id.as_str()));
}
