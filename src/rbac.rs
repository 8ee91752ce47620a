// ABOUTME: Role and permission catalog management plus access resolution for keys
// ABOUTME: Resolution unions direct permissions with role-expanded ones, deduplicated
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Role-Based Access Control
//!
//! Permissions and roles live in namespace-independent catalogs. Keys hold
//! direct permission ids and role ids; resolution fetches every referenced
//! permission record, expands roles into their member permissions, and
//! merges the names into one sorted, deduplicated set. Dangling references
//! (a role or permission deleted after assignment) are skipped silently
//! rather than failing the verification.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::audit_actions;
use crate::errors::{AppError, AppResult};
use crate::models::{AuditLogEntry, KeyRecord, Permission, ResolvedAccess, Role};
use crate::store::{AuditStore, KeyStore, PermissionStore, RoleStore};

/// Resolve the effective access of a key: direct permissions unioned with
/// the permissions of every assigned role.
///
/// # Errors
/// Returns an error only when a store read fails; dangling role or
/// permission references resolve to nothing.
pub async fn resolve_access(
    key: &KeyRecord,
    roles: &dyn RoleStore,
    permissions: &dyn PermissionStore,
) -> AppResult<ResolvedAccess> {
    let mut permission_names: BTreeSet<String> = BTreeSet::new();
    let mut role_names: BTreeSet<String> = BTreeSet::new();

    for permission_id in &key.permissions {
        let Some(permission) = permissions.find_permission(permission_id).await? else {
            debug!(permission_id, key_id = %key.id, "Skipping dangling permission reference");
            continue;
        };
        permission_names.insert(permission.name);
    }

    for role_id in &key.roles {
        let Some(role) = roles.find_role(role_id).await? else {
            debug!(role_id, key_id = %key.id, "Skipping dangling role reference");
            continue;
        };
        for permission_id in &role.permission_ids {
            let Some(permission) = permissions.find_permission(permission_id).await? else {
                debug!(permission_id, role = %role.name, "Skipping dangling permission reference");
                continue;
            };
            permission_names.insert(permission.name);
        }
        role_names.insert(role.name);
    }

    Ok(ResolvedAccess {
        permissions: permission_names.into_iter().collect(),
        roles: role_names.into_iter().collect(),
    })
}

/// Catalog management for permissions and roles, plus key assignment
pub struct RbacService {
    keys: Arc<dyn KeyStore>,
    roles: Arc<dyn RoleStore>,
    permissions: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditStore>,
}

impl RbacService {
    /// Create the service over the given stores
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyStore>,
        roles: Arc<dyn RoleStore>,
        permissions: Arc<dyn PermissionStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            keys,
            roles,
            permissions,
            audit,
        }
    }

    /// Create a permission. Names must be unique across the catalog.
    ///
    /// # Errors
    /// Fails with `resource_already_exists` when the name is taken, or with
    /// `invalid_input` when the name is empty.
    pub async fn create_permission(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> AppResult<Permission> {
        if name.trim().is_empty() {
            return Err(AppError::invalid_input("Permission name must not be empty"));
        }

        let permission = Permission {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            description: description.map(ToOwned::to_owned),
            created_at: Utc::now(),
        };
        self.permissions.insert_permission(&permission).await?;

        self.record_audit(
            audit_actions::PERMISSION_CREATED,
            None,
            json!({ "permission_id": permission.id, "name": permission.name }),
        )
        .await?;
        info!(name = %permission.name, "Created permission");
        Ok(permission)
    }

    /// List all permissions, sorted by name
    pub async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        self.permissions.list_permissions().await
    }

    /// Delete a permission by id. Roles referencing it keep the dangling id;
    /// resolution skips it.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when no such permission exists.
    pub async fn delete_permission(&self, permission_id: &str) -> AppResult<()> {
        self.permissions.delete_permission(permission_id).await?;
        self.record_audit(
            audit_actions::PERMISSION_DELETED,
            None,
            json!({ "permission_id": permission_id }),
        )
        .await?;
        info!(permission_id, "Deleted permission");
        Ok(())
    }

    /// Create a role over a set of permission ids. Every referenced
    /// permission must exist at creation time.
    ///
    /// # Errors
    /// Fails with `resource_already_exists` when the name is taken, or with
    /// `resource_not_found` when a referenced permission is missing.
    pub async fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        permission_ids: Vec<String>,
    ) -> AppResult<Role> {
        if name.trim().is_empty() {
            return Err(AppError::invalid_input("Role name must not be empty"));
        }
        for permission_id in &permission_ids {
            if self
                .permissions
                .find_permission(permission_id)
                .await?
                .is_none()
            {
                return Err(AppError::not_found(format!("Permission '{permission_id}'")));
            }
        }

        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            description: description.map(ToOwned::to_owned),
            permission_ids,
            created_at: Utc::now(),
        };
        self.roles.insert_role(&role).await?;

        self.record_audit(
            audit_actions::ROLE_CREATED,
            None,
            json!({ "role_id": role.id, "name": role.name }),
        )
        .await?;
        info!(name = %role.name, "Created role");
        Ok(role)
    }

    /// List all roles, sorted by name
    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        self.roles.list_roles().await
    }

    /// Delete a role by id. Keys referencing it keep the dangling id;
    /// resolution skips it.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when no such role exists.
    pub async fn delete_role(&self, role_id: &str) -> AppResult<()> {
        self.roles.delete_role(role_id).await?;
        self.record_audit(
            audit_actions::ROLE_DELETED,
            None,
            json!({ "role_id": role_id }),
        )
        .await?;
        info!(role_id, "Deleted role");
        Ok(())
    }

    /// Replace a key's role assignments in full. Every referenced role must
    /// exist at assignment time.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when the key or a role is missing.
    pub async fn assign_roles(&self, key_id: &str, role_ids: Vec<String>) -> AppResult<()> {
        for role_id in &role_ids {
            if self.roles.find_role(role_id).await?.is_none() {
                return Err(AppError::not_found(format!("Role '{role_id}'")));
            }
        }

        let mut key = self
            .keys
            .find_by_id(key_id)
            .await?
            .ok_or_else(|| AppError::not_found("API key"))?;
        key.roles = role_ids.clone();
        key.updated_at = Utc::now();
        self.keys.update_key(&key).await?;

        self.record_audit(
            audit_actions::KEY_ROLES_ASSIGNED,
            Some(&key.key_hash),
            json!({ "key_id": key_id, "role_ids": role_ids }),
        )
        .await?;
        info!(key_id, count = key.roles.len(), "Assigned roles to key");
        Ok(())
    }

    /// Replace a key's direct permission ids in full. Referenced permissions
    /// need not exist at assignment time; resolution skips dangling ids.
    ///
    /// # Errors
    /// Fails with `resource_not_found` when the key is missing.
    pub async fn assign_permissions(
        &self,
        key_id: &str,
        permission_ids: Vec<String>,
    ) -> AppResult<()> {
        let mut key = self
            .keys
            .find_by_id(key_id)
            .await?
            .ok_or_else(|| AppError::not_found("API key"))?;
        key.permissions = permission_ids.clone();
        key.updated_at = Utc::now();
        self.keys.update_key(&key).await?;

        self.record_audit(
            audit_actions::KEY_PERMISSIONS_ASSIGNED,
            Some(&key.key_hash),
            json!({ "key_id": key_id, "permission_ids": permission_ids }),
        )
        .await?;
        info!(
            key_id,
            count = key.permissions.len(),
            "Assigned direct permissions to key"
        );
        Ok(())
    }

    async fn record_audit(
        &self,
        action: &str,
        key_hash: Option<&str>,
        detail: serde_json::Value,
    ) -> AppResult<()> {
        self.audit
            .append_audit(&AuditLogEntry {
                id: Uuid::new_v4().to_string(),
                action: action.to_owned(),
                actor_id: None,
                key_hash: key_hash.map(ToOwned::to_owned),
                timestamp: Utc::now(),
                detail,
            })
            .await
    }
}
