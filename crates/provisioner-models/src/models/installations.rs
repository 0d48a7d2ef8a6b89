/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Installations: hosted application instances and their configuration.

use super::env_vars::{clear_or_patch, EnvVarMap};
use super::groups::Group;
use super::volumes::{validate_volume_map, VolumeMap};
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::patch::{ApplyPatch, Patch};
use crate::query::{append_optional, EncodesToQuery, Paging, QueryPairs};
use crate::transitions::{ResourceKind, StatefulResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// =============================================================================
// States
// =============================================================================

pub const INSTALLATION_STATE_STABLE: &str = "stable";
pub const INSTALLATION_STATE_CREATION_REQUESTED: &str = "creation-requested";
pub const INSTALLATION_STATE_CREATION_PRE_PROVISIONING: &str = "creation-pre-provisioning";
pub const INSTALLATION_STATE_CREATION_IN_PROGRESS: &str = "creation-in-progress";
pub const INSTALLATION_STATE_CREATION_DNS: &str = "creation-dns";
pub const INSTALLATION_STATE_CREATION_FINAL_TASKS: &str = "creation-final-tasks";
pub const INSTALLATION_STATE_CREATION_NO_COMPATIBLE_CLUSTERS: &str =
    "creation-no-compatible-clusters";
pub const INSTALLATION_STATE_CREATION_FAILED: &str = "creation-failed";
pub const INSTALLATION_STATE_UPDATE_REQUESTED: &str = "update-requested";
pub const INSTALLATION_STATE_UPDATE_IN_PROGRESS: &str = "update-in-progress";
pub const INSTALLATION_STATE_UPDATE_FAILED: &str = "update-failed";
pub const INSTALLATION_STATE_HIBERNATION_REQUESTED: &str = "hibernation-requested";
pub const INSTALLATION_STATE_HIBERNATION_IN_PROGRESS: &str = "hibernation-in-progress";
pub const INSTALLATION_STATE_HIBERNATING: &str = "hibernating";
pub const INSTALLATION_STATE_WAKE_UP_REQUESTED: &str = "wake-up-requested";
pub const INSTALLATION_STATE_DELETION_PENDING_REQUESTED: &str = "deletion-pending-requested";
pub const INSTALLATION_STATE_DELETION_PENDING_IN_PROGRESS: &str = "deletion-pending-in-progress";
pub const INSTALLATION_STATE_DELETION_PENDING: &str = "deletion-pending";
pub const INSTALLATION_STATE_DELETION_CANCELLATION_REQUESTED: &str =
    "deletion-cancellation-requested";
pub const INSTALLATION_STATE_DELETION_REQUESTED: &str = "deletion-requested";
pub const INSTALLATION_STATE_DELETION_IN_PROGRESS: &str = "deletion-in-progress";
pub const INSTALLATION_STATE_DELETION_FINAL_CLEANUP: &str = "deletion-final-cleanup";
pub const INSTALLATION_STATE_DELETION_FAILED: &str = "deletion-failed";
pub const INSTALLATION_STATE_DELETED: &str = "deleted";
pub const INSTALLATION_STATE_DB_RESTORATION_IN_PROGRESS: &str = "db-restoration-in-progress";
pub const INSTALLATION_STATE_DB_MIGRATION_IN_PROGRESS: &str = "db-migration-in-progress";
pub const INSTALLATION_STATE_DB_MIGRATION_ROLLBACK_IN_PROGRESS: &str =
    "db-migration-rollback-in-progress";

pub const ALL_INSTALLATION_STATES: &[&str] = &[
    INSTALLATION_STATE_STABLE,
    INSTALLATION_STATE_CREATION_REQUESTED,
    INSTALLATION_STATE_CREATION_PRE_PROVISIONING,
    INSTALLATION_STATE_CREATION_IN_PROGRESS,
    INSTALLATION_STATE_CREATION_DNS,
    INSTALLATION_STATE_CREATION_FINAL_TASKS,
    INSTALLATION_STATE_CREATION_NO_COMPATIBLE_CLUSTERS,
    INSTALLATION_STATE_CREATION_FAILED,
    INSTALLATION_STATE_UPDATE_REQUESTED,
    INSTALLATION_STATE_UPDATE_IN_PROGRESS,
    INSTALLATION_STATE_UPDATE_FAILED,
    INSTALLATION_STATE_HIBERNATION_REQUESTED,
    INSTALLATION_STATE_HIBERNATION_IN_PROGRESS,
    INSTALLATION_STATE_HIBERNATING,
    INSTALLATION_STATE_WAKE_UP_REQUESTED,
    INSTALLATION_STATE_DELETION_PENDING_REQUESTED,
    INSTALLATION_STATE_DELETION_PENDING_IN_PROGRESS,
    INSTALLATION_STATE_DELETION_PENDING,
    INSTALLATION_STATE_DELETION_CANCELLATION_REQUESTED,
    INSTALLATION_STATE_DELETION_REQUESTED,
    INSTALLATION_STATE_DELETION_IN_PROGRESS,
    INSTALLATION_STATE_DELETION_FINAL_CLEANUP,
    INSTALLATION_STATE_DELETION_FAILED,
    INSTALLATION_STATE_DELETED,
    INSTALLATION_STATE_DB_RESTORATION_IN_PROGRESS,
    INSTALLATION_STATE_DB_MIGRATION_IN_PROGRESS,
    INSTALLATION_STATE_DB_MIGRATION_ROLLBACK_IN_PROGRESS,
];

pub const INSTALLATION_STATES_PENDING_WORK: &[&str] = &[
    INSTALLATION_STATE_CREATION_REQUESTED,
    INSTALLATION_STATE_CREATION_PRE_PROVISIONING,
    INSTALLATION_STATE_CREATION_IN_PROGRESS,
    INSTALLATION_STATE_CREATION_DNS,
    INSTALLATION_STATE_CREATION_FINAL_TASKS,
    INSTALLATION_STATE_CREATION_NO_COMPATIBLE_CLUSTERS,
    INSTALLATION_STATE_UPDATE_REQUESTED,
    INSTALLATION_STATE_UPDATE_IN_PROGRESS,
    INSTALLATION_STATE_HIBERNATION_REQUESTED,
    INSTALLATION_STATE_HIBERNATION_IN_PROGRESS,
    INSTALLATION_STATE_WAKE_UP_REQUESTED,
    INSTALLATION_STATE_DELETION_PENDING_REQUESTED,
    INSTALLATION_STATE_DELETION_PENDING_IN_PROGRESS,
    INSTALLATION_STATE_DELETION_CANCELLATION_REQUESTED,
    INSTALLATION_STATE_DELETION_REQUESTED,
    INSTALLATION_STATE_DELETION_IN_PROGRESS,
    INSTALLATION_STATE_DELETION_FINAL_CLEANUP,
];

// =============================================================================
// Supported configuration
// =============================================================================

pub const INSTALLATION_SIZES: &[&str] = &[
    "100users",
    "1000users",
    "5000users",
    "10000users",
    "25000users",
    "miniSingleton",
    "miniHA",
];

pub const AFFINITY_ISOLATED: &str = "isolated";
pub const AFFINITY_MULTITENANT: &str = "multitenant";
pub const VALID_AFFINITIES: &[&str] = &[AFFINITY_ISOLATED, AFFINITY_MULTITENANT];

pub const DATABASE_MYSQL_OPERATOR: &str = "mysql-operator";
pub const DATABASE_RDS_MYSQL: &str = "aws-rds";
pub const DATABASE_RDS_POSTGRES: &str = "aws-rds-postgres";
pub const DATABASE_MULTITENANT_RDS_MYSQL: &str = "aws-multitenant-rds";
pub const DATABASE_MULTITENANT_RDS_POSTGRES: &str = "aws-multitenant-rds-postgres";
pub const VALID_DATABASES: &[&str] = &[
    DATABASE_MYSQL_OPERATOR,
    DATABASE_RDS_MYSQL,
    DATABASE_RDS_POSTGRES,
    DATABASE_MULTITENANT_RDS_MYSQL,
    DATABASE_MULTITENANT_RDS_POSTGRES,
];
pub const MULTITENANT_DATABASES: &[&str] =
    &[DATABASE_MULTITENANT_RDS_MYSQL, DATABASE_MULTITENANT_RDS_POSTGRES];

pub const FILESTORE_MINIO_OPERATOR: &str = "minio-operator";
pub const FILESTORE_S3: &str = "aws-s3";
pub const FILESTORE_MULTITENANT_S3: &str = "aws-multitenant-s3";
pub const FILESTORE_BIFROST: &str = "bifrost";
pub const VALID_FILESTORES: &[&str] = &[
    FILESTORE_MINIO_OPERATOR,
    FILESTORE_S3,
    FILESTORE_MULTITENANT_S3,
    FILESTORE_BIFROST,
];

/// Database kinds whose data can be backed up in place.
pub const BACKUP_SUPPORTED_DATABASES: &[&str] =
    &[DATABASE_RDS_POSTGRES, DATABASE_MULTITENANT_RDS_POSTGRES];
/// Filestores a backup can be written to.
pub const BACKUP_SUPPORTED_FILESTORES: &[&str] =
    &[FILESTORE_S3, FILESTORE_MULTITENANT_S3, FILESTORE_BIFROST];

pub const DEFAULT_INSTALLATION_VERSION: &str = "stable";
pub const DEFAULT_INSTALLATION_IMAGE: &str = "mattermost/mattermost-enterprise-edition";
pub const DEFAULT_INSTALLATION_SIZE: &str = "100users";

// =============================================================================
// Records
// =============================================================================

/// A hosted application instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Sequence of the group configuration last merged in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_sequence: Option<i64>,
    pub dns_names: Vec<String>,
    pub version: String,
    pub image: String,
    #[serde(default, skip_serializing)]
    pub license: String,
    pub size: String,
    pub affinity: String,
    pub database: String,
    pub filestore: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<EnvVarMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_env: Option<EnvVarMap>,
    #[serde(default)]
    pub volumes: VolumeMap,
    pub state: String,
    pub create_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    /// When a `deletion-pending` installation is actually deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_pending_expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl Installation {
    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }

    pub fn is_hibernating(&self) -> bool {
        self.state == INSTALLATION_STATE_HIBERNATING
    }

    pub fn primary_dns_name(&self) -> Option<&str> {
        self.dns_names.first().map(String::as_str)
    }

    /// True when the installation has not yet picked up the group's latest
    /// configuration.
    pub fn group_config_outdated(&self, group: &Group) -> bool {
        self.group_id.as_deref() == Some(group.id.as_str())
            && self.group_sequence != Some(group.sequence)
    }

    /// The effective configuration once `group` is applied.
    ///
    /// Non-empty group version and image replace the installation's own.
    /// Env vars are layered lowest to highest: installation, group, then the
    /// installation's priority env vars.
    pub fn merged_with_group(&self, group: &Group) -> Installation {
        let mut merged = self.clone();
        if !group.version.is_empty() {
            merged.version = group.version.clone();
        }
        if !group.image.is_empty() {
            merged.image = group.image.clone();
        }
        let with_group = EnvVarMap::layered(self.env_vars.as_ref(), group.env_vars.as_ref());
        let effective = EnvVarMap::layered(Some(&with_group), self.priority_env.as_ref());
        merged.env_vars = if effective.is_empty() { None } else { Some(effective) };
        merged.group_sequence = Some(group.sequence);
        merged
    }
}

impl Lockable for Installation {
    fn id(&self) -> &str {
        &self.id
    }
    fn lock(&self) -> &ResourceLock {
        &self.lock
    }
    fn lock_mut(&mut self) -> &mut ResourceLock {
        &mut self.lock
    }
}

impl StatefulResource for Installation {
    const KIND: ResourceKind = ResourceKind::Installation;

    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Request to create an installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateInstallationRequest {
    pub owner_id: String,
    pub group_id: Option<String>,
    pub dns_names: Vec<String>,
    pub version: String,
    pub image: String,
    pub license: String,
    pub size: String,
    pub affinity: String,
    pub database: String,
    pub filestore: String,
    pub env_vars: Option<EnvVarMap>,
    pub priority_env: Option<EnvVarMap>,
    pub volumes: VolumeMap,
}

impl CreateInstallationRequest {
    pub fn set_defaults(&mut self) {
        if self.version.is_empty() {
            self.version = DEFAULT_INSTALLATION_VERSION.to_string();
        }
        if self.image.is_empty() {
            self.image = DEFAULT_INSTALLATION_IMAGE.to_string();
        }
        if self.size.is_empty() {
            self.size = DEFAULT_INSTALLATION_SIZE.to_string();
        }
        if self.affinity.is_empty() {
            self.affinity = AFFINITY_ISOLATED.to_string();
        }
        if self.database.is_empty() {
            self.database = DATABASE_MYSQL_OPERATOR.to_string();
        }
        if self.filestore.is_empty() {
            self.filestore = FILESTORE_MINIO_OPERATOR.to_string();
        }
        for name in self.dns_names.iter_mut() {
            *name = name.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(ModelError::validation("owner_id", "must not be empty"));
        }
        if self.dns_names.is_empty() {
            return Err(ModelError::validation("dns_names", "at least one DNS name is required"));
        }
        let mut seen = HashSet::new();
        for name in &self.dns_names {
            validate_dns_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(ModelError::validation(
                    "dns_names",
                    format!("'{}' is listed more than once", name),
                ));
            }
        }
        check_supported("size", &self.size, INSTALLATION_SIZES)?;
        check_supported("affinity", &self.affinity, VALID_AFFINITIES)?;
        check_supported("database", &self.database, VALID_DATABASES)?;
        check_supported("filestore", &self.filestore, VALID_FILESTORES)?;
        if let Some(env) = &self.env_vars {
            env.validate()?;
        }
        if let Some(env) = &self.priority_env {
            env.validate()?;
        }
        validate_volume_map(&self.volumes)?;
        Ok(())
    }

    /// Builds the installation record in `creation-requested`.
    pub fn into_installation(self, id: String, now: DateTime<Utc>) -> Installation {
        Installation {
            id,
            owner_id: self.owner_id,
            group_id: self.group_id,
            group_sequence: None,
            dns_names: self.dns_names,
            version: self.version,
            image: self.image,
            license: self.license,
            size: self.size,
            affinity: self.affinity,
            database: self.database,
            filestore: self.filestore,
            env_vars: self.env_vars.filter(|e| !e.is_empty()),
            priority_env: self.priority_env.filter(|e| !e.is_empty()),
            volumes: self.volumes,
            state: INSTALLATION_STATE_CREATION_REQUESTED.to_string(),
            create_at: now,
            delete_at: None,
            deletion_pending_expiry: None,
            lock: ResourceLock::default(),
        }
    }
}

/// DNS names are lowercase, dot separated and made of valid labels.
pub fn validate_dns_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| ModelError::validation("dns_names", format!("'{}' {}", name, reason));
    if name != name.to_lowercase() {
        return Err(invalid("must be lowercase"));
    }
    if name.len() > 253 || !name.contains('.') {
        return Err(invalid("is not a fully qualified domain name"));
    }
    for label in name.split('.') {
        let ok = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !ok {
            return Err(invalid("contains an invalid label"));
        }
    }
    Ok(())
}

fn check_supported(field: &str, value: &str, supported: &[&str]) -> Result<()> {
    if !supported.contains(&value) {
        return Err(ModelError::validation(
            field,
            format!("'{}' is not supported", value),
        ));
    }
    Ok(())
}

fn check_not_blank(field: &str, patch: &Patch<String>) -> Result<()> {
    if let Patch::Present(v) = patch {
        if v.trim().is_empty() {
            return Err(ModelError::validation(field, "must not be empty"));
        }
    }
    Ok(())
}

/// Partial update of an installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchInstallationRequest {
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub owner_id: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub version: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub image: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub size: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub license: Patch<String>,
    /// Merged key by key; empty entries delete.
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub env_vars: Patch<EnvVarMap>,
    /// `null` clears all priority env vars.
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub priority_env: Patch<Option<EnvVarMap>>,
}

impl ApplyPatch<Installation> for PatchInstallationRequest {
    fn validate(&self) -> Result<()> {
        check_not_blank("owner_id", &self.owner_id)?;
        check_not_blank("version", &self.version)?;
        check_not_blank("image", &self.image)?;
        if let Patch::Present(size) = &self.size {
            check_supported("size", size, INSTALLATION_SIZES)?;
        }
        if let Patch::Present(env) = &self.env_vars {
            env.validate_patch()?;
        }
        if let Patch::Present(Some(env)) = &self.priority_env {
            env.validate_patch()?;
        }
        Ok(())
    }

    fn apply_fields(&self, installation: &mut Installation) -> Result<bool> {
        let mut changed = self.owner_id.apply_to(&mut installation.owner_id);
        changed |= self.version.apply_to(&mut installation.version);
        changed |= self.image.apply_to(&mut installation.image);
        changed |= self.size.apply_to(&mut installation.size);
        changed |= self.license.apply_to(&mut installation.license);

        if let Patch::Present(input) = &self.env_vars {
            let mut env = installation.env_vars.take().unwrap_or_default();
            changed |= env.patch(input);
            installation.env_vars = if env.is_empty() { None } else { Some(env) };
        }
        if let Patch::Present(input) = &self.priority_env {
            changed |= clear_or_patch(&mut installation.priority_env, input.as_ref());
        }

        Ok(changed)
    }
}

// =============================================================================
// Business rules
// =============================================================================

/// Backups are taken from hibernated installations whose database and
/// filestore support it.
pub fn ensure_installation_ready_for_backup(installation: &Installation) -> Result<()> {
    if !installation.is_hibernating() {
        return Err(ModelError::validation(
            "installation",
            format!(
                "must be {} to be backed up, is {}",
                INSTALLATION_STATE_HIBERNATING, installation.state
            ),
        ));
    }
    if !BACKUP_SUPPORTED_DATABASES.contains(&installation.database.as_str()) {
        return Err(ModelError::validation(
            "installation database",
            format!("backups are not supported for '{}'", installation.database),
        ));
    }
    if !BACKUP_SUPPORTED_FILESTORES.contains(&installation.filestore.as_str()) {
        return Err(ModelError::validation(
            "installation filestore",
            format!("backups are not supported for '{}'", installation.filestore),
        ));
    }
    Ok(())
}

/// Database migrations move hibernated installations off a multitenant database.
pub fn ensure_installation_ready_for_db_migration(installation: &Installation) -> Result<()> {
    if !installation.is_hibernating() {
        return Err(ModelError::validation(
            "installation",
            format!(
                "must be {} to be migrated, is {}",
                INSTALLATION_STATE_HIBERNATING, installation.state
            ),
        ));
    }
    if !MULTITENANT_DATABASES.contains(&installation.database.as_str()) {
        return Err(ModelError::validation(
            "installation database",
            format!("migration is not supported for '{}'", installation.database),
        ));
    }
    Ok(())
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationFilter {
    #[serde(flatten)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

impl InstallationFilter {
    pub fn matches(&self, installation: &Installation) -> bool {
        (self.paging.include_deleted || !installation.is_deleted())
            && self
                .owner_id
                .as_deref()
                .map_or(true, |o| o == installation.owner_id)
            && self
                .group_id
                .as_deref()
                .map_or(true, |g| installation.group_id.as_deref() == Some(g))
            && self.state.as_deref().map_or(true, |s| s == installation.state)
            && self
                .dns_name
                .as_deref()
                .map_or(true, |d| installation.dns_names.iter().any(|n| n == d))
    }
}

impl EncodesToQuery for InstallationFilter {
    fn append_query(&self, pairs: &mut QueryPairs) {
        self.paging.append_query(pairs);
        append_optional(pairs, "owner", self.owner_id.as_deref());
        append_optional(pairs, "group", self.group_id.as_deref());
        append_optional(pairs, "state", self.state.as_deref());
        append_optional(pairs, "dns_name", self.dns_name.as_deref());
    }
}
