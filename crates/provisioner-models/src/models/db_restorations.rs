/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Database restoration operations: restoring a backup into its installation.

use super::backups::{ensure_backup_restoration_compatible, InstallationBackup};
use super::installations::{Installation, INSTALLATION_STATE_HIBERNATING};
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::transitions::{ResourceKind, StatefulResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DB_RESTORATION_STATE_REQUESTED: &str = "requested";
pub const DB_RESTORATION_STATE_IN_PROGRESS: &str = "in-progress";
pub const DB_RESTORATION_STATE_FINALIZING: &str = "finalizing";
pub const DB_RESTORATION_STATE_SUCCEEDED: &str = "succeeded";
pub const DB_RESTORATION_STATE_FAILING: &str = "failing";
pub const DB_RESTORATION_STATE_FAILED: &str = "failed";
pub const DB_RESTORATION_STATE_INVALID: &str = "invalid";
pub const DB_RESTORATION_STATE_DELETION_REQUESTED: &str = "deletion-requested";
pub const DB_RESTORATION_STATE_DELETED: &str = "deleted";

pub const ALL_DB_RESTORATION_STATES: &[&str] = &[
    DB_RESTORATION_STATE_REQUESTED,
    DB_RESTORATION_STATE_IN_PROGRESS,
    DB_RESTORATION_STATE_FINALIZING,
    DB_RESTORATION_STATE_SUCCEEDED,
    DB_RESTORATION_STATE_FAILING,
    DB_RESTORATION_STATE_FAILED,
    DB_RESTORATION_STATE_INVALID,
    DB_RESTORATION_STATE_DELETION_REQUESTED,
    DB_RESTORATION_STATE_DELETED,
];

pub const DB_RESTORATION_STATES_PENDING_WORK: &[&str] = &[
    DB_RESTORATION_STATE_REQUESTED,
    DB_RESTORATION_STATE_IN_PROGRESS,
    DB_RESTORATION_STATE_FINALIZING,
    DB_RESTORATION_STATE_FAILING,
    DB_RESTORATION_STATE_DELETION_REQUESTED,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDbRestorationOperation {
    pub id: String,
    pub installation_id: String,
    pub backup_id: String,
    pub state: String,
    /// State the installation returns to once the restoration finishes.
    pub target_installation_state: String,
    #[serde(default)]
    pub cluster_installation_id: String,
    pub request_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl InstallationDbRestorationOperation {
    /// A restoration of `backup` into `installation`, which must be hibernating.
    pub fn request(
        installation: &Installation,
        backup: &InstallationBackup,
        id: String,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !installation.is_hibernating() {
            return Err(ModelError::validation(
                "installation",
                format!(
                    "must be {} to be restored, is {}",
                    INSTALLATION_STATE_HIBERNATING, installation.state
                ),
            ));
        }
        ensure_backup_restoration_compatible(backup, installation)?;
        Ok(Self {
            id,
            installation_id: installation.id.clone(),
            backup_id: backup.id.clone(),
            state: DB_RESTORATION_STATE_REQUESTED.to_string(),
            target_installation_state: INSTALLATION_STATE_HIBERNATING.to_string(),
            cluster_installation_id: String::new(),
            request_at: now,
            complete_at: None,
            delete_at: None,
            lock: ResourceLock::default(),
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }
}

impl Lockable for InstallationDbRestorationOperation {
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

impl StatefulResource for InstallationDbRestorationOperation {
    const KIND: ResourceKind = ResourceKind::InstallationDbRestoration;

    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
}
