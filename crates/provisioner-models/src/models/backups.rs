/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Installation backups.

use super::installations::{ensure_installation_ready_for_backup, Installation};
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::query::{append_optional, EncodesToQuery, Paging, QueryPairs};
use crate::transitions::{ResourceKind, StatefulResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const BACKUP_STATE_REQUESTED: &str = "backup-requested";
pub const BACKUP_STATE_IN_PROGRESS: &str = "backup-in-progress";
pub const BACKUP_STATE_SUCCEEDED: &str = "backup-succeeded";
pub const BACKUP_STATE_FAILED: &str = "backup-failed";
pub const BACKUP_STATE_DELETION_REQUESTED: &str = "deletion-requested";
pub const BACKUP_STATE_DELETED: &str = "deleted";

pub const ALL_BACKUP_STATES: &[&str] = &[
    BACKUP_STATE_REQUESTED,
    BACKUP_STATE_IN_PROGRESS,
    BACKUP_STATE_SUCCEEDED,
    BACKUP_STATE_FAILED,
    BACKUP_STATE_DELETION_REQUESTED,
    BACKUP_STATE_DELETED,
];

pub const BACKUP_STATES_PENDING_WORK: &[&str] = &[
    BACKUP_STATE_REQUESTED,
    BACKUP_STATE_IN_PROGRESS,
    BACKUP_STATE_DELETION_REQUESTED,
];

/// Where the backup data lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3DataResidence {
    pub region: String,
    pub url: String,
    pub bucket: String,
    pub path_prefix: String,
    pub object_key: String,
}

/// A backup of one installation's database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationBackup {
    pub id: String,
    pub installation_id: String,
    #[serde(default)]
    pub cluster_installation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_residence: Option<S3DataResidence>,
    pub state: String,
    pub request_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl InstallationBackup {
    /// A new backup request for `installation`.
    ///
    /// Rejected unless the installation is ready and has no other backup
    /// requested or running.
    pub fn request(
        installation: &Installation,
        existing: &[InstallationBackup],
        id: String,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        ensure_installation_ready_for_backup(installation)?;
        if existing.iter().any(|b| {
            b.installation_id == installation.id
                && !b.is_deleted()
                && (b.state == BACKUP_STATE_REQUESTED || b.state == BACKUP_STATE_IN_PROGRESS)
        }) {
            return Err(ModelError::validation(
                "installation",
                format!("a backup for {} is already in progress", installation.id),
            ));
        }
        Ok(Self {
            id,
            installation_id: installation.id.clone(),
            cluster_installation_id: String::new(),
            data_residence: None,
            state: BACKUP_STATE_REQUESTED.to_string(),
            request_at: now,
            start_at: None,
            complete_at: None,
            delete_at: None,
            lock: ResourceLock::default(),
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }
}

impl Lockable for InstallationBackup {
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

impl StatefulResource for InstallationBackup {
    const KIND: ResourceKind = ResourceKind::InstallationBackup;

    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
}

/// A backup can only be restored into the installation it was taken from,
/// once it has succeeded and while it still exists.
pub fn ensure_backup_restoration_compatible(
    backup: &InstallationBackup,
    installation: &Installation,
) -> Result<()> {
    if backup.installation_id != installation.id {
        return Err(ModelError::validation(
            "backup",
            format!(
                "{} belongs to installation {}, not {}",
                backup.id, backup.installation_id, installation.id
            ),
        ));
    }
    if backup.state != BACKUP_STATE_SUCCEEDED {
        return Err(ModelError::validation(
            "backup",
            format!("{} is {}, not {}", backup.id, backup.state, BACKUP_STATE_SUCCEEDED),
        ));
    }
    if backup.is_deleted() {
        return Err(ModelError::validation(
            "backup",
            format!("{} has been deleted", backup.id),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationBackupFilter {
    #[serde(flatten)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_installation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<String>,
}

impl InstallationBackupFilter {
    pub fn matches(&self, backup: &InstallationBackup) -> bool {
        (self.paging.include_deleted || !backup.is_deleted())
            && self
                .installation_id
                .as_deref()
                .map_or(true, |i| i == backup.installation_id)
            && self
                .cluster_installation_id
                .as_deref()
                .map_or(true, |c| c == backup.cluster_installation_id)
            && (self.states.is_empty() || self.states.contains(&backup.state))
    }
}

impl EncodesToQuery for InstallationBackupFilter {
    fn append_query(&self, pairs: &mut QueryPairs) {
        self.paging.append_query(pairs);
        append_optional(pairs, "installation", self.installation_id.as_deref());
        append_optional(
            pairs,
            "cluster_installation",
            self.cluster_installation_id.as_deref(),
        );
        for state in &self.states {
            pairs.append_pair("state", state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::installations::{
        CreateInstallationRequest, DATABASE_MULTITENANT_RDS_POSTGRES, FILESTORE_BIFROST,
        INSTALLATION_STATE_HIBERNATING,
    };
    use super::*;
    use crate::transitions::request_state;

    fn hibernating_installation() -> Installation {
        let mut request = CreateInstallationRequest {
            owner_id: "owner".to_string(),
            dns_names: vec!["team.example.com".to_string()],
            database: DATABASE_MULTITENANT_RDS_POSTGRES.to_string(),
            filestore: FILESTORE_BIFROST.to_string(),
            ..Default::default()
        };
        request.set_defaults();
        let mut installation = request.into_installation("i1".to_string(), Utc::now());
        installation.state = INSTALLATION_STATE_HIBERNATING.to_string();
        installation
    }

    #[test]
    fn test_request_backup() {
        let installation = hibernating_installation();
        let backup =
            InstallationBackup::request(&installation, &[], "b1".to_string(), Utc::now()).unwrap();
        assert_eq!(backup.state, BACKUP_STATE_REQUESTED);
        assert_eq!(backup.installation_id, "i1");

        let err = InstallationBackup::request(
            &installation,
            std::slice::from_ref(&backup),
            "b2".to_string(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_request_backup_requires_hibernation() {
        let mut installation = hibernating_installation();
        installation.state = "stable".to_string();
        assert!(InstallationBackup::request(&installation, &[], "b1".to_string(), Utc::now()).is_err());
    }

    #[test]
    fn test_restoration_compatibility() {
        let installation = hibernating_installation();
        let mut backup =
            InstallationBackup::request(&installation, &[], "b1".to_string(), Utc::now()).unwrap();
        assert!(ensure_backup_restoration_compatible(&backup, &installation).is_err());

        backup.state = BACKUP_STATE_SUCCEEDED.to_string();
        assert!(ensure_backup_restoration_compatible(&backup, &installation).is_ok());

        let mut other = installation.clone();
        other.id = "i2".to_string();
        assert!(ensure_backup_restoration_compatible(&backup, &other).is_err());

        backup.delete_at = Some(Utc::now());
        assert!(ensure_backup_restoration_compatible(&backup, &installation).is_err());
    }

    #[test]
    fn test_deletion_request() {
        let installation = hibernating_installation();
        let mut backup =
            InstallationBackup::request(&installation, &[], "b1".to_string(), Utc::now()).unwrap();
        backup.state = BACKUP_STATE_SUCCEEDED.to_string();

        assert!(request_state(&mut backup, BACKUP_STATE_DELETION_REQUESTED).unwrap());
        backup.state = BACKUP_STATE_DELETED.to_string();
        assert!(request_state(&mut backup, BACKUP_STATE_DELETION_REQUESTED).is_err());
    }

    #[test]
    fn test_backup_filter() {
        let installation = hibernating_installation();
        let backup =
            InstallationBackup::request(&installation, &[], "b1".to_string(), Utc::now()).unwrap();
        let filter = InstallationBackupFilter {
            installation_id: Some("i1".to_string()),
            states: vec![BACKUP_STATE_REQUESTED.to_string(), BACKUP_STATE_IN_PROGRESS.to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&backup));
        assert_eq!(
            filter.to_query_string(),
            "page=0&per_page=100&installation=i1&state=backup-requested&state=backup-in-progress"
        );
    }
}
