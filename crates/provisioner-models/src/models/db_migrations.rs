/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Database migration operations.
//!
//! A migration moves a hibernated installation from one multitenant
//! database to another. It runs as a long sequence of states: back up,
//! switch the database, refresh secrets, restore, update the installation
//! config, finalize. A succeeded migration can later be rolled back.

use super::installations::{ensure_installation_ready_for_db_migration, Installation};
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::query::{append_optional, EncodesToQuery, Paging, QueryPairs};
use crate::transitions::{ResourceKind, StatefulResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DB_MIGRATION_STATE_REQUESTED: &str = "requested";
pub const DB_MIGRATION_STATE_INSTALLATION_BACKUP_IN_PROGRESS: &str =
    "installation-backup-in-progress";
pub const DB_MIGRATION_STATE_DATABASE_SWITCH: &str = "database-switch";
pub const DB_MIGRATION_STATE_REFRESH_SECRETS: &str = "refreshing-secrets";
pub const DB_MIGRATION_STATE_TRIGGER_RESTORATION: &str = "trigger-restoration";
pub const DB_MIGRATION_STATE_RESTORATION_IN_PROGRESS: &str = "restoration-in-progress";
pub const DB_MIGRATION_STATE_UPDATING_INSTALLATION_CONFIG: &str = "updating-installation-config";
pub const DB_MIGRATION_STATE_FINALIZING: &str = "finalizing";
pub const DB_MIGRATION_STATE_FAILING: &str = "failing";
pub const DB_MIGRATION_STATE_SUCCEEDED: &str = "succeeded";
pub const DB_MIGRATION_STATE_FAILED: &str = "failed";
pub const DB_MIGRATION_STATE_ROLLBACK_REQUESTED: &str = "rollback-requested";
pub const DB_MIGRATION_STATE_ROLLBACK_FINISHED: &str = "rollback-finished";
pub const DB_MIGRATION_STATE_DELETION_REQUESTED: &str = "deletion-requested";
pub const DB_MIGRATION_STATE_DELETED: &str = "deleted";

pub const ALL_DB_MIGRATION_STATES: &[&str] = &[
    DB_MIGRATION_STATE_REQUESTED,
    DB_MIGRATION_STATE_INSTALLATION_BACKUP_IN_PROGRESS,
    DB_MIGRATION_STATE_DATABASE_SWITCH,
    DB_MIGRATION_STATE_REFRESH_SECRETS,
    DB_MIGRATION_STATE_TRIGGER_RESTORATION,
    DB_MIGRATION_STATE_RESTORATION_IN_PROGRESS,
    DB_MIGRATION_STATE_UPDATING_INSTALLATION_CONFIG,
    DB_MIGRATION_STATE_FINALIZING,
    DB_MIGRATION_STATE_FAILING,
    DB_MIGRATION_STATE_SUCCEEDED,
    DB_MIGRATION_STATE_FAILED,
    DB_MIGRATION_STATE_ROLLBACK_REQUESTED,
    DB_MIGRATION_STATE_ROLLBACK_FINISHED,
    DB_MIGRATION_STATE_DELETION_REQUESTED,
    DB_MIGRATION_STATE_DELETED,
];

pub const DB_MIGRATION_STATES_PENDING_WORK: &[&str] = &[
    DB_MIGRATION_STATE_REQUESTED,
    DB_MIGRATION_STATE_INSTALLATION_BACKUP_IN_PROGRESS,
    DB_MIGRATION_STATE_DATABASE_SWITCH,
    DB_MIGRATION_STATE_REFRESH_SECRETS,
    DB_MIGRATION_STATE_TRIGGER_RESTORATION,
    DB_MIGRATION_STATE_RESTORATION_IN_PROGRESS,
    DB_MIGRATION_STATE_UPDATING_INSTALLATION_CONFIG,
    DB_MIGRATION_STATE_FINALIZING,
    DB_MIGRATION_STATE_FAILING,
    DB_MIGRATION_STATE_ROLLBACK_REQUESTED,
    DB_MIGRATION_STATE_DELETION_REQUESTED,
];

/// One side of a migration: where the database lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultitenantDatabaseMigrationTarget {
    pub database_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDbMigrationOperation {
    pub id: String,
    pub installation_id: String,
    pub request_at: DateTime<Utc>,
    pub state: String,
    pub source_database: String,
    pub destination_database: String,
    pub source: MultitenantDatabaseMigrationTarget,
    pub destination: MultitenantDatabaseMigrationTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restoration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl InstallationDbMigrationOperation {
    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }

    /// True while the migration still has work ahead of it.
    pub fn is_active(&self) -> bool {
        !self.is_deleted() && DB_MIGRATION_STATES_PENDING_WORK.contains(&self.state.as_str())
    }
}

impl Lockable for InstallationDbMigrationOperation {
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

impl StatefulResource for InstallationDbMigrationOperation {
    const KIND: ResourceKind = ResourceKind::InstallationDbMigration;

    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDbMigrationRequest {
    pub installation_id: String,
    pub destination_database: String,
    pub destination: MultitenantDatabaseMigrationTarget,
}

impl CreateDbMigrationRequest {
    pub fn validate(&self) -> Result<()> {
        if self.installation_id.is_empty() {
            return Err(ModelError::validation("installation_id", "must not be empty"));
        }
        if self.destination_database.is_empty() {
            return Err(ModelError::validation(
                "destination_database",
                "must not be empty",
            ));
        }
        if self.destination.database_id.is_empty() {
            return Err(ModelError::validation(
                "destination.database_id",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Build the operation for `installation`, currently hosted on
    /// `source_database_id`.
    ///
    /// Rejected when the installation is not ready, when source and
    /// destination are the same database, or when another migration for
    /// the installation is still active.
    pub fn into_operation(
        self,
        installation: &Installation,
        source_database_id: &str,
        existing: &[InstallationDbMigrationOperation],
        id: String,
        now: DateTime<Utc>,
    ) -> Result<InstallationDbMigrationOperation> {
        self.validate()?;
        if installation.id != self.installation_id {
            return Err(ModelError::validation(
                "installation_id",
                format!("expected {}, got {}", self.installation_id, installation.id),
            ));
        }
        ensure_installation_ready_for_db_migration(installation)?;
        if self.destination_database != installation.database {
            return Err(ModelError::validation(
                "destination_database",
                format!(
                    "migration from '{}' to '{}' is not supported",
                    installation.database, self.destination_database
                ),
            ));
        }
        if self.destination.database_id == source_database_id {
            return Err(ModelError::validation(
                "destination.database_id",
                "installation is already on this database",
            ));
        }
        if existing
            .iter()
            .any(|op| op.installation_id == installation.id && op.is_active())
        {
            return Err(ModelError::validation(
                "installation",
                format!("a migration for {} is already in progress", installation.id),
            ));
        }
        Ok(InstallationDbMigrationOperation {
            id,
            installation_id: self.installation_id,
            request_at: now,
            state: DB_MIGRATION_STATE_REQUESTED.to_string(),
            source_database: installation.database.clone(),
            destination_database: self.destination_database,
            source: MultitenantDatabaseMigrationTarget {
                database_id: source_database_id.to_string(),
            },
            destination: self.destination,
            backup_id: None,
            restoration_id: None,
            complete_at: None,
            delete_at: None,
            lock: ResourceLock::default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DBMigrationFilter {
    #[serde(flatten)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<String>,
}

impl DBMigrationFilter {
    pub fn matches(&self, op: &InstallationDbMigrationOperation) -> bool {
        (self.paging.include_deleted || !op.is_deleted())
            && self
                .installation_id
                .as_deref()
                .map_or(true, |i| i == op.installation_id)
            && (self.states.is_empty() || self.states.contains(&op.state))
    }
}

impl EncodesToQuery for DBMigrationFilter {
    fn append_query(&self, pairs: &mut QueryPairs) {
        self.paging.append_query(pairs);
        append_optional(pairs, "installation", self.installation_id.as_deref());
        for state in &self.states {
            pairs.append_pair("state", state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::installations::{
        CreateInstallationRequest, DATABASE_MULTITENANT_RDS_POSTGRES, DATABASE_RDS_POSTGRES,
        FILESTORE_BIFROST, INSTALLATION_STATE_HIBERNATING,
    };
    use super::*;
    use crate::transitions::request_state;

    fn installation() -> Installation {
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

    fn request() -> CreateDbMigrationRequest {
        CreateDbMigrationRequest {
            installation_id: "i1".to_string(),
            destination_database: DATABASE_MULTITENANT_RDS_POSTGRES.to_string(),
            destination: MultitenantDatabaseMigrationTarget {
                database_id: "db2".to_string(),
            },
        }
    }

    #[test]
    fn test_create_migration() {
        let op = request()
            .into_operation(&installation(), "db1", &[], "m1".to_string(), Utc::now())
            .unwrap();
        assert_eq!(op.state, DB_MIGRATION_STATE_REQUESTED);
        assert_eq!(op.source.database_id, "db1");
        assert_eq!(op.destination.database_id, "db2");
        assert!(op.is_active());
    }

    #[test]
    fn test_create_migration_validation() {
        let cases: Vec<(&str, Box<dyn Fn(&mut CreateDbMigrationRequest)>)> = vec![
            ("installation_id", Box::new(|r: &mut CreateDbMigrationRequest| r.installation_id.clear())),
            (
                "destination_database",
                Box::new(|r: &mut CreateDbMigrationRequest| r.destination_database.clear()),
            ),
            (
                "destination.database_id",
                Box::new(|r: &mut CreateDbMigrationRequest| r.destination.database_id.clear()),
            ),
        ];
        for (field, mutate) in cases {
            let mut r = request();
            mutate(&mut r);
            let err = r.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_create_migration_rejections() {
        let installation = installation();

        let err = request()
            .into_operation(&installation, "db2", &[], "m1".to_string(), Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("already on this database"));

        let mut r = request();
        r.destination_database = DATABASE_RDS_POSTGRES.to_string();
        assert!(r
            .into_operation(&installation, "db1", &[], "m1".to_string(), Utc::now())
            .is_err());

        let mut stable = installation.clone();
        stable.state = "stable".to_string();
        assert!(request()
            .into_operation(&stable, "db1", &[], "m1".to_string(), Utc::now())
            .is_err());

        let active = request()
            .into_operation(&installation, "db1", &[], "m1".to_string(), Utc::now())
            .unwrap();
        let err = request()
            .into_operation(
                &installation,
                "db1",
                std::slice::from_ref(&active),
                "m2".to_string(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_rollback_only_after_success() {
        let mut op = request()
            .into_operation(&installation(), "db1", &[], "m1".to_string(), Utc::now())
            .unwrap();
        assert!(request_state(&mut op, DB_MIGRATION_STATE_ROLLBACK_REQUESTED).is_err());

        op.state = DB_MIGRATION_STATE_SUCCEEDED.to_string();
        assert!(!op.is_active());
        assert!(request_state(&mut op, DB_MIGRATION_STATE_ROLLBACK_REQUESTED).unwrap());
        assert!(op.is_active());
    }

    #[test]
    fn test_migration_filter() {
        let op = request()
            .into_operation(&installation(), "db1", &[], "m1".to_string(), Utc::now())
            .unwrap();
        let mut filter = DBMigrationFilter {
            installation_id: Some("i1".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&op));
        filter.states = vec![DB_MIGRATION_STATE_SUCCEEDED.to_string()];
        assert!(!filter.matches(&op));
        assert_eq!(
            filter.to_query_string(),
            "page=0&per_page=100&installation=i1&state=succeeded"
        );
    }
}
