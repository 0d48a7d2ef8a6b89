/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # State Registry
//!
//! Every supervisor-managed resource kind has:
//!
//! - the full list of legal states,
//! - the subset of states that are "pending work" (re-evaluated every tick),
//! - transition rules keyed by *target* state, listing the states a resource
//!   may be in when that target is requested,
//! - for clusters, a work priority per state.
//!
//! Rules are plain data (`TRANSITION_RULES`) and are loaded once into an
//! immutable [`StateRegistry`]. Targets missing from the table are never
//! valid. Self-loops (e.g. `creation-requested` -> `creation-requested`)
//! appear explicitly so re-submitting an in-flight request is allowed.

use crate::error::{ModelError, Result};
use crate::models::{
    backups as backup, clusters as cluster, db_migrations as migration,
    db_restorations as restoration, installations as installation,
    multitenant_databases as mtdb, subscriptions as subscription,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The kinds of resource the supervisor manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    Installation,
    InstallationBackup,
    InstallationDbMigration,
    InstallationDbRestoration,
    MultitenantDatabase,
    Subscription,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Cluster,
        ResourceKind::Installation,
        ResourceKind::InstallationBackup,
        ResourceKind::InstallationDbMigration,
        ResourceKind::InstallationDbRestoration,
        ResourceKind::MultitenantDatabase,
        ResourceKind::Subscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Installation => "installation",
            ResourceKind::InstallationBackup => "installation_backup",
            ResourceKind::InstallationDbMigration => "installation_db_migration",
            ResourceKind::InstallationDbRestoration => "installation_db_restoration",
            ResourceKind::MultitenantDatabase => "multitenant_database",
            ResourceKind::Subscription => "subscription",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub kind: ResourceKind,
    pub target: &'static str,
    pub sources: &'static [&'static str],
}

const fn rule(
    kind: ResourceKind,
    target: &'static str,
    sources: &'static [&'static str],
) -> TransitionRule {
    TransitionRule {
        kind,
        target,
        sources,
    }
}

/// Requestable transitions for every resource kind.
pub const TRANSITION_RULES: &[TransitionRule] = &[
    // Clusters
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_CREATION_REQUESTED,
        &[
            cluster::CLUSTER_STATE_CREATION_REQUESTED,
            cluster::CLUSTER_STATE_CREATION_FAILED,
        ],
    ),
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_PROVISIONING_REQUESTED,
        &[
            cluster::CLUSTER_STATE_STABLE,
            cluster::CLUSTER_STATE_PROVISIONING_REQUESTED,
            cluster::CLUSTER_STATE_PROVISIONING_FAILED,
        ],
    ),
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_UPGRADE_REQUESTED,
        &[
            cluster::CLUSTER_STATE_STABLE,
            cluster::CLUSTER_STATE_UPGRADE_REQUESTED,
            cluster::CLUSTER_STATE_UPGRADE_FAILED,
        ],
    ),
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_RESIZE_REQUESTED,
        &[
            cluster::CLUSTER_STATE_STABLE,
            cluster::CLUSTER_STATE_RESIZE_REQUESTED,
            cluster::CLUSTER_STATE_RESIZE_FAILED,
        ],
    ),
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED,
        &[
            cluster::CLUSTER_STATE_STABLE,
            cluster::CLUSTER_STATE_NODEGROUPS_CREATION_FAILED,
        ],
    ),
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED,
        &[
            cluster::CLUSTER_STATE_STABLE,
            cluster::CLUSTER_STATE_NODEGROUPS_DELETION_FAILED,
        ],
    ),
    rule(
        ResourceKind::Cluster,
        cluster::CLUSTER_STATE_DELETION_REQUESTED,
        &[
            cluster::CLUSTER_STATE_STABLE,
            cluster::CLUSTER_STATE_CREATION_REQUESTED,
            cluster::CLUSTER_STATE_CREATION_FAILED,
            cluster::CLUSTER_STATE_PROVISIONING_FAILED,
            cluster::CLUSTER_STATE_UPGRADE_REQUESTED,
            cluster::CLUSTER_STATE_UPGRADE_FAILED,
            cluster::CLUSTER_STATE_RESIZE_REQUESTED,
            cluster::CLUSTER_STATE_RESIZE_FAILED,
            cluster::CLUSTER_STATE_NODEGROUPS_CREATION_FAILED,
            cluster::CLUSTER_STATE_NODEGROUPS_DELETION_FAILED,
            cluster::CLUSTER_STATE_DELETION_REQUESTED,
            cluster::CLUSTER_STATE_DELETION_FAILED,
        ],
    ),
    // Installations
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_CREATION_REQUESTED,
        &[installation::INSTALLATION_STATE_CREATION_REQUESTED],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_UPDATE_REQUESTED,
        &[
            installation::INSTALLATION_STATE_STABLE,
            installation::INSTALLATION_STATE_UPDATE_REQUESTED,
            installation::INSTALLATION_STATE_UPDATE_IN_PROGRESS,
            installation::INSTALLATION_STATE_UPDATE_FAILED,
        ],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_HIBERNATION_REQUESTED,
        &[
            installation::INSTALLATION_STATE_STABLE,
            installation::INSTALLATION_STATE_UPDATE_FAILED,
            installation::INSTALLATION_STATE_HIBERNATION_REQUESTED,
        ],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_WAKE_UP_REQUESTED,
        &[
            installation::INSTALLATION_STATE_HIBERNATING,
            installation::INSTALLATION_STATE_WAKE_UP_REQUESTED,
        ],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_DELETION_PENDING_REQUESTED,
        &[
            installation::INSTALLATION_STATE_STABLE,
            installation::INSTALLATION_STATE_CREATION_FAILED,
            installation::INSTALLATION_STATE_CREATION_NO_COMPATIBLE_CLUSTERS,
            installation::INSTALLATION_STATE_UPDATE_REQUESTED,
            installation::INSTALLATION_STATE_UPDATE_IN_PROGRESS,
            installation::INSTALLATION_STATE_UPDATE_FAILED,
            installation::INSTALLATION_STATE_HIBERNATION_REQUESTED,
            installation::INSTALLATION_STATE_HIBERNATION_IN_PROGRESS,
            installation::INSTALLATION_STATE_HIBERNATING,
            installation::INSTALLATION_STATE_WAKE_UP_REQUESTED,
            installation::INSTALLATION_STATE_DELETION_PENDING_REQUESTED,
            installation::INSTALLATION_STATE_DELETION_PENDING_IN_PROGRESS,
            installation::INSTALLATION_STATE_DELETION_FAILED,
        ],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_DELETION_CANCELLATION_REQUESTED,
        &[installation::INSTALLATION_STATE_DELETION_PENDING],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_DELETION_REQUESTED,
        &[
            installation::INSTALLATION_STATE_CREATION_REQUESTED,
            installation::INSTALLATION_STATE_CREATION_FAILED,
            installation::INSTALLATION_STATE_CREATION_NO_COMPATIBLE_CLUSTERS,
            installation::INSTALLATION_STATE_DELETION_PENDING,
            installation::INSTALLATION_STATE_DELETION_REQUESTED,
            installation::INSTALLATION_STATE_DELETION_IN_PROGRESS,
            installation::INSTALLATION_STATE_DELETION_FAILED,
        ],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_DB_RESTORATION_IN_PROGRESS,
        &[installation::INSTALLATION_STATE_HIBERNATING],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_DB_MIGRATION_IN_PROGRESS,
        &[installation::INSTALLATION_STATE_HIBERNATING],
    ),
    rule(
        ResourceKind::Installation,
        installation::INSTALLATION_STATE_DB_MIGRATION_ROLLBACK_IN_PROGRESS,
        &[installation::INSTALLATION_STATE_HIBERNATING],
    ),
    // Backups
    rule(
        ResourceKind::InstallationBackup,
        backup::BACKUP_STATE_DELETION_REQUESTED,
        &[
            backup::BACKUP_STATE_REQUESTED,
            backup::BACKUP_STATE_IN_PROGRESS,
            backup::BACKUP_STATE_SUCCEEDED,
            backup::BACKUP_STATE_FAILED,
            backup::BACKUP_STATE_DELETION_REQUESTED,
        ],
    ),
    // Database migrations
    rule(
        ResourceKind::InstallationDbMigration,
        migration::DB_MIGRATION_STATE_ROLLBACK_REQUESTED,
        &[
            migration::DB_MIGRATION_STATE_SUCCEEDED,
            migration::DB_MIGRATION_STATE_ROLLBACK_REQUESTED,
        ],
    ),
    rule(
        ResourceKind::InstallationDbMigration,
        migration::DB_MIGRATION_STATE_DELETION_REQUESTED,
        &[
            migration::DB_MIGRATION_STATE_SUCCEEDED,
            migration::DB_MIGRATION_STATE_FAILED,
            migration::DB_MIGRATION_STATE_ROLLBACK_FINISHED,
            migration::DB_MIGRATION_STATE_DELETION_REQUESTED,
        ],
    ),
    // Database restorations
    rule(
        ResourceKind::InstallationDbRestoration,
        restoration::DB_RESTORATION_STATE_DELETION_REQUESTED,
        &[
            restoration::DB_RESTORATION_STATE_SUCCEEDED,
            restoration::DB_RESTORATION_STATE_FAILED,
            restoration::DB_RESTORATION_STATE_INVALID,
            restoration::DB_RESTORATION_STATE_DELETION_REQUESTED,
        ],
    ),
    // Multitenant databases
    rule(
        ResourceKind::MultitenantDatabase,
        mtdb::MULTITENANT_DATABASE_STATE_DELETION_REQUESTED,
        &[
            mtdb::MULTITENANT_DATABASE_STATE_STABLE,
            mtdb::MULTITENANT_DATABASE_STATE_DELETION_REQUESTED,
        ],
    ),
    // Subscriptions: the state is the last delivery status
    rule(
        ResourceKind::Subscription,
        subscription::SUBSCRIPTION_DELIVERY_SUCCEEDED,
        &[
            subscription::SUBSCRIPTION_DELIVERY_NONE,
            subscription::SUBSCRIPTION_DELIVERY_SUCCEEDED,
            subscription::SUBSCRIPTION_DELIVERY_FAILED,
        ],
    ),
    rule(
        ResourceKind::Subscription,
        subscription::SUBSCRIPTION_DELIVERY_FAILED,
        &[
            subscription::SUBSCRIPTION_DELIVERY_NONE,
            subscription::SUBSCRIPTION_DELIVERY_SUCCEEDED,
            subscription::SUBSCRIPTION_DELIVERY_FAILED,
        ],
    ),
];

/// Immutable lookup built from [`TRANSITION_RULES`].
pub struct StateRegistry {
    rules: HashMap<ResourceKind, HashMap<&'static str, HashSet<&'static str>>>,
    states: HashMap<ResourceKind, &'static [&'static str]>,
    pending_work: HashMap<ResourceKind, &'static [&'static str]>,
}

static REGISTRY: Lazy<StateRegistry> = Lazy::new(|| StateRegistry::from_rules(TRANSITION_RULES));

/// The process-wide registry.
pub fn registry() -> &'static StateRegistry {
    &REGISTRY
}

impl StateRegistry {
    /// Builds a registry from transition rules. Rules for the same target are merged.
    pub fn from_rules(rules: &[TransitionRule]) -> Self {
        let mut table: HashMap<ResourceKind, HashMap<&'static str, HashSet<&'static str>>> =
            HashMap::new();
        for r in rules {
            table
                .entry(r.kind)
                .or_default()
                .entry(r.target)
                .or_default()
                .extend(r.sources.iter().copied());
        }

        let states = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, all_states_for(*kind)))
            .collect();
        let pending_work = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, pending_work_for(*kind)))
            .collect();

        Self {
            rules: table,
            states,
            pending_work,
        }
    }

    /// True iff `target` has a rule for `kind` and `current` is among its sources.
    pub fn valid_transition(&self, kind: ResourceKind, current: &str, target: &str) -> bool {
        self.rules
            .get(&kind)
            .and_then(|targets| targets.get(target))
            .map(|sources| sources.contains(current))
            .unwrap_or(false)
    }

    /// Like [`valid_transition`](Self::valid_transition), but returns a
    /// conflict error carrying the state pair.
    pub fn ensure_transition(&self, kind: ResourceKind, current: &str, target: &str) -> Result<()> {
        if self.valid_transition(kind, current, target) {
            Ok(())
        } else {
            Err(ModelError::InvalidTransition {
                kind,
                current: current.to_string(),
                target: target.to_string(),
            })
        }
    }

    pub fn all_states(&self, kind: ResourceKind) -> &'static [&'static str] {
        self.states.get(&kind).copied().unwrap_or(&[])
    }

    pub fn pending_work_states(&self, kind: ResourceKind) -> &'static [&'static str] {
        self.pending_work.get(&kind).copied().unwrap_or(&[])
    }

    pub fn is_known_state(&self, kind: ResourceKind, state: &str) -> bool {
        self.all_states(kind).contains(&state)
    }

    pub fn is_pending_work(&self, kind: ResourceKind, state: &str) -> bool {
        self.pending_work_states(kind).contains(&state)
    }

    /// Requestable target states for `kind`.
    pub fn targets(&self, kind: ResourceKind) -> Vec<&'static str> {
        let mut targets: Vec<&'static str> = self
            .rules
            .get(&kind)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        targets.sort_unstable();
        targets
    }

    /// Supervisor work priority; only clusters rank their states.
    pub fn work_priority(&self, kind: ResourceKind, state: &str) -> i32 {
        match kind {
            ResourceKind::Cluster => cluster::cluster_state_work_priority(state),
            _ => 0,
        }
    }
}

fn all_states_for(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Cluster => cluster::ALL_CLUSTER_STATES,
        ResourceKind::Installation => installation::ALL_INSTALLATION_STATES,
        ResourceKind::InstallationBackup => backup::ALL_BACKUP_STATES,
        ResourceKind::InstallationDbMigration => migration::ALL_DB_MIGRATION_STATES,
        ResourceKind::InstallationDbRestoration => restoration::ALL_DB_RESTORATION_STATES,
        ResourceKind::MultitenantDatabase => mtdb::ALL_MULTITENANT_DATABASE_STATES,
        ResourceKind::Subscription => subscription::ALL_SUBSCRIPTION_DELIVERY_STATUSES,
    }
}

fn pending_work_for(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Cluster => cluster::CLUSTER_STATES_PENDING_WORK,
        ResourceKind::Installation => installation::INSTALLATION_STATES_PENDING_WORK,
        ResourceKind::InstallationBackup => backup::BACKUP_STATES_PENDING_WORK,
        ResourceKind::InstallationDbMigration => migration::DB_MIGRATION_STATES_PENDING_WORK,
        ResourceKind::InstallationDbRestoration => restoration::DB_RESTORATION_STATES_PENDING_WORK,
        ResourceKind::MultitenantDatabase => mtdb::MULTITENANT_DATABASE_STATES_PENDING_WORK,
        ResourceKind::Subscription => subscription::SUBSCRIPTION_STATES_PENDING_WORK,
    }
}

/// Whether a `kind` resource in `current` may be moved to `target`.
pub fn valid_transition_state(kind: ResourceKind, current: &str, target: &str) -> bool {
    registry().valid_transition(kind, current, target)
}

/// Error-returning form of [`valid_transition_state`].
pub fn ensure_transition(kind: ResourceKind, current: &str, target: &str) -> Result<()> {
    registry().ensure_transition(kind, current, target)
}

/// A record whose lifecycle is governed by the registry.
pub trait StatefulResource {
    const KIND: ResourceKind;

    fn state(&self) -> &str;
    fn set_state(&mut self, state: &str);
}

/// Moves `resource` to `target` when the transition is legal.
///
/// Returns `Ok(false)` for a legal self-loop (nothing to persist) and an
/// [`ModelError::InvalidTransition`] without touching the record otherwise.
pub fn request_state<R: StatefulResource>(resource: &mut R, target: &str) -> Result<bool> {
    ensure_transition(R::KIND, resource.state(), target)?;
    if resource.state() == target {
        return Ok(false);
    }
    resource.set_state(target);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_every_rule_uses_known_states() {
        let registry = registry();
        for r in TRANSITION_RULES {
            assert!(
                registry.is_known_state(r.kind, r.target),
                "{} target '{}' is not a known state",
                r.kind,
                r.target
            );
            for source in r.sources {
                assert!(
                    registry.is_known_state(r.kind, source),
                    "{} source '{}' is not a known state",
                    r.kind,
                    source
                );
            }
        }
    }

    #[test]
    fn test_pending_work_states_are_known() {
        let registry = registry();
        for kind in ResourceKind::ALL {
            for state in registry.pending_work_states(kind) {
                assert!(registry.is_known_state(kind, state), "{} {}", kind, state);
            }
        }
    }

    #[test]
    fn test_cluster_transitions() {
        let cases = [
            ("stable", "resize-requested", true),
            ("resize-failed", "resize-requested", true),
            ("resize-requested", "resize-requested", true),
            ("creation-requested", "creation-requested", true),
            ("creation-in-progress", "resize-requested", false),
            ("deleted", "deletion-requested", false),
            ("stable", "deletion-requested", true),
            ("upgrade-failed", "upgrade-requested", true),
            ("provisioning-failed", "provisioning-requested", true),
            // Not requestable: supervisor-internal states have no rule
            ("creation-requested", "creation-in-progress", false),
            ("stable", "stable", false),
        ];
        for (current, target, expected) in cases {
            assert_eq!(
                valid_transition_state(ResourceKind::Cluster, current, target),
                expected,
                "{} -> {}",
                current,
                target
            );
        }
    }

    #[test]
    fn test_installation_transitions() {
        let kind = ResourceKind::Installation;
        assert!(valid_transition_state(kind, "stable", "hibernation-requested"));
        assert!(valid_transition_state(kind, "hibernating", "wake-up-requested"));
        assert!(!valid_transition_state(kind, "stable", "wake-up-requested"));
        assert!(valid_transition_state(kind, "deletion-pending", "deletion-cancellation-requested"));
        assert!(valid_transition_state(kind, "hibernating", "db-migration-in-progress"));
        assert!(!valid_transition_state(kind, "stable", "db-migration-in-progress"));
    }

    #[test]
    fn test_operation_transitions() {
        assert!(valid_transition_state(
            ResourceKind::InstallationBackup,
            "backup-succeeded",
            "deletion-requested"
        ));
        assert!(!valid_transition_state(
            ResourceKind::InstallationBackup,
            "deleted",
            "deletion-requested"
        ));
        assert!(valid_transition_state(
            ResourceKind::InstallationDbMigration,
            "succeeded",
            "rollback-requested"
        ));
        assert!(!valid_transition_state(
            ResourceKind::InstallationDbMigration,
            "failed",
            "rollback-requested"
        ));
        assert!(valid_transition_state(
            ResourceKind::InstallationDbRestoration,
            "invalid",
            "deletion-requested"
        ));
    }

    #[test]
    fn test_ensure_transition_reports_state_pair() {
        let err = ensure_transition(ResourceKind::Cluster, "deleted", "resize-requested")
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidTransition {
                kind: ResourceKind::Cluster,
                current: "deleted".to_string(),
                target: "resize-requested".to_string(),
            }
        );
        assert!(ensure_transition(ResourceKind::Cluster, "stable", "resize-requested").is_ok());
    }

    #[test]
    fn test_kinds_do_not_share_rules() {
        // "deletion-requested" exists for several kinds, with different sources.
        assert!(valid_transition_state(
            ResourceKind::MultitenantDatabase,
            "stable",
            "deletion-requested"
        ));
        assert!(!valid_transition_state(
            ResourceKind::InstallationBackup,
            "stable",
            "deletion-requested"
        ));
    }

    #[test]
    fn test_rules_for_same_target_are_merged() {
        let rules = [
            rule(ResourceKind::Cluster, "b", &["a"]),
            rule(ResourceKind::Cluster, "b", &["c"]),
        ];
        let registry = StateRegistry::from_rules(&rules);
        assert!(registry.valid_transition(ResourceKind::Cluster, "a", "b"));
        assert!(registry.valid_transition(ResourceKind::Cluster, "c", "b"));
        assert_eq!(registry.targets(ResourceKind::Cluster), vec!["b"]);
    }

    #[test]
    fn test_cluster_work_priority_orders_creation_first() {
        let registry = registry();
        let kind = ResourceKind::Cluster;
        assert!(
            registry.work_priority(kind, "creation-requested")
                > registry.work_priority(kind, "creation-in-progress")
        );
        assert!(
            registry.work_priority(kind, "creation-in-progress")
                > registry.work_priority(kind, "resize-requested")
        );
        assert_eq!(registry.work_priority(kind, "stable"), 0);
        assert_eq!(
            registry.work_priority(ResourceKind::Installation, "creation-requested"),
            0
        );
    }

    struct FakeCluster(String);

    impl StatefulResource for FakeCluster {
        const KIND: ResourceKind = ResourceKind::Cluster;

        fn state(&self) -> &str {
            &self.0
        }
        fn set_state(&mut self, state: &str) {
            self.0 = state.to_string();
        }
    }

    #[test]
    fn test_request_state() {
        let mut cluster = FakeCluster("stable".to_string());
        assert!(request_state(&mut cluster, "resize-requested").unwrap());
        assert_eq!(cluster.0, "resize-requested");
        // Self-loop is legal but reports no change
        assert!(!request_state(&mut cluster, "resize-requested").unwrap());

        let mut deleted = FakeCluster("deleted".to_string());
        assert!(request_state(&mut deleted, "deletion-requested").is_err());
        assert_eq!(deleted.0, "deleted");
    }

    fn any_kind() -> impl Strategy<Value = ResourceKind> {
        prop::sample::select(ResourceKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_unknown_targets_fail_closed(
            kind in any_kind(),
            current in "[a-z-]{0,30}",
            target in "[a-z-]{0,30}",
        ) {
            let registry = registry();
            prop_assume!(!registry.targets(kind).contains(&target.as_str()));
            prop_assert!(!registry.valid_transition(kind, &current, &target));
        }

        #[test]
        fn prop_known_targets_reject_unlisted_sources(
            kind in any_kind(),
            current in "[a-z-]{0,30}",
        ) {
            let registry = registry();
            for target in registry.targets(kind) {
                let listed = TRANSITION_RULES
                    .iter()
                    .any(|r| r.kind == kind && r.target == target && r.sources.contains(&current.as_str()));
                prop_assert_eq!(registry.valid_transition(kind, &current, target), listed);
            }
        }
    }
}
