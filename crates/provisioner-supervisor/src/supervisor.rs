/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Cluster reconciliation.
//!
//! Each tick lists clusters in pending-work states, orders them by work
//! priority and, for each one: takes the lock, runs the step for its state,
//! persists the result, emits a [`StateChangeEvent`] when the state moved and
//! releases the lock. A cluster locked by someone else is skipped until the
//! next tick.

use crate::error::Result;
use crate::store::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use provisioner_models::ids::new_id;
use provisioner_models::models::clusters::{
    sort_clusters_by_work_priority, Cluster, CLUSTER_STATE_CREATION_FAILED,
    CLUSTER_STATE_CREATION_IN_PROGRESS, CLUSTER_STATE_CREATION_REQUESTED, CLUSTER_STATE_DELETED,
    CLUSTER_STATE_DELETION_FAILED, CLUSTER_STATE_DELETION_REQUESTED,
    CLUSTER_STATE_NODEGROUPS_CREATION_FAILED, CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED,
    CLUSTER_STATE_NODEGROUPS_DELETION_FAILED, CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED,
    CLUSTER_STATE_PROVISIONING_FAILED, CLUSTER_STATE_PROVISIONING_REQUESTED,
    CLUSTER_STATE_PROVISION_IN_PROGRESS, CLUSTER_STATE_REFRESH_METADATA,
    CLUSTER_STATE_RESIZE_FAILED, CLUSTER_STATE_RESIZE_REQUESTED, CLUSTER_STATE_STABLE,
    CLUSTER_STATE_UPGRADE_FAILED, CLUSTER_STATE_UPGRADE_REQUESTED,
    CLUSTER_STATE_WAITING_FOR_NODES,
};
use provisioner_models::models::events::StateChangeEvent;
use provisioner_models::transitions::{registry, ResourceKind};
use provisioner_utils::Settings;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Collaborators
// =============================================================================

/// Talks to the infrastructure provider on behalf of the supervisor.
///
/// Checks return `Ok(false)` while the work is still underway; the cluster
/// then stays in its current state until the next tick.
pub trait ClusterProvisioner: Send + Sync {
    fn create_cluster(&self, cluster: &Cluster) -> Result<()>;
    fn check_cluster_created(&self, cluster: &Cluster) -> Result<bool>;
    fn check_nodes_created(&self, cluster: &Cluster) -> Result<bool>;
    fn provision_cluster(&self, cluster: &Cluster) -> Result<()>;
    /// Applies `cluster.provisioner_metadata.change_request` to the cluster.
    fn upgrade_cluster(&self, cluster: &Cluster) -> Result<()>;
    fn resize_cluster(&self, cluster: &Cluster) -> Result<()>;
    fn create_node_groups(&self, cluster: &Cluster) -> Result<()>;
    fn delete_node_groups(&self, cluster: &Cluster) -> Result<()>;
    fn refresh_cluster_metadata(&self, cluster: &mut Cluster) -> Result<()>;
    /// Returns `Ok(true)` once the cluster is gone.
    fn delete_cluster(&self, cluster: &Cluster) -> Result<bool>;
}

/// Receives state changes after they are persisted.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StateChangeEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: StateChangeEvent) {
        (**self).emit(event)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Settings for one supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Lock owner token for this instance
    pub instance_id: String,
    pub lock_expiry: Option<Duration>,
    /// Maximum clusters processed per tick
    pub cluster_batch_size: usize,
}

impl SupervisorOptions {
    /// Options from configuration; an instance ID is generated when none is set.
    pub fn from_settings(settings: &Settings) -> Self {
        let instance_id = settings
            .supervisor
            .instance_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_id);
        let lock_expiry = settings
            .supervisor
            .lock_expiry()
            .and_then(|expiry| Duration::from_std(expiry).ok());
        Self {
            instance_id,
            lock_expiry,
            cluster_batch_size: settings.supervisor.cluster_batch_size,
        }
    }
}

pub struct ClusterSupervisor<P, E> {
    store: Arc<MemoryStore<Cluster>>,
    provisioner: P,
    events: E,
    options: SupervisorOptions,
}

impl<P: ClusterProvisioner, E: EventSink> ClusterSupervisor<P, E> {
    pub fn new(
        store: Arc<MemoryStore<Cluster>>,
        provisioner: P,
        events: E,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            store,
            provisioner,
            events,
            options,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.options.instance_id
    }

    /// Runs one reconciliation pass and returns how many clusters were worked on.
    pub fn do_tick(&self, now: DateTime<Utc>) -> usize {
        let mut clusters = self
            .store
            .list(|c| registry().is_pending_work(ResourceKind::Cluster, &c.state));
        if clusters.is_empty() {
            return 0;
        }
        sort_clusters_by_work_priority(&mut clusters);
        debug!(
            pending = clusters.len(),
            batch = self.options.cluster_batch_size,
            "clusters with pending work"
        );

        let mut worked = 0;
        for cluster in clusters.iter().take(self.options.cluster_batch_size) {
            if self.supervise(&cluster.id, now) {
                worked += 1;
            }
        }
        worked
    }

    /// Works one cluster under its lock. Returns false when it was skipped.
    fn supervise(&self, cluster_id: &str, now: DateTime<Utc>) -> bool {
        let owner = self.options.instance_id.as_str();
        let mut cluster =
            match self
                .store
                .lock(cluster_id, owner, now, self.options.lock_expiry)
            {
                Ok(cluster) => cluster,
                Err(e) if e.is_lock_conflict() => {
                    debug!(cluster_id, "cluster locked elsewhere, skipping: {}", e);
                    return false;
                }
                Err(e) => {
                    error!(cluster_id, "failed to lock cluster: {}", e);
                    return false;
                }
            };

        // The state may have moved between listing and locking.
        let worked = registry().is_pending_work(ResourceKind::Cluster, &cluster.state);
        if worked {
            let old_state = cluster.state.clone();
            if let Some(next) = self.transition(&mut cluster) {
                if next == CLUSTER_STATE_DELETED {
                    cluster.delete_at = Some(now);
                }
                cluster.state = next.to_string();
            }

            match self.store.update(cluster.clone(), Some(owner)) {
                Ok(()) if old_state != cluster.state => {
                    info!(
                        cluster_id,
                        old_state = old_state.as_str(),
                        state = cluster.state.as_str(),
                        "cluster transitioned"
                    );
                    self.events.emit(StateChangeEvent::new(
                        new_id(),
                        now,
                        ResourceKind::Cluster,
                        cluster_id,
                        old_state,
                        cluster.state.as_str(),
                    ));
                }
                Ok(()) => {}
                Err(e) => error!(cluster_id, "failed to persist cluster: {}", e),
            }
        }

        if let Err(e) = self.store.unlock(cluster_id, owner) {
            error!(cluster_id, lock_owner = owner, "failed to release cluster lock: {}", e);
        }
        worked
    }

    /// Runs the step for the cluster's current state and returns the next
    /// state, or `None` when no step exists for it.
    fn transition(&self, cluster: &mut Cluster) -> Option<&'static str> {
        let next = match cluster.state.as_str() {
            CLUSTER_STATE_CREATION_REQUESTED => self.step(
                cluster,
                |p, c| p.create_cluster(c),
                CLUSTER_STATE_CREATION_IN_PROGRESS,
                CLUSTER_STATE_CREATION_FAILED,
            ),
            CLUSTER_STATE_CREATION_IN_PROGRESS => self.check(
                cluster,
                |p, c| p.check_cluster_created(c),
                CLUSTER_STATE_CREATION_IN_PROGRESS,
                CLUSTER_STATE_WAITING_FOR_NODES,
                CLUSTER_STATE_CREATION_FAILED,
            ),
            CLUSTER_STATE_WAITING_FOR_NODES => self.check(
                cluster,
                |p, c| p.check_nodes_created(c),
                CLUSTER_STATE_WAITING_FOR_NODES,
                CLUSTER_STATE_PROVISION_IN_PROGRESS,
                CLUSTER_STATE_CREATION_FAILED,
            ),
            CLUSTER_STATE_PROVISION_IN_PROGRESS | CLUSTER_STATE_PROVISIONING_REQUESTED => self
                .step(
                    cluster,
                    |p, c| p.provision_cluster(c),
                    CLUSTER_STATE_STABLE,
                    CLUSTER_STATE_PROVISIONING_FAILED,
                ),
            CLUSTER_STATE_UPGRADE_REQUESTED => self.change(
                cluster,
                |p, c| p.upgrade_cluster(c),
                CLUSTER_STATE_UPGRADE_FAILED,
            ),
            CLUSTER_STATE_RESIZE_REQUESTED => self.change(
                cluster,
                |p, c| p.resize_cluster(c),
                CLUSTER_STATE_RESIZE_FAILED,
            ),
            CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED => self.change(
                cluster,
                |p, c| p.create_node_groups(c),
                CLUSTER_STATE_NODEGROUPS_CREATION_FAILED,
            ),
            CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED => self.change(
                cluster,
                |p, c| p.delete_node_groups(c),
                CLUSTER_STATE_NODEGROUPS_DELETION_FAILED,
            ),
            CLUSTER_STATE_REFRESH_METADATA => {
                match self.provisioner.refresh_cluster_metadata(cluster) {
                    Ok(()) => CLUSTER_STATE_STABLE,
                    Err(e) => {
                        warn!(cluster_id = cluster.id.as_str(), "failed to refresh metadata: {}", e);
                        CLUSTER_STATE_REFRESH_METADATA
                    }
                }
            }
            CLUSTER_STATE_DELETION_REQUESTED => self.check(
                cluster,
                |p, c| p.delete_cluster(c),
                CLUSTER_STATE_DELETION_REQUESTED,
                CLUSTER_STATE_DELETED,
                CLUSTER_STATE_DELETION_FAILED,
            ),
            other => {
                warn!(
                    cluster_id = cluster.id.as_str(),
                    state = other,
                    "no supervisor step for cluster state"
                );
                return None;
            }
        };
        Some(next)
    }

    fn step<F>(
        &self,
        cluster: &Cluster,
        action: F,
        success: &'static str,
        failure: &'static str,
    ) -> &'static str
    where
        F: FnOnce(&P, &Cluster) -> Result<()>,
    {
        match action(&self.provisioner, cluster) {
            Ok(()) => success,
            Err(e) => {
                warn!(cluster_id = cluster.id.as_str(), state = cluster.state.as_str(), "cluster step failed: {}", e);
                failure
            }
        }
    }

    fn check<F>(
        &self,
        cluster: &Cluster,
        is_ready: F,
        waiting: &'static str,
        ready: &'static str,
        failure: &'static str,
    ) -> &'static str
    where
        F: FnOnce(&P, &Cluster) -> Result<bool>,
    {
        match is_ready(&self.provisioner, cluster) {
            Ok(true) => ready,
            Ok(false) => waiting,
            Err(e) => {
                warn!(cluster_id = cluster.id.as_str(), state = cluster.state.as_str(), "cluster check failed: {}", e);
                failure
            }
        }
    }

    /// Runs a step that carries out the pending change request and folds it
    /// into the cluster's metadata on success.
    fn change<F>(&self, cluster: &mut Cluster, action: F, failure: &'static str) -> &'static str
    where
        F: FnOnce(&P, &Cluster) -> Result<()>,
    {
        let next = self.step(cluster, action, CLUSTER_STATE_STABLE, failure);
        if next == CLUSTER_STATE_STABLE {
            cluster.provisioner_metadata.apply_change_request();
        }
        next
    }
}
