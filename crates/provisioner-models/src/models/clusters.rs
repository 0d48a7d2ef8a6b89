/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Cluster records, their states, and the requests that create and change them.
//!
//! Infrastructure changes are not applied directly: patches record a
//! [`ClusterChangeRequest`] on the cluster's provisioner metadata, which the
//! provisioning collaborator reads once the cluster reaches the matching
//! `*-requested` state.

use super::node_groups::{
    aggregate_max, aggregate_min, rebalance_node_groups, validate_node_group_name, NodeGroup,
    NodeGroups,
};
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::patch::{ApplyPatch, Patch};
use crate::query::{append_optional, EncodesToQuery, Paging, QueryPairs};
use crate::transitions::{ResourceKind, StatefulResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// States
// =============================================================================

pub const CLUSTER_STATE_STABLE: &str = "stable";
pub const CLUSTER_STATE_REFRESH_METADATA: &str = "refresh-metadata";
pub const CLUSTER_STATE_CREATION_REQUESTED: &str = "creation-requested";
pub const CLUSTER_STATE_CREATION_IN_PROGRESS: &str = "creation-in-progress";
pub const CLUSTER_STATE_WAITING_FOR_NODES: &str = "waiting-for-nodes";
pub const CLUSTER_STATE_PROVISION_IN_PROGRESS: &str = "provision-in-progress";
pub const CLUSTER_STATE_CREATION_FAILED: &str = "creation-failed";
pub const CLUSTER_STATE_PROVISIONING_REQUESTED: &str = "provisioning-requested";
pub const CLUSTER_STATE_PROVISIONING_FAILED: &str = "provisioning-failed";
pub const CLUSTER_STATE_UPGRADE_REQUESTED: &str = "upgrade-requested";
pub const CLUSTER_STATE_UPGRADE_FAILED: &str = "upgrade-failed";
pub const CLUSTER_STATE_RESIZE_REQUESTED: &str = "resize-requested";
pub const CLUSTER_STATE_RESIZE_FAILED: &str = "resize-failed";
pub const CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED: &str = "nodegroups-creation-requested";
pub const CLUSTER_STATE_NODEGROUPS_CREATION_FAILED: &str = "nodegroups-creation-failed";
pub const CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED: &str = "nodegroups-deletion-requested";
pub const CLUSTER_STATE_NODEGROUPS_DELETION_FAILED: &str = "nodegroups-deletion-failed";
pub const CLUSTER_STATE_DELETION_REQUESTED: &str = "deletion-requested";
pub const CLUSTER_STATE_DELETION_FAILED: &str = "deletion-failed";
pub const CLUSTER_STATE_DELETED: &str = "deleted";

pub const ALL_CLUSTER_STATES: &[&str] = &[
    CLUSTER_STATE_STABLE,
    CLUSTER_STATE_REFRESH_METADATA,
    CLUSTER_STATE_CREATION_REQUESTED,
    CLUSTER_STATE_CREATION_IN_PROGRESS,
    CLUSTER_STATE_WAITING_FOR_NODES,
    CLUSTER_STATE_PROVISION_IN_PROGRESS,
    CLUSTER_STATE_CREATION_FAILED,
    CLUSTER_STATE_PROVISIONING_REQUESTED,
    CLUSTER_STATE_PROVISIONING_FAILED,
    CLUSTER_STATE_UPGRADE_REQUESTED,
    CLUSTER_STATE_UPGRADE_FAILED,
    CLUSTER_STATE_RESIZE_REQUESTED,
    CLUSTER_STATE_RESIZE_FAILED,
    CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED,
    CLUSTER_STATE_NODEGROUPS_CREATION_FAILED,
    CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED,
    CLUSTER_STATE_NODEGROUPS_DELETION_FAILED,
    CLUSTER_STATE_DELETION_REQUESTED,
    CLUSTER_STATE_DELETION_FAILED,
    CLUSTER_STATE_DELETED,
];

/// States the supervisor re-evaluates every tick.
pub const CLUSTER_STATES_PENDING_WORK: &[&str] = &[
    CLUSTER_STATE_CREATION_REQUESTED,
    CLUSTER_STATE_CREATION_IN_PROGRESS,
    CLUSTER_STATE_WAITING_FOR_NODES,
    CLUSTER_STATE_PROVISION_IN_PROGRESS,
    CLUSTER_STATE_PROVISIONING_REQUESTED,
    CLUSTER_STATE_REFRESH_METADATA,
    CLUSTER_STATE_UPGRADE_REQUESTED,
    CLUSTER_STATE_RESIZE_REQUESTED,
    CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED,
    CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED,
    CLUSTER_STATE_DELETION_REQUESTED,
];

const CLUSTER_WORK_PRIORITY: &[(&str, i32)] = &[
    (CLUSTER_STATE_CREATION_REQUESTED, 10),
    (CLUSTER_STATE_CREATION_IN_PROGRESS, 9),
    (CLUSTER_STATE_WAITING_FOR_NODES, 8),
    (CLUSTER_STATE_PROVISION_IN_PROGRESS, 7),
    (CLUSTER_STATE_PROVISIONING_REQUESTED, 6),
    (CLUSTER_STATE_DELETION_REQUESTED, 5),
    (CLUSTER_STATE_UPGRADE_REQUESTED, 4),
    (CLUSTER_STATE_RESIZE_REQUESTED, 3),
    (CLUSTER_STATE_NODEGROUPS_CREATION_REQUESTED, 2),
    (CLUSTER_STATE_NODEGROUPS_DELETION_REQUESTED, 2),
    (CLUSTER_STATE_REFRESH_METADATA, 1),
];

/// Higher is served first; unlisted states rank 0.
pub fn cluster_state_work_priority(state: &str) -> i32 {
    CLUSTER_WORK_PRIORITY
        .iter()
        .find(|(s, _)| *s == state)
        .map(|(_, p)| *p)
        .unwrap_or(0)
}

/// Orders clusters by descending work priority. The sort is stable, so
/// clusters of equal priority keep their incoming (creation) order.
pub fn sort_clusters_by_work_priority(clusters: &mut [Cluster]) {
    clusters.sort_by_key(|c| std::cmp::Reverse(cluster_state_work_priority(&c.state)));
}

// =============================================================================
// Providers and provisioners
// =============================================================================

pub const PROVIDER_AWS: &str = "aws";
pub const VALID_PROVIDERS: &[&str] = &[PROVIDER_AWS];

pub const PROVISIONER_KOPS: &str = "kops";
pub const PROVISIONER_EKS: &str = "eks";
pub const PROVISIONER_EXTERNAL: &str = "external";
pub const VALID_PROVISIONERS: &[&str] = &[PROVISIONER_KOPS, PROVISIONER_EKS, PROVISIONER_EXTERNAL];

pub const DEFAULT_KUBERNETES_VERSION: &str = "latest";
pub const DEFAULT_MASTER_INSTANCE_TYPE: &str = "t3.medium";
pub const DEFAULT_NODE_INSTANCE_TYPE: &str = "m5.large";
pub const DEFAULT_NODE_COUNT: i64 = 2;
pub const DEFAULT_MAX_PODS_PER_NODE: i64 = 200;
pub const DEFAULT_ZONE: &str = "us-east-1a";
pub const MIN_MAX_PODS_PER_NODE: i64 = 10;

// =============================================================================
// Records
// =============================================================================

/// A pending infrastructure change, consumed by the provisioning collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_min_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_max_count: Option<i64>,
    /// Full per-group sizes after a resize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_groups: Option<NodeGroups>,
    #[serde(default, skip_serializing_if = "NodeGroups::is_empty")]
    pub node_groups_to_create: NodeGroups,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_groups_to_delete: Vec<String>,
}

impl ClusterChangeRequest {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Folds a later request into this one. Fields set in `later` win; the
    /// rest of the pending request is kept.
    pub fn merge(&mut self, later: ClusterChangeRequest) {
        fn take_newer<T>(current: &mut Option<T>, later: Option<T>) {
            if later.is_some() {
                *current = later;
            }
        }

        take_newer(&mut self.version, later.version);
        take_newer(&mut self.ami_id, later.ami_id);
        take_newer(&mut self.master_instance_type, later.master_instance_type);
        take_newer(&mut self.node_instance_type, later.node_instance_type);
        take_newer(&mut self.node_min_count, later.node_min_count);
        take_newer(&mut self.node_max_count, later.node_max_count);
        take_newer(&mut self.node_groups, later.node_groups);
        self.node_groups_to_create.extend(later.node_groups_to_create);
        for name in later.node_groups_to_delete {
            if !self.node_groups_to_delete.contains(&name) {
                self.node_groups_to_delete.push(name);
            }
        }
    }
}

/// Provisioner-specific settings of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerMetadata {
    pub version: String,
    #[serde(default)]
    pub ami_id: String,
    pub master_instance_type: String,
    pub node_instance_type: String,
    pub node_min_count: i64,
    pub node_max_count: i64,
    pub max_pods_per_node: i64,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub node_groups: NodeGroups,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_request: Option<ClusterChangeRequest>,
}

impl ProvisionerMetadata {
    /// Folds the pending change request into the current settings.
    pub fn apply_change_request(&mut self) {
        let Some(change) = self.change_request.take() else {
            return;
        };
        if let Some(v) = change.version {
            self.version = v;
        }
        if let Some(v) = change.ami_id {
            self.ami_id = v;
        }
        if let Some(v) = change.master_instance_type {
            self.master_instance_type = v;
        }
        if let Some(v) = change.node_instance_type {
            self.node_instance_type = v;
        }
        if let Some(v) = change.node_min_count {
            self.node_min_count = v;
        }
        if let Some(v) = change.node_max_count {
            self.node_max_count = v;
        }
        if let Some(groups) = change.node_groups {
            self.node_groups = groups;
        }
        let membership_changed =
            !change.node_groups_to_create.is_empty() || !change.node_groups_to_delete.is_empty();
        self.node_groups.extend(change.node_groups_to_create);
        for name in change.node_groups_to_delete {
            self.node_groups.remove(&name);
        }
        if membership_changed && !self.node_groups.is_empty() {
            self.node_min_count = aggregate_min(&self.node_groups);
            self.node_max_count = self.node_max_count.max(self.node_min_count);
        }
    }
}

/// A Kubernetes cluster that hosts installations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub provider: String,
    pub provisioner: String,
    pub provisioner_metadata: ProvisionerMetadata,
    pub state: String,
    pub allow_installations: bool,
    #[serde(default)]
    pub annotations: Vec<String>,
    pub create_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl Cluster {
    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }

    pub fn is_kops(&self) -> bool {
        self.provisioner == PROVISIONER_KOPS
    }
}

impl Lockable for Cluster {
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

impl StatefulResource for Cluster {
    const KIND: ResourceKind = ResourceKind::Cluster;

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

/// Request to create a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateClusterRequest {
    pub provider: String,
    pub provisioner: String,
    pub version: String,
    pub ami_id: String,
    pub master_instance_type: String,
    pub node_instance_type: String,
    pub node_min_count: i64,
    pub node_max_count: i64,
    pub max_pods_per_node: i64,
    pub zones: Vec<String>,
    pub node_groups: NodeGroups,
    pub allow_installations: Option<bool>,
    pub annotations: Vec<String>,
}

impl CreateClusterRequest {
    /// Fills unset fields. `default_node_group` names the group created when
    /// the request lists none; explicit groups supply the node counts.
    pub fn set_defaults(&mut self, default_node_group: &str) {
        if self.provider.is_empty() {
            self.provider = PROVIDER_AWS.to_string();
        }
        if self.provisioner.is_empty() {
            self.provisioner = PROVISIONER_KOPS.to_string();
        }
        if self.version.is_empty() {
            self.version = DEFAULT_KUBERNETES_VERSION.to_string();
        }
        if self.master_instance_type.is_empty() {
            self.master_instance_type = DEFAULT_MASTER_INSTANCE_TYPE.to_string();
        }
        if self.node_instance_type.is_empty() {
            self.node_instance_type = DEFAULT_NODE_INSTANCE_TYPE.to_string();
        }
        if !self.node_groups.is_empty() && self.provisioner != PROVISIONER_EXTERNAL {
            if self.node_min_count == 0 {
                self.node_min_count = aggregate_min(&self.node_groups);
            }
            if self.node_max_count == 0 {
                self.node_max_count = aggregate_max(&self.node_groups);
            }
        }
        if self.node_min_count == 0 {
            self.node_min_count = DEFAULT_NODE_COUNT;
        }
        if self.node_max_count == 0 {
            self.node_max_count = self.node_min_count;
        }
        if self.max_pods_per_node == 0 {
            self.max_pods_per_node = DEFAULT_MAX_PODS_PER_NODE;
        }
        if self.zones.is_empty() && self.provisioner != PROVISIONER_EXTERNAL {
            self.zones = vec![DEFAULT_ZONE.to_string()];
        }
        if self.node_groups.is_empty() && self.provisioner != PROVISIONER_EXTERNAL {
            self.node_groups.insert(
                default_node_group.to_string(),
                NodeGroup {
                    min_count: self.node_min_count,
                    max_count: self.node_max_count,
                    instance_type: self.node_instance_type.clone(),
                },
            );
        }
        if self.allow_installations.is_none() {
            self.allow_installations = Some(true);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(ModelError::validation(
                "provider",
                format!("'{}' is not supported", self.provider),
            ));
        }
        if !VALID_PROVISIONERS.contains(&self.provisioner.as_str()) {
            return Err(ModelError::validation(
                "provisioner",
                format!("'{}' is not supported", self.provisioner),
            ));
        }
        if self.provisioner == PROVISIONER_EXTERNAL {
            return Ok(());
        }
        if self.version.trim().is_empty() {
            return Err(ModelError::validation("version", "must not be empty"));
        }
        validate_node_counts(self.node_min_count, self.node_max_count)?;
        if self.max_pods_per_node < MIN_MAX_PODS_PER_NODE {
            return Err(ModelError::validation(
                "max_pods_per_node",
                format!("must be at least {}", MIN_MAX_PODS_PER_NODE),
            ));
        }
        if self.zones.is_empty() {
            return Err(ModelError::validation("zones", "at least one zone is required"));
        }
        for (name, group) in &self.node_groups {
            group.validate(name)?;
        }
        if !self.node_groups.is_empty() {
            let total = aggregate_min(&self.node_groups);
            if total != self.node_min_count {
                return Err(ModelError::validation(
                    "node_min_count",
                    format!(
                        "({}) must equal the sum of the node group min counts ({})",
                        self.node_min_count, total
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Builds the cluster record in `creation-requested`.
    pub fn into_cluster(self, id: String, now: DateTime<Utc>) -> Cluster {
        Cluster {
            id,
            provider: self.provider,
            provisioner: self.provisioner,
            provisioner_metadata: ProvisionerMetadata {
                version: self.version,
                ami_id: self.ami_id,
                master_instance_type: self.master_instance_type,
                node_instance_type: self.node_instance_type,
                node_min_count: self.node_min_count,
                node_max_count: self.node_max_count,
                max_pods_per_node: self.max_pods_per_node,
                zones: self.zones,
                node_groups: self.node_groups,
                change_request: None,
            },
            state: CLUSTER_STATE_CREATION_REQUESTED.to_string(),
            allow_installations: self.allow_installations.unwrap_or(true),
            annotations: self.annotations,
            create_at: now,
            delete_at: None,
            lock: ResourceLock::default(),
        }
    }
}

fn validate_node_counts(min: i64, max: i64) -> Result<()> {
    if min < 1 {
        return Err(ModelError::validation("node_min_count", "must be at least 1"));
    }
    if max < min {
        return Err(ModelError::validation(
            "node_max_count",
            format!("({}) must not be less than node_min_count ({})", max, min),
        ));
    }
    Ok(())
}

/// Settings that change without touching infrastructure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchClusterRequest {
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub allow_installations: Patch<bool>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub max_pods_per_node: Patch<i64>,
}

impl ApplyPatch<Cluster> for PatchClusterRequest {
    fn validate(&self) -> Result<()> {
        if let Patch::Present(max_pods) = self.max_pods_per_node {
            if max_pods < MIN_MAX_PODS_PER_NODE {
                return Err(ModelError::validation(
                    "max_pods_per_node",
                    format!("must be at least {}", MIN_MAX_PODS_PER_NODE),
                ));
            }
        }
        Ok(())
    }

    fn apply_fields(&self, cluster: &mut Cluster) -> Result<bool> {
        let mut changed = self.allow_installations.apply_to(&mut cluster.allow_installations);
        changed |= self
            .max_pods_per_node
            .apply_to(&mut cluster.provisioner_metadata.max_pods_per_node);
        Ok(changed)
    }
}

/// Version and machine image changes, recorded as a change request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchUpgradeClusterRequest {
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub version: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub ami_id: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub master_instance_type: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub node_instance_type: Patch<String>,
}

fn changed_value(patch: &Patch<String>, current: &str) -> Option<String> {
    match patch {
        Patch::Present(v) if v != current => Some(v.clone()),
        _ => None,
    }
}

impl ApplyPatch<Cluster> for PatchUpgradeClusterRequest {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("version", &self.version),
            ("master_instance_type", &self.master_instance_type),
            ("node_instance_type", &self.node_instance_type),
        ];
        for (field, patch) in fields {
            if let Patch::Present(v) = patch {
                if v.trim().is_empty() {
                    return Err(ModelError::validation(field, "must not be empty"));
                }
            }
        }
        Ok(())
    }

    fn apply_fields(&self, cluster: &mut Cluster) -> Result<bool> {
        let metadata = &cluster.provisioner_metadata;
        let change = ClusterChangeRequest {
            version: changed_value(&self.version, &metadata.version),
            ami_id: changed_value(&self.ami_id, &metadata.ami_id),
            master_instance_type: changed_value(
                &self.master_instance_type,
                &metadata.master_instance_type,
            ),
            node_instance_type: changed_value(&self.node_instance_type, &metadata.node_instance_type),
            ..Default::default()
        };
        Ok(record_change(cluster, change))
    }
}

/// Worker capacity changes.
///
/// On kops clusters a new `node_min_count` is spread across node groups by
/// the rebalancer; `node_groups` restricts the resize to the named groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchClusterSizeRequest {
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub node_instance_type: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub node_min_count: Patch<i64>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub node_max_count: Patch<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_groups: Vec<String>,
}

impl ApplyPatch<Cluster> for PatchClusterSizeRequest {
    fn validate(&self) -> Result<()> {
        if let Patch::Present(t) = &self.node_instance_type {
            if t.trim().is_empty() {
                return Err(ModelError::validation("node_instance_type", "must not be empty"));
            }
        }
        if let Patch::Present(min) = self.node_min_count {
            if min < 1 {
                return Err(ModelError::validation("node_min_count", "must be at least 1"));
            }
        }
        if let Patch::Present(max) = self.node_max_count {
            if max < 1 {
                return Err(ModelError::validation("node_max_count", "must be at least 1"));
            }
        }
        if let (Patch::Present(min), Patch::Present(max)) =
            (self.node_min_count, self.node_max_count)
        {
            validate_node_counts(min, max)?;
        }
        for name in &self.node_groups {
            validate_node_group_name(name)?;
        }
        Ok(())
    }

    fn apply_fields(&self, cluster: &mut Cluster) -> Result<bool> {
        if cluster.provisioner == PROVISIONER_EXTERNAL {
            return Err(ModelError::validation(
                "provisioner",
                "external clusters cannot be resized",
            ));
        }
        let metadata = &cluster.provisioner_metadata;

        let effective_min = match self.node_min_count {
            Patch::Present(min) => min,
            Patch::Absent => metadata.node_min_count,
        };
        if let Patch::Present(max) = self.node_max_count {
            validate_node_counts(effective_min, max)?;
        }

        let mut change = ClusterChangeRequest {
            node_instance_type: changed_value(&self.node_instance_type, &metadata.node_instance_type),
            node_max_count: match self.node_max_count {
                Patch::Present(max) if max != metadata.node_max_count => Some(max),
                _ => None,
            },
            ..Default::default()
        };

        if let Patch::Present(min) = self.node_min_count {
            let groups_off_target = cluster.is_kops()
                && !metadata.node_groups.is_empty()
                && aggregate_min(&metadata.node_groups) != min;
            if min != metadata.node_min_count || groups_off_target {
                change.node_min_count = Some(min);
                if cluster.is_kops() {
                    change.node_groups = Some(self.resized_node_groups(metadata, min)?);
                }
            }
        }

        Ok(record_change(cluster, change))
    }
}

impl PatchClusterSizeRequest {
    /// Rebalances the targeted groups (all when none are named) toward the
    /// new aggregate and returns the full mapping.
    ///
    /// The current aggregate is always read from the groups themselves, so a
    /// stale `node_min_count` cannot skew the result.
    fn resized_node_groups(
        &self,
        metadata: &ProvisionerMetadata,
        requested_min: i64,
    ) -> Result<NodeGroups> {
        if self.node_groups.is_empty() {
            return rebalance_node_groups(
                aggregate_min(&metadata.node_groups),
                &metadata.node_groups,
                requested_min,
            );
        }

        let mut targeted = NodeGroups::new();
        for name in &self.node_groups {
            let group = metadata
                .node_groups
                .get(name)
                .ok_or_else(|| ModelError::UnknownNodeGroup {
                    node_group: name.clone(),
                })?;
            targeted.insert(name.clone(), group.clone());
        }
        // Untargeted groups keep their size, so the targeted ones absorb the
        // whole aggregate delta.
        let untargeted = aggregate_min(&metadata.node_groups) - aggregate_min(&targeted);
        let requested = requested_min - untargeted;

        let mut all = metadata.node_groups.clone();
        all.extend(rebalance_node_groups(aggregate_min(&targeted), &targeted, requested)?);
        Ok(all)
    }
}

/// Adds node groups to an existing cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNodeGroupsRequest {
    pub node_groups: NodeGroups,
}

impl CreateNodeGroupsRequest {
    pub fn validate(&self) -> Result<()> {
        if self.node_groups.is_empty() {
            return Err(ModelError::validation("node_groups", "at least one node group is required"));
        }
        for (name, group) in &self.node_groups {
            group.validate(name)?;
        }
        Ok(())
    }

    /// Records the creation as a change request; names must be new.
    pub fn apply_to(&self, cluster: &mut Cluster) -> Result<bool> {
        self.validate()?;
        if let Some(existing) = self
            .node_groups
            .keys()
            .find(|name| cluster.provisioner_metadata.node_groups.contains_key(*name))
        {
            return Err(ModelError::validation(
                "node_groups",
                format!("node group {} already exists", existing),
            ));
        }
        let change = ClusterChangeRequest {
            node_groups_to_create: self.node_groups.clone(),
            ..Default::default()
        };
        Ok(record_change(cluster, change))
    }
}

/// Records removal of one node group as a change request.
pub fn request_node_group_deletion(cluster: &mut Cluster, node_group: &str) -> Result<bool> {
    if !cluster.provisioner_metadata.node_groups.contains_key(node_group) {
        return Err(ModelError::UnknownNodeGroup {
            node_group: node_group.to_string(),
        });
    }
    let change = ClusterChangeRequest {
        node_groups_to_delete: vec![node_group.to_string()],
        ..Default::default()
    };
    Ok(record_change(cluster, change))
}

/// Merges `change` into the pending change request; returns whether the
/// pending request changed.
fn record_change(cluster: &mut Cluster, change: ClusterChangeRequest) -> bool {
    if change.is_empty() {
        return false;
    }
    let pending = &mut cluster.provisioner_metadata.change_request;
    let mut merged = pending.clone().unwrap_or_default();
    merged.merge(change);
    if pending.as_ref() == Some(&merged) {
        return false;
    }
    *pending = Some(merged);
    true
}

// =============================================================================
// Filters
// =============================================================================

/// Criteria for listing clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFilter {
    #[serde(flatten)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

impl ClusterFilter {
    pub fn matches(&self, cluster: &Cluster) -> bool {
        (self.paging.include_deleted || !cluster.is_deleted())
            && self.state.as_deref().map_or(true, |s| s == cluster.state)
            && self
                .provisioner
                .as_deref()
                .map_or(true, |p| p == cluster.provisioner)
            && self.annotations.iter().all(|a| cluster.annotations.contains(a))
    }
}

impl EncodesToQuery for ClusterFilter {
    fn append_query(&self, pairs: &mut QueryPairs) {
        self.paging.append_query(pairs);
        append_optional(pairs, "state", self.state.as_deref());
        append_optional(pairs, "provisioner", self.provisioner.as_deref());
        for annotation in &self.annotations {
            pairs.append_pair("annotation", annotation);
        }
    }
}
