//! Immutable value types shared by the control service and every agent.
//!
//! Mirrors the "flat value types + lookup maps" redesign flag: entities never
//! hold back-references to each other, only opaque ids that index into a map
//! owned by whoever needs the lookup (`Configuration::nodes`,
//! `ClusterState::nodes`, ...).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a dataset across the whole cluster, forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one agent installation. Generated once and persisted locally
/// by the agent; never regenerated across restarts of the same installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fresh value minted on every agent process start. Distinct from
/// `NodeId`: the node is the same installation across reboots, the era is
/// not. Used by external observers (the Docker plugin adapter) to detect
/// that an agent has restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Era {
    pub node_uuid: NodeId,
    pub era_uuid: Uuid,
}

impl Era {
    pub fn fresh(node_uuid: NodeId) -> Self {
        Self {
            node_uuid,
            era_uuid: Uuid::new_v4(),
        }
    }
}

/// Opaque, strictly-increasing revision marker for a `Configuration`.
///
/// Backed by a counter rather than a hash so `set_if_matches` can reject a
/// stale writer with a simple equality check, but the `Display`/`Serialize`
/// forms are treated as opaque strings by every caller outside `store.rs` —
/// no caller should parse or arithmetic-compare a `ConfigTag` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigTag(pub(crate) u64);

impl ConfigTag {
    pub const INITIAL: ConfigTag = ConfigTag(0);

    pub fn next(self) -> ConfigTag {
        ConfigTag(self.0 + 1)
    }
}

impl fmt::Display for ConfigTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag-{:016x}", self.0)
    }
}

/// A logical persistent storage unit. Identity is `dataset_id`; everything
/// else is replaceable by creating a new `Dataset` value under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: DatasetId,
    pub maximum_size: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Dataset {
    pub fn new(dataset_id: DatasetId) -> Self {
        Self {
            dataset_id,
            maximum_size: None,
            metadata: BTreeMap::new(),
            deleted: false,
        }
    }

    /// The conventional `name` metadata key, if present.
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").map(String::as_str)
    }
}

/// A dataset's presence on a particular node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifestation {
    pub dataset: Dataset,
    pub primary: bool,
}

/// A node's view of the world: either the desired view held in a
/// `Configuration`, or the observed view reported over the agent protocol
/// and aggregated into a `ClusterState`. The type is shared because the
/// shape is identical; which one a given value represents is determined by
/// where it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub manifestations: BTreeMap<DatasetId, Manifestation>,
    #[serde(default)]
    pub paths: BTreeMap<DatasetId, PathBuf>,
    #[serde(default)]
    pub devices: BTreeMap<DatasetId, PathBuf>,
    #[serde(default)]
    pub applications: BTreeSet<String>,
}

impl Node {
    pub fn primary_datasets(&self) -> impl Iterator<Item = &Manifestation> {
        self.manifestations.values().filter(|m| m.primary)
    }
}

/// A time-bounded promise that a dataset will not be moved off, or deleted
/// from, the node named in the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub dataset_id: DatasetId,
    pub node_uuid: NodeId,
    pub expiration: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => now >= expiration,
            None => false,
        }
    }

    /// Whether this lease currently blocks moving or deleting its dataset
    /// away from `node`.
    pub fn blocks(&self, dataset_id: DatasetId, node: NodeId, now: DateTime<Utc>) -> bool {
        self.dataset_id == dataset_id && self.node_uuid == node && !self.is_expired(now)
    }
}

/// Errors raised while mutating a `Configuration` in a way that would
/// violate one of the invariants in spec §3.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("dataset {0} already has a primary manifestation on node {1}")]
    AlreadyPrimaryElsewhere(DatasetId, NodeId),
    #[error("dataset {0} is leased to node {1} until it expires")]
    LeaseViolation(DatasetId, NodeId),
    #[error("dataset {0} is marked deleted but still has manifestations")]
    DeletedWithManifestations(DatasetId),
    #[error("dataset name {0:?} is already in use")]
    DuplicateName(String),
}

/// The desired state of the whole cluster: every node's desired
/// manifestations plus the active lease set. This is the document persisted
/// by the Configuration Store (`store.rs`) and broadcast to every agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub version: u32,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default)]
    pub leases: BTreeMap<DatasetId, Lease>,
    pub tag: ConfigTag,
}

impl Configuration {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn empty() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            nodes: BTreeMap::new(),
            leases: BTreeMap::new(),
            tag: ConfigTag::INITIAL,
        }
    }

    /// Locates the node currently holding the primary manifestation for
    /// `dataset_id`, if any.
    pub fn primary_node_of(&self, dataset_id: DatasetId) -> Option<NodeId> {
        self.nodes.iter().find_map(|(node_id, node)| {
            node.manifestations
                .get(&dataset_id)
                .filter(|m| m.primary)
                .map(|_| *node_id)
        })
    }

    pub fn dataset_by_name(&self, name: &str) -> Option<&Dataset> {
        self.nodes
            .values()
            .flat_map(|n| n.manifestations.values())
            .map(|m| &m.dataset)
            .find(|d| d.name() == Some(name))
    }

    pub fn lease_for(&self, dataset_id: DatasetId) -> Option<&Lease> {
        self.leases.get(&dataset_id)
    }

    /// Creates a new dataset with its primary manifestation on `node`,
    /// bumping the tag. Enforces invariant 1 (at most one primary) and, if
    /// `name` is already taken, invariant-adjacent uniqueness (see
    /// SPEC_FULL §4.7 — the REST layer, not the source, is the place this
    /// spec chose to enforce name uniqueness).
    pub fn create_dataset(
        &mut self,
        node: NodeId,
        dataset: Dataset,
    ) -> Result<(), ConfigurationError> {
        if let Some(name) = dataset.name() {
            if self.dataset_by_name(name).is_some() {
                return Err(ConfigurationError::DuplicateName(name.to_string()));
            }
        }
        if let Some(existing) = self.primary_node_of(dataset.dataset_id) {
            return Err(ConfigurationError::AlreadyPrimaryElsewhere(
                dataset.dataset_id,
                existing,
            ));
        }
        let entry = self.nodes.entry(node).or_default();
        entry.manifestations.insert(
            dataset.dataset_id,
            Manifestation {
                dataset,
                primary: true,
            },
        );
        self.tag = self.tag.next();
        Ok(())
    }

    /// Moves a dataset's primary manifestation to `new_node`, subject to
    /// invariant 4 (an unexpired lease pins the dataset to its current
    /// node).
    pub fn move_primary(
        &mut self,
        dataset_id: DatasetId,
        new_node: NodeId,
        now: DateTime<Utc>,
    ) -> Result<(), ConfigurationError> {
        let current = self.primary_node_of(dataset_id);
        if let Some(lease) = self.lease_for(dataset_id) {
            if let Some(current) = current {
                if lease.blocks(dataset_id, current, now) && current != new_node {
                    return Err(ConfigurationError::LeaseViolation(dataset_id, current));
                }
            }
        }
        let Some(current) = current else {
            return Ok(());
        };
        if current == new_node {
            return Ok(());
        }
        let manifestation = self
            .nodes
            .get_mut(&current)
            .and_then(|n| n.manifestations.remove(&dataset_id))
            .expect("primary_node_of found a manifestation that vanished");
        self.nodes
            .entry(new_node)
            .or_default()
            .manifestations
            .insert(dataset_id, manifestation);
        self.tag = self.tag.next();
        Ok(())
    }

    /// Applies a metadata/maximum_size update to an existing dataset
    /// in-place, bumping the tag.
    pub fn update_dataset(
        &mut self,
        dataset_id: DatasetId,
        f: impl FnOnce(&mut Dataset),
    ) -> Option<()> {
        let node = self.primary_node_of(dataset_id)?;
        let manifestation = self.nodes.get_mut(&node)?.manifestations.get_mut(&dataset_id)?;
        f(&mut manifestation.dataset);
        self.tag = self.tag.next();
        Some(())
    }

    /// Marks a dataset deleted, subject to the lease invariant. Actual
    /// removal of the manifestation happens once the agent has converged
    /// (observed-absent on every node) — see `ClusterState`.
    pub fn mark_deleted(
        &mut self,
        dataset_id: DatasetId,
        now: DateTime<Utc>,
    ) -> Result<(), ConfigurationError> {
        if let Some(lease) = self.lease_for(dataset_id) {
            if let Some(node) = self.primary_node_of(dataset_id) {
                if lease.blocks(dataset_id, node, now) {
                    return Err(ConfigurationError::LeaseViolation(dataset_id, node));
                }
            }
        }
        for node in self.nodes.values_mut() {
            if let Some(m) = node.manifestations.get_mut(&dataset_id) {
                m.dataset.deleted = true;
            }
        }
        self.tag = self.tag.next();
        Ok(())
    }

    pub fn acquire_lease(&mut self, lease: Lease) {
        self.leases.insert(lease.dataset_id, lease);
        self.tag = self.tag.next();
    }

    pub fn release_lease(&mut self, dataset_id: DatasetId) {
        self.leases.remove(&dataset_id);
        self.tag = self.tag.next();
    }

    /// All desired manifestations, across every node, for the given node —
    /// used by the convergence loop.
    pub fn desired_for(&self, node: NodeId) -> Node {
        self.nodes.get(&node).cloned().unwrap_or_default()
    }
}

/// The union of the most recent reports from all connected agents. Rebuilt
/// from scratch on every control-service boot; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    pub nodes: BTreeMap<NodeId, Node>,
    pub nonmanifest_datasets: BTreeMap<DatasetId, Dataset>,
}

impl ClusterState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replaces the observed state for one node with a freshly received
    /// snapshot. Reports are whole-state; there is no incremental merge.
    pub fn replace_node(&mut self, node_id: NodeId, node: Node) {
        self.nodes.insert(node_id, node);
    }

    pub fn remove_node(&mut self, node_id: &NodeId) {
        self.nodes.remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset_named(name: &str) -> Dataset {
        let mut dataset = Dataset::new(DatasetId::new());
        dataset.metadata.insert("name".to_string(), name.to_string());
        dataset
    }

    #[test]
    fn create_dataset_bumps_tag_and_sets_primary() {
        let mut config = Configuration::empty();
        let node = NodeId::new();
        let dataset = dataset_named("db");
        let dataset_id = dataset.dataset_id;

        config.create_dataset(node, dataset).unwrap();

        assert_eq!(config.tag, ConfigTag::INITIAL.next());
        assert_eq!(config.primary_node_of(dataset_id), Some(node));
    }

    #[test]
    fn create_dataset_rejects_duplicate_name() {
        let mut config = Configuration::empty();
        let node = NodeId::new();
        config.create_dataset(node, dataset_named("db")).unwrap();

        let err = config.create_dataset(node, dataset_named("db")).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateName("db".to_string()));
    }

    #[test]
    fn create_dataset_rejects_existing_primary_elsewhere() {
        let mut config = Configuration::empty();
        let node_a = NodeId::new();
        let node_b = NodeId::new();
        let dataset = dataset_named("db");
        let dataset_id = dataset.dataset_id;
        config.create_dataset(node_a, dataset.clone()).unwrap();

        let err = config.create_dataset(node_b, dataset).unwrap_err();
        assert_eq!(err, ConfigurationError::AlreadyPrimaryElsewhere(dataset_id, node_a));
    }

    #[test]
    fn move_primary_relocates_manifestation() {
        let mut config = Configuration::empty();
        let node_a = NodeId::new();
        let node_b = NodeId::new();
        let dataset = dataset_named("db");
        let dataset_id = dataset.dataset_id;
        config.create_dataset(node_a, dataset).unwrap();

        config.move_primary(dataset_id, node_b, Utc::now()).unwrap();

        assert_eq!(config.primary_node_of(dataset_id), Some(node_b));
        assert!(!config.nodes[&node_a].manifestations.contains_key(&dataset_id));
    }

    #[test]
    fn move_primary_blocked_by_unexpired_lease() {
        let mut config = Configuration::empty();
        let node_a = NodeId::new();
        let node_b = NodeId::new();
        let dataset = dataset_named("db");
        let dataset_id = dataset.dataset_id;
        config.create_dataset(node_a, dataset).unwrap();
        config.acquire_lease(Lease {
            dataset_id,
            node_uuid: node_a,
            expiration: None,
        });

        let err = config.move_primary(dataset_id, node_b, Utc::now()).unwrap_err();
        assert_eq!(err, ConfigurationError::LeaseViolation(dataset_id, node_a));
        assert_eq!(config.primary_node_of(dataset_id), Some(node_a));
    }

    #[test]
    fn move_primary_allowed_once_lease_expires() {
        let mut config = Configuration::empty();
        let node_a = NodeId::new();
        let node_b = NodeId::new();
        let dataset = dataset_named("db");
        let dataset_id = dataset.dataset_id;
        config.create_dataset(node_a, dataset).unwrap();
        let now = Utc::now();
        config.acquire_lease(Lease {
            dataset_id,
            node_uuid: node_a,
            expiration: Some(now - chrono::Duration::seconds(1)),
        });

        config.move_primary(dataset_id, node_b, now).unwrap();
        assert_eq!(config.primary_node_of(dataset_id), Some(node_b));
    }

    #[test]
    fn mark_deleted_blocked_by_lease_then_succeeds_after_release() {
        let mut config = Configuration::empty();
        let node = NodeId::new();
        let dataset = dataset_named("db");
        let dataset_id = dataset.dataset_id;
        config.create_dataset(node, dataset).unwrap();
        config.acquire_lease(Lease {
            dataset_id,
            node_uuid: node,
            expiration: None,
        });

        assert!(config.mark_deleted(dataset_id, Utc::now()).is_err());

        config.release_lease(dataset_id);
        config.mark_deleted(dataset_id, Utc::now()).unwrap();
        assert!(config.nodes[&node].manifestations[&dataset_id].dataset.deleted);
    }

    #[test]
    fn config_tag_renders_as_opaque_hex_string() {
        assert_eq!(ConfigTag::INITIAL.to_string(), "tag-0000000000000000");
        assert_eq!(ConfigTag::INITIAL.next().to_string(), "tag-0000000000000001");
    }

    #[test]
    fn desired_for_unknown_node_is_empty() {
        let config = Configuration::empty();
        assert_eq!(config.desired_for(NodeId::new()), Node::default());
    }
}
