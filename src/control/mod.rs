//! Control Service: the node table and report aggregation half of the
//! control plane.
//!
//! Grounded in the teacher's `cluster::ClusterManager`
//! (`register_node`/`remove_node`/`get_nodes` over an
//! `Arc<RwLock<HashMap<..>>>`), generalized to track each connected agent's
//! last report plus a last-seen timestamp for grace-interval eviction.
//! Leader election has no counterpart here — a single control-service
//! process owns this table directly.

pub mod broadcast;
pub mod listener;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::model::{ClusterState, Dataset, DatasetId, Era, Node, NodeId};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

struct NodeEntry {
    era: Era,
    last_report: Node,
    last_nonmanifest: BTreeMap<DatasetId, Dataset>,
    last_seen: Instant,
}

/// Tracks every agent that has ever reported in this process's lifetime,
/// evicting ones that have gone quiet for longer than the grace period.
/// Rebuilt from nothing on every control-service restart — never persisted,
/// matching `ClusterState`'s own "observed, not durable" nature.
pub struct ControlService {
    grace_period: Duration,
    nodes: RwLock<BTreeMap<NodeId, NodeEntry>>,
}

impl ControlService {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            grace_period,
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Records a fresh report from `node_id`. A report with a new `era`
    /// replaces whatever entry existed for the same `node_id` outright — the
    /// agent restarted, so any prior observed state for it is stale.
    pub fn record_report(&self, node_id: NodeId, era: Era, node: Node, nonmanifest: BTreeMap<DatasetId, Dataset>) {
        self.nodes.write().insert(
            node_id,
            NodeEntry {
                era,
                last_report: node,
                last_nonmanifest: nonmanifest,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn remove_node(&self, node_id: &NodeId) {
        self.nodes.write().remove(node_id);
    }

    /// Drops any node whose last report is older than the grace period,
    /// returning the ids evicted so callers can log them.
    pub fn evict_stale(&self) -> Vec<NodeId> {
        let mut nodes = self.nodes.write();
        let now = Instant::now();
        let stale: Vec<NodeId> = nodes
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > self.grace_period)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            nodes.remove(id);
        }
        stale
    }

    pub fn era_of(&self, node_id: &NodeId) -> Option<Era> {
        self.nodes.read().get(node_id).map(|e| e.era)
    }

    /// Test-only escape hatch mirroring `AgentMessage::SetNodeEraForTesting`:
    /// updates a node's era without touching its last reported state.
    pub fn set_era_for_testing(&self, node_id: NodeId, era: Era) {
        let mut nodes = self.nodes.write();
        nodes
            .entry(node_id)
            .and_modify(|entry| entry.era = era)
            .or_insert_with(|| NodeEntry {
                era,
                last_report: Node::default(),
                last_nonmanifest: BTreeMap::new(),
                last_seen: Instant::now(),
            });
    }

    /// Finds which node, if any, is currently reporting under `era_uuid`.
    /// Used post-reboot by the Docker plugin adapter: a container started
    /// before a node reboot carries the pre-reboot era, and the adapter uses
    /// this to detect that the agent underneath it has restarted.
    pub fn node_for_era(&self, era_uuid: uuid::Uuid) -> Option<NodeId> {
        self.nodes
            .read()
            .iter()
            .find(|(_, entry)| entry.era.era_uuid == era_uuid)
            .map(|(id, _)| *id)
    }

    /// Builds a `ClusterState` snapshot from every currently-tracked node's
    /// most recent report. `nonmanifest_datasets` folds together every
    /// node's reported nonmanifest set; a dataset reported nonmanifest by
    /// more than one node at once is a transient condition (mid-move), not
    /// an error, so later nodes in iteration order simply overwrite earlier
    /// ones.
    pub fn cluster_state(&self) -> ClusterState {
        let nodes = self.nodes.read();
        let mut nonmanifest_datasets = BTreeMap::new();
        for entry in nodes.values() {
            nonmanifest_datasets.extend(entry.last_nonmanifest.clone());
        }
        ClusterState {
            nodes: nodes
                .iter()
                .map(|(id, entry)| (*id, entry.last_report.clone()))
                .collect(),
            nonmanifest_datasets,
        }
    }
}

impl Default for ControlService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_nodes_are_evicted_after_grace_period() {
        let service = ControlService::with_grace_period(Duration::from_millis(10));
        let node_id = NodeId::new();
        service.record_report(node_id, Era::fresh(node_id), Node::default(), BTreeMap::new());
        assert!(service.evict_stale().is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(service.evict_stale(), vec![node_id]);
    }

    #[test]
    fn cluster_state_folds_in_reported_nonmanifest_datasets() {
        let service = ControlService::new();
        let node_id = NodeId::new();
        let dataset = Dataset::new(DatasetId::new());
        let mut nonmanifest = BTreeMap::new();
        nonmanifest.insert(dataset.dataset_id, dataset.clone());

        service.record_report(node_id, Era::fresh(node_id), Node::default(), nonmanifest);

        let cluster_state = service.cluster_state();
        assert_eq!(cluster_state.nonmanifest_datasets.get(&dataset.dataset_id), Some(&dataset));
    }

    #[test]
    fn fresh_era_replaces_prior_report() {
        let service = ControlService::new();
        let node_id = NodeId::new();
        let first_era = Era::fresh(node_id);
        service.record_report(node_id, first_era, Node::default(), BTreeMap::new());
        let second_era = Era::fresh(node_id);
        service.record_report(node_id, second_era, Node::default(), BTreeMap::new());
        assert_eq!(service.era_of(&node_id), Some(second_era));
    }
}
