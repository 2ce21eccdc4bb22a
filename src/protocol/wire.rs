//! Wire messages exchanged between `flocker-agent` and `flocker-control`.
//!
//! `serde` + `bincode` over a `tokio_util::codec::LengthDelimitedCodec` —
//! the framed-RPC shape attested across the corpus manifests for exactly
//! this agent/control split.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ClusterState, Configuration, Dataset, DatasetId, Era, Node};

/// Sent by an agent. Every report is a full snapshot of the node's observed
/// state — there is no incremental diff protocol, matching spec.md's
/// at-least-once-within-a-connection, full-snapshot-on-reconnect rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentMessage {
    /// The agent's observed local state, sent on every convergence tick and
    /// immediately after (re)connecting. `nonmanifest` carries datasets this
    /// node's backend holds a volume for but that have no manifestation in
    /// this node's desired state, for the control service to fold into
    /// `ClusterState::nonmanifest_datasets`.
    NodeStateReport {
        era: Era,
        node: Node,
        #[serde(default)]
        nonmanifest: BTreeMap<DatasetId, Dataset>,
    },
    /// Test-only escape hatch for integration tests to force an agent's era
    /// without restarting its process.
    SetNodeEraForTesting { era: Era },
    NoOp,
}

/// Sent by the control service. `ClusterStatusUpdate` carries both the
/// desired `Configuration` and the aggregated observed `ClusterState`; the
/// agent computes its action plan from the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlMessage {
    ClusterStatusUpdate {
        configuration: Configuration,
        cluster_state: ClusterState,
    },
    NoOp,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::Error),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(message).map_err(WireError::Encode)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(WireError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn agent_message_round_trips() {
        let message = AgentMessage::NodeStateReport {
            era: Era::fresh(NodeId::new()),
            node: Node::default(),
            nonmanifest: BTreeMap::new(),
        };
        let bytes = encode(&message).unwrap();
        let decoded: AgentMessage = decode(&bytes).unwrap();
        match decoded {
            AgentMessage::NodeStateReport { era, .. } => {
                if let AgentMessage::NodeStateReport { era: original_era, .. } = message {
                    assert_eq!(era, original_era);
                }
            }
            _ => panic!("wrong variant decoded"),
        }
    }
}
