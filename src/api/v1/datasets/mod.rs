//! `/v1/configuration/datasets`: create, list, and update dataset
//! configuration entries.

pub mod create;
pub mod list;
pub mod update;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{DatasetId, NodeId};

/// The dataset configuration shape every route in this module serializes,
/// distinct from `crate::model::Dataset` in that it also carries the
/// primary node — useful to a REST client, meaningless inside `Configuration`
/// itself where the node is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetView {
    pub dataset_id: DatasetId,
    pub primary: NodeId,
    pub maximum_size: Option<u64>,
    pub metadata: BTreeMap<String, String>,
    pub deleted: bool,
}
