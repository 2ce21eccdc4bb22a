//! Local state discovery: asks the configured backend what it actually
//! sees attached on this node, and turns that into the observed state
//! the convergence loop diffs against desired state and the control
//! service aggregates into cluster-wide nonmanifest tracking.

use std::collections::BTreeMap;

use crate::backend::{BackendError, VolumeBackend};
use crate::model::{Dataset, DatasetId, Manifestation, Node};

/// What the backend actually reports for this node, independent of what is
/// desired. `node` always reflects every volume the backend returned — a
/// volume no longer in `desired` still gets a (non-primary) manifestation
/// here, because the deployer can only detach/destroy something it can see
/// in observed state. `blockdevice_ids` carries the concrete id each dataset
/// maps to, since the backend addresses volumes by `blockdevice_id`, not
/// `dataset_id`. `nonmanifest` collects datasets this node's backend holds a
/// volume for but that have no desired manifestation anywhere in `desired`,
/// for the control service to fold into `ClusterState::nonmanifest_datasets`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Observation {
    pub node: Node,
    pub blockdevice_ids: BTreeMap<DatasetId, String>,
    pub nonmanifest: BTreeMap<DatasetId, Dataset>,
}

/// Builds the observed state for this agent by listing every volume the
/// backend knows about. A volume the backend reports but that isn't
/// attached here contributes a manifestation without a path — the deployer
/// treats that as "not yet mounted", never as an error. Volumes the backend
/// holds that are no longer desired are still reported, not dropped: the
/// "move" convergence path (old node detaches after the primary moves
/// elsewhere) only exists because this function admits observed state can
/// be a superset of desired state, not a subset.
pub async fn observe(
    backend: &dyn VolumeBackend,
    instance_id: &str,
    desired: &Node,
) -> Result<Observation, BackendError> {
    let volumes = backend.list_volumes().await?;
    let mut manifestations = BTreeMap::new();
    let mut paths = BTreeMap::new();
    let mut blockdevice_ids = BTreeMap::new();
    let mut nonmanifest = BTreeMap::new();

    for volume in volumes {
        blockdevice_ids.insert(volume.dataset_id, volume.blockdevice_id.clone());

        match desired.manifestations.get(&volume.dataset_id) {
            Some(existing) => {
                manifestations.insert(
                    volume.dataset_id,
                    Manifestation {
                        dataset: existing.dataset.clone(),
                        primary: existing.primary,
                    },
                );
            }
            None => {
                let dataset = Dataset::new(volume.dataset_id);
                nonmanifest.insert(volume.dataset_id, dataset.clone());
                manifestations.insert(volume.dataset_id, Manifestation { dataset, primary: false });
            }
        }

        if volume.attached_to.as_deref() == Some(instance_id) {
            if let Ok(path) = backend.get_device_path(&volume.blockdevice_id).await {
                paths.insert(volume.dataset_id, path);
            }
        }
    }

    Ok(Observation {
        node: Node {
            manifestations,
            paths,
            devices: BTreeMap::new(),
            applications: Default::default(),
        },
        blockdevice_ids,
        nonmanifest,
    })
}
