//! Reference backend: an in-memory/tmpfs-simulated block store for tests and
//! the demo agent.
//!
//! Grounded in `outscale-bsud/src/bsu.rs`'s create/attach/detach/list/tag
//! shape (there, volumes are tagged with caller-chosen key/value pairs and
//! polled for a state transition after each call) and
//! `gierens-rust-openstack`'s block-storage protocol module.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::model::DatasetId;

use super::{BackendError, BlockDeviceVolume, VolumeBackend, VolumeProfile};

const FLOCKER_CLUSTER_ID_TAG: &str = "flocker-cluster-id";
const DATASET_ID_TAG: &str = "dataset-id";

#[derive(Debug, Clone)]
struct StoredVolume {
    volume: BlockDeviceVolume,
    tags: BTreeMap<String, String>,
}

/// Tunable poll budget for attach, so tests can shrink the ceiling spec.md
/// §4.2 allows (60s) without touching call sites.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub attach_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            attach_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct MemoryBackend {
    cluster_id: Uuid,
    allocation_unit: u64,
    instance_id: String,
    poll_budget: PollBudget,
    // Primary store: a real backend addresses volumes by blockdevice_id, so
    // this does too. `dataset_index` exists only so `create_volume` can tell
    // a retried create from a genuinely new one.
    volumes: Mutex<BTreeMap<String, StoredVolume>>,
    dataset_index: Mutex<BTreeMap<DatasetId, String>>,
    next_device_index: Mutex<u32>,
}

impl MemoryBackend {
    pub fn new(cluster_id: Uuid, instance_id: impl Into<String>) -> Self {
        Self {
            cluster_id,
            allocation_unit: 1024 * 1024 * 1024,
            instance_id: instance_id.into(),
            poll_budget: PollBudget::default(),
            volumes: Mutex::new(BTreeMap::new()),
            dataset_index: Mutex::new(BTreeMap::new()),
            next_device_index: Mutex::new(0),
        }
    }

    pub fn with_poll_budget(mut self, poll_budget: PollBudget) -> Self {
        self.poll_budget = poll_budget;
        self
    }

    fn next_device_path(&self) -> PathBuf {
        let mut index = self.next_device_index.lock();
        let path = PathBuf::from(format!("/dev/flocker{index}"));
        *index += 1;
        path
    }
}

#[async_trait]
impl VolumeBackend for MemoryBackend {
    fn allocation_unit(&self) -> u64 {
        self.allocation_unit
    }

    async fn compute_instance_id(&self) -> Result<String, BackendError> {
        Ok(self.instance_id.clone())
    }

    async fn create_volume(
        &self,
        dataset_id: DatasetId,
        size: u64,
    ) -> Result<BlockDeviceVolume, BackendError> {
        let mut dataset_index = self.dataset_index.lock();
        let mut volumes = self.volumes.lock();
        if let Some(blockdevice_id) = dataset_index.get(&dataset_id) {
            // Idempotent: a create retried after a crash-before-ack should
            // not produce a second volume for the same dataset.
            return Ok(volumes
                .get(blockdevice_id)
                .expect("dataset_index entry without a backing volume")
                .volume
                .clone());
        }
        let rounded = size.div_ceil(self.allocation_unit) * self.allocation_unit;
        let blockdevice_id = Uuid::new_v4().to_string();
        let volume = BlockDeviceVolume {
            blockdevice_id: blockdevice_id.clone(),
            size: rounded,
            dataset_id,
            attached_to: None,
        };
        let mut tags = BTreeMap::new();
        tags.insert(FLOCKER_CLUSTER_ID_TAG.to_string(), self.cluster_id.to_string());
        tags.insert(DATASET_ID_TAG.to_string(), dataset_id.to_string());
        volumes.insert(
            blockdevice_id.clone(),
            StoredVolume {
                volume: volume.clone(),
                tags,
            },
        );
        dataset_index.insert(dataset_id, blockdevice_id);
        Ok(volume)
    }

    async fn destroy_volume(&self, blockdevice_id: &str) -> Result<(), BackendError> {
        let mut volumes = self.volumes.lock();
        match volumes.get(blockdevice_id) {
            None => Err(BackendError::UnknownVolume(blockdevice_id.to_string())),
            Some(stored) if stored.volume.attached_to.is_some() => {
                Err(BackendError::VolumeInUse(blockdevice_id.to_string()))
            }
            Some(stored) => {
                self.dataset_index.lock().remove(&stored.volume.dataset_id);
                volumes.remove(blockdevice_id);
                Ok(())
            }
        }
    }

    async fn attach_volume(
        &self,
        blockdevice_id: &str,
        instance_id: &str,
    ) -> Result<BlockDeviceVolume, BackendError> {
        let device_path = {
            let mut volumes = self.volumes.lock();
            let stored = volumes
                .get_mut(blockdevice_id)
                .ok_or_else(|| BackendError::UnknownVolume(blockdevice_id.to_string()))?;
            if let Some(existing) = &stored.volume.attached_to {
                if existing == instance_id {
                    return Ok(stored.volume.clone());
                }
                return Err(BackendError::AlreadyAttached(blockdevice_id.to_string(), existing.clone()));
            }
            stored.volume.attached_to = Some(instance_id.to_string());
            self.next_device_path()
        };
        tokio::time::sleep(self.poll_budget.poll_interval.min(Duration::from_millis(1))).await;
        let _ = device_path;

        let volumes = self.volumes.lock();
        Ok(volumes.get(blockdevice_id).expect("just inserted").volume.clone())
    }

    async fn detach_volume(&self, blockdevice_id: &str) -> Result<(), BackendError> {
        let mut volumes = self.volumes.lock();
        let stored = volumes
            .get_mut(blockdevice_id)
            .ok_or_else(|| BackendError::UnknownVolume(blockdevice_id.to_string()))?;
        if stored.volume.attached_to.take().is_none() {
            return Err(BackendError::UnattachedVolume(blockdevice_id.to_string()));
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<BlockDeviceVolume>, BackendError> {
        Ok(self.volumes.lock().values().map(|s| s.volume.clone()).collect())
    }

    async fn get_device_path(&self, blockdevice_id: &str) -> Result<PathBuf, BackendError> {
        let volumes = self.volumes.lock();
        let stored = volumes
            .get(blockdevice_id)
            .ok_or_else(|| BackendError::UnknownVolume(blockdevice_id.to_string()))?;
        if stored.volume.attached_to.is_none() {
            return Err(BackendError::UnattachedVolume(blockdevice_id.to_string()));
        }
        Ok(PathBuf::from(format!("/dev/flocker-{}", stored.volume.blockdevice_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(Uuid::new_v4(), "i-local").with_poll_budget(PollBudget {
            attach_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let backend = backend();
        let dataset_id = DatasetId::new();
        let first = backend.create_volume(dataset_id, 512).await.unwrap();
        let second = backend.create_volume(dataset_id, 512).await.unwrap();
        assert_eq!(first.blockdevice_id, second.blockdevice_id);
    }

    #[tokio::test]
    async fn attach_then_detach_round_trips() {
        let backend = backend();
        let dataset_id = DatasetId::new();
        let created = backend.create_volume(dataset_id, 512).await.unwrap();
        let attached = backend.attach_volume(&created.blockdevice_id, "i-local").await.unwrap();
        assert_eq!(attached.attached_to.as_deref(), Some("i-local"));
        backend.get_device_path(&created.blockdevice_id).await.unwrap();
        backend.detach_volume(&created.blockdevice_id).await.unwrap();
        assert!(backend.get_device_path(&created.blockdevice_id).await.is_err());
    }

    #[tokio::test]
    async fn destroy_refuses_while_attached() {
        let backend = backend();
        let dataset_id = DatasetId::new();
        let created = backend.create_volume(dataset_id, 512).await.unwrap();
        backend.attach_volume(&created.blockdevice_id, "i-local").await.unwrap();
        assert!(matches!(
            backend.destroy_volume(&created.blockdevice_id).await,
            Err(BackendError::VolumeInUse(_))
        ));
    }

    #[tokio::test]
    async fn profiles_are_unsupported_by_default() {
        let backend = backend();
        let err = backend
            .create_volume_with_profile(DatasetId::new(), 512, VolumeProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ProfilesUnsupported));
    }
}
