//! Backend Interface: the pluggable block-storage operations a convergence
//! action ultimately calls. Grounded in the teacher's `network::client`
//! async facade, generalized to `#[async_trait]` over a storage API instead
//! of a simulated cluster RPC.

pub mod error;
pub mod memory;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::DatasetId;
pub use error::BackendError;

/// A concrete block device, as reported by a backend. Identity is
/// `blockdevice_id`; `attached_to` names the compute instance (if any) it is
/// currently attached to, using whatever instance-id form the backend's
/// cloud uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceVolume {
    pub blockdevice_id: String,
    pub size: u64,
    pub dataset_id: DatasetId,
    pub attached_to: Option<String>,
}

/// Optional creation parameters a backend may honor. Kept separate from
/// `create_volume`'s required arguments so a backend that ignores profiles
/// entirely doesn't need a parameter it can't act on.
#[derive(Debug, Clone, Default)]
pub struct VolumeProfile {
    pub name: String,
}

/// Pluggable storage operations the convergence loop drives. Every method
/// takes and returns plain values — no backend-specific state leaks past
/// this trait, so `src/agent/plan.rs` never needs to know which backend is
/// configured.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// The backend's block size; volume sizes must be rounded up to a
    /// multiple of this.
    fn allocation_unit(&self) -> u64;

    /// Opaque identifier for the node this backend instance is running on,
    /// in whatever form `attached_to` uses.
    async fn compute_instance_id(&self) -> Result<String, BackendError>;

    async fn create_volume(
        &self,
        dataset_id: DatasetId,
        size: u64,
    ) -> Result<BlockDeviceVolume, BackendError>;

    /// Default-provided: backends that support profiles override this
    /// instead of `create_volume` advertising a capability flag the engine
    /// would otherwise have to probe for.
    async fn create_volume_with_profile(
        &self,
        _dataset_id: DatasetId,
        _size: u64,
        _profile: VolumeProfile,
    ) -> Result<BlockDeviceVolume, BackendError> {
        Err(BackendError::ProfilesUnsupported)
    }

    /// Addressed by `blockdevice_id`, not `dataset_id`: a dataset can have no
    /// volume, or a volume left over from a crashed create, so the caller
    /// must already hold the concrete id from `create_volume`/`list_volumes`
    /// rather than ask the backend to re-derive it.
    async fn destroy_volume(&self, blockdevice_id: &str) -> Result<(), BackendError>;

    async fn attach_volume(
        &self,
        blockdevice_id: &str,
        instance_id: &str,
    ) -> Result<BlockDeviceVolume, BackendError>;

    async fn detach_volume(&self, blockdevice_id: &str) -> Result<(), BackendError>;

    async fn list_volumes(&self) -> Result<Vec<BlockDeviceVolume>, BackendError>;

    /// The local device path a just-attached volume landed at, derived by
    /// diffing the device set before and after attach (spec's "exactly one
    /// new device" rule); re-derived every convergence tick rather than
    /// cached, since device names are not guaranteed stable across reboots.
    /// Re-derivable from `blockdevice_id` alone, so a restarted agent can
    /// recover the path without consulting any local state.
    async fn get_device_path(&self, blockdevice_id: &str) -> Result<std::path::PathBuf, BackendError>;
}
