//! Backend error taxonomy.
//!
//! Shaped after `db_manager::error::DatabaseError`: named variants for every
//! condition a caller might want to branch on, one `Transient`/`Permanent`
//! pair as the escape hatch for whatever a concrete backend's underlying API
//! throws that doesn't map to a named case.

use thiserror::Error;

use crate::model::DatasetId;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no such volume {0}")]
    UnknownVolume(String),

    #[error("volume {0} is in use and cannot be destroyed")]
    VolumeInUse(String),

    #[error("volume {0} is already attached to {1}")]
    AlreadyAttached(String, String),

    #[error("volume {0} is not attached to this node")]
    UnattachedVolume(String),

    #[error("backend does not support storage profiles")]
    ProfilesUnsupported,

    #[error("operation on dataset {0} timed out")]
    Timeout(DatasetId),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("permanent backend error: {0}")]
    Permanent(String),
}

impl BackendError {
    /// Whether the convergence loop should retry this action on its next
    /// tick (spec: "partial failure is never fatal"). Permanent errors still
    /// get retried on subsequent ticks in case the world changes underneath
    /// them, but callers may use this to decide whether to log at a louder
    /// level.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Timeout(_))
    }
}
