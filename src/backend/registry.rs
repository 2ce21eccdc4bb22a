//! Explicit enumerated backend registry.
//!
//! Per the "no duck typing" redesign flag: the agent picks a backend by a
//! string name read from `agent.yml`, matched against a fixed list of known
//! backends here, rather than probing trait objects for optional
//! capabilities at call sites.

use std::sync::Arc;

use serde_yaml::Value;
use thiserror::Error;
use uuid::Uuid;

use super::memory::MemoryBackend;
use super::VolumeBackend;

#[derive(Debug, Error)]
pub enum BackendRegistryError {
    #[error("unknown backend {0:?}; known backends: {1:?}")]
    Unknown(String, &'static [&'static str]),
}

const KNOWN_BACKENDS: &[&str] = &["memory"];

/// Builds a `VolumeBackend` for `name`, with `options` passed through
/// opaquely from `agent.yml`'s `backend_options` map. Adding a backend means
/// adding a match arm here, not registering a trait-object factory at
/// runtime — the set of backends this agent can run is fixed at compile
/// time.
pub fn build(
    name: &str,
    options: &Value,
    cluster_id: Uuid,
    instance_id: String,
) -> Result<Arc<dyn VolumeBackend>, BackendRegistryError> {
    match name {
        "memory" => {
            let _ = options;
            Ok(Arc::new(MemoryBackend::new(cluster_id, instance_id)))
        }
        other => Err(BackendRegistryError::Unknown(other.to_string(), KNOWN_BACKENDS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_name_is_rejected() {
        let err = build("zfs", &Value::Null, Uuid::new_v4(), "i-1".into()).unwrap_err();
        assert!(matches!(err, BackendRegistryError::Unknown(_, _)));
    }

    #[test]
    fn memory_backend_builds() {
        build("memory", &Value::Null, Uuid::new_v4(), "i-1".into()).unwrap();
    }
}
