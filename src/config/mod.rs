//! Startup configuration for the four binaries.
//!
//! Grounded on the teacher's `ServerConfig::read`/`write`/`write_default`
//! pattern (read-or-create-default, serialize back out), generalized to
//! two config documents instead of one: the control service reads JSON,
//! the agent reads YAML (`agent.yml`), matching how each is actually shipped
//! and hand-edited by operators.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::FatalError;

/// `flocker-control`'s own startup configuration. Distinct from the
/// cluster-wide `Configuration` document in [`crate::model`], which this
/// process stores and serves but does not itself configure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Address the REST API binds to.
    pub rest_address: String,
    /// Port the REST API binds to.
    pub rest_port: u16,
    /// Address the control↔agent protocol listener binds to.
    pub control_address: String,
    /// Port the control↔agent protocol listener binds to.
    pub control_port: u16,
    /// Path to the persistent configuration store's JSON file.
    pub data_path: PathBuf,
    /// Directory holding the cluster CA and this service's own certificate/key.
    pub certificates_path: PathBuf,
    /// Seconds a node's last report may age before it's considered gone.
    pub node_grace_period_seconds: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rest_address: "0.0.0.0".to_string(),
            rest_port: 4523,
            control_address: "0.0.0.0".to_string(),
            control_port: 4524,
            data_path: PathBuf::from("/var/lib/flocker/current_configuration.v1.json"),
            certificates_path: PathBuf::from("/etc/flocker"),
            node_grace_period_seconds: 120,
        }
    }
}

impl ControlConfig {
    /// Reads configuration from `path`, creating a default file there if none
    /// exists yet. Mirrors the teacher's "read-or-seed" boot sequence.
    pub fn read(path: &Path) -> Result<Self, FatalError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                let config = Self::default();
                config.write(path)?;
                return Ok(config);
            }
        };

        serde_json::from_str(&content)
            .map_err(|e| FatalError::BadConfiguration(format!("{}: {e}", path.display())))
    }

    pub fn write(&self, path: &Path) -> Result<(), FatalError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FatalError::BadConfiguration(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| FatalError::BadConfiguration(format!("{}: {e}", path.display())))
    }
}

/// `flocker-agent`'s startup configuration, loaded from `agent.yml`. YAML
/// rather than JSON because this file is meant to be hand-edited by whoever
/// provisions the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hostname or address of the control service's protocol listener.
    pub control_service_address: String,
    pub control_service_port: u16,
    /// Which backend to construct; looked up in the backend registry.
    pub backend: String,
    /// Backend-specific settings, passed through opaquely.
    #[serde(default)]
    pub backend_options: serde_yaml::Value,
    pub certificates_path: PathBuf,
    /// How often to run the convergence loop in the steady state.
    #[serde(default = "default_poll_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_poll_seconds() -> u64 {
    30
}

impl AgentConfig {
    pub fn read(path: &Path) -> Result<Self, FatalError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FatalError::BadConfiguration(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|e| FatalError::BadConfiguration(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.json");
        let read_back = ControlConfig::read(&path).unwrap();
        assert_eq!(read_back.rest_port, 4523);
        let reloaded = ControlConfig::read(&path).unwrap();
        assert_eq!(reloaded.control_port, read_back.control_port);
    }

    #[test]
    fn agent_config_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yml");
        assert!(AgentConfig::read(&path).is_err());
    }
}
