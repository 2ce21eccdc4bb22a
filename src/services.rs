//! `Services`: the shared handle threaded through call sites instead of
//! reaching for a `lazy_static!` global.
//!
//! The teacher's `SERVER_CONFIG`/`CLUSTER_MANAGER`-style globals are the
//! pattern this corrects: `Services` is built once in each binary's `main`
//! and passed down explicitly (to `build_rocket`, to the convergence loop,
//! to the protocol listener), the way the teacher already passes
//! `Arc<DatabaseManager>`/`Arc<ClusterManager>` into `launch_server`.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::backend::VolumeBackend;
use crate::config::ControlConfig;
use crate::control::ControlService;
use crate::store::ConfigurationStore;

/// Everything a control-service request handler or background task needs.
/// Cloning is cheap (every field is an `Arc`), so handlers hold an owned
/// `Services` rather than a borrow with a lifetime that would fight Rocket's
/// request-scoped futures.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ControlConfig>,
    pub store: Arc<ConfigurationStore>,
    pub control: Arc<ControlService>,
    /// Wakes `control::broadcast::run` after a REST write changes the
    /// `Configuration`, so connected agents see it without waiting for their
    /// own next poll.
    pub broadcast: Arc<Notify>,
}

impl Services {
    pub fn new(
        config: ControlConfig,
        store: ConfigurationStore,
        control: ControlService,
        broadcast: Arc<Notify>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            control: Arc::new(control),
            broadcast,
        }
    }
}

/// The equivalent bundle for `flocker-agent`: its config plus the concrete
/// backend the registry built for it.
#[derive(Clone)]
pub struct AgentServices {
    pub config: Arc<crate::config::AgentConfig>,
    pub backend: Arc<dyn VolumeBackend>,
}

impl AgentServices {
    pub fn new(config: crate::config::AgentConfig, backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
        }
    }
}
