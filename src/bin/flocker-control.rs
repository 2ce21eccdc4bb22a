//! `flocker-control`: the Control Service binary. Owns the Configuration
//! Store, serves the REST API, accepts agent protocol connections, and
//! broadcasts `ClusterStatusUpdate`s as they change.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;

use flocker::config::ControlConfig;
use flocker::control::broadcast::{self, BroadcastTrigger};
use flocker::control::{listener, ControlService};
use flocker::error::FatalError;
use flocker::logging::{print_banner, setup_logging};
use flocker::protocol::tls;
use flocker::services::Services;
use flocker::store::ConfigurationStore;

#[rocket::main]
async fn main() {
    setup_logging();
    print_banner("flocker-control", |s| s.cyan().bold());

    match main_body().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(e.exit_code())
        }
    }
}

async fn main_body() -> Result<(), FatalError> {
    let config_path = std::env::var("FLOCKER_CONTROL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/flocker/control.json"));
    let config = ControlConfig::read(&config_path)?;

    let store = ConfigurationStore::open(&config.data_path)
        .map_err(|e| FatalError::UnreadableStore(e.to_string()))?;

    let control_service = ControlService::new();
    let trigger = BroadcastTrigger::new();
    let services = Services::new(config.clone(), store, control_service, trigger.handle());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let eviction_control = services.control.clone();
    let grace_period = Duration::from_secs(config.node_grace_period_seconds);
    let eviction_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(grace_period);
        let mut shutdown = eviction_shutdown;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for node_id in eviction_control.evict_stale() {
                        log::info!("evicted node {node_id} after grace period");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    let (broadcast_tx, broadcast_rx_template) = watch::channel(None);
    let broadcast_store = services.store.clone();
    let broadcast_control = services.control.clone();
    let broadcast_shutdown = shutdown_rx.clone();
    tokio::spawn(broadcast::run(
        trigger.handle(),
        broadcast_tx,
        move || (broadcast_store.get(), broadcast_control.cluster_state()),
        broadcast_shutdown,
    ));

    let ca_cert_path = config.certificates_path.join("cluster.crt");
    let cert_path = config.certificates_path.join("control-service.crt");
    let key_path = config.certificates_path.join("control-service.key");
    let acceptor = tls::server_acceptor(&ca_cert_path, &cert_path, &key_path)
        .map_err(|e| FatalError::CertificateError(e.to_string()))?;

    let control_address: SocketAddr = format!("{}:{}", config.control_address, config.control_port)
        .parse()
        .map_err(|e| FatalError::BadConfiguration(format!("invalid control_address: {e}")))?;

    let listener_control = services.control.clone();
    let listener_store = services.store.clone();
    let listener_notify = trigger.handle();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = listener::serve(
            control_address,
            acceptor,
            listener_control,
            listener_store,
            listener_notify,
            broadcast_rx_template,
            listener_shutdown,
        )
        .await
        {
            log::error!("agent protocol listener exited: {e}");
        }
    });

    let rocket_config = rocket::Config {
        address: config
            .rest_address
            .parse()
            .map_err(|e| FatalError::BadConfiguration(format!("invalid rest_address: {e}")))?,
        port: config.rest_port,
        ..rocket::Config::default()
    };

    rocket::custom(rocket_config)
        .manage(services)
        .mount("/", flocker::api::routes())
        .launch()
        .await
        .map_err(|e| FatalError::BadConfiguration(e.to_string()))?;

    Ok(())
}
