//! `flocker-agent`: runs on every storage node. Connects to the control
//! service over mutual TLS, reports observed volume state, and converges
//! this node's backend toward whatever `Configuration` it last received.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;

use flocker::agent::{deployer, discover};
use flocker::backend::{registry, VolumeBackend};
use flocker::config::AgentConfig;
use flocker::error::FatalError;
use flocker::logging::{print_banner, setup_logging};
use flocker::model::{Configuration, Era, NodeId};
use flocker::protocol::connection::{mailbox, Backoff};
use flocker::protocol::tls::{self, node_uuid_from_cert_file};
use flocker::protocol::wire::{AgentMessage, ControlMessage};
use flocker::protocol::MessageStream;

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("tls setup failed: {0}")]
    Tls(#[from] tls::TlsError),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] flocker::protocol::ProtocolError),
    #[error("invalid control service address: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),
}

#[tokio::main]
async fn main() {
    setup_logging();
    print_banner("flocker-agent", |s| s.cyan().bold());

    match main_body().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(e.exit_code())
        }
    }
}

async fn main_body() -> Result<(), FatalError> {
    let config_path = std::env::var("FLOCKER_AGENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/flocker/agent.yml"));
    let config = AgentConfig::read(&config_path)?;

    let cert_path = config.certificates_path.join("node.crt");
    let node_id = node_uuid_from_cert_file(&cert_path)
        .map_err(|e| FatalError::CertificateError(e.to_string()))?;
    let era = Era::fresh(node_id);

    let backend = registry::build(&config.backend, &config.backend_options, node_id.0, node_id.to_string())
        .map_err(|e| FatalError::BadConfiguration(e.to_string()))?;
    let instance_id = backend
        .compute_instance_id()
        .await
        .map_err(|e| FatalError::BackendError(e.to_string()))?;

    log::info!("node {node_id} starting as era {era:?}, instance id {instance_id}");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (control_tx, control_rx) = mailbox();

    let deployer_backend = backend.clone();
    let deployer_shutdown = shutdown_rx.clone();
    let poll_interval = Duration::from_secs(config.poll_interval_seconds);
    let deployer_handle = tokio::spawn(deployer::run(
        deployer_backend,
        node_id,
        control_rx,
        poll_interval,
        deployer_shutdown,
    ));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let mut backoff = Backoff::default();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match run_connection(&config, node_id, era, backend.clone(), &instance_id, &control_tx, shutdown_rx.clone())
            .await
        {
            Ok(()) => break,
            Err(e) => {
                log::warn!("lost connection to control service: {e}");
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }

    let _ = deployer_handle.await;
    Ok(())
}

/// Runs one connection's lifetime: connects, then alternates between
/// periodic `NodeStateReport`s and inbound `ClusterStatusUpdate`s until the
/// connection drops or shutdown is requested. Returns `Ok(())` only on a
/// clean shutdown; any transport failure bubbles up so `main_body` can
/// back off and reconnect.
async fn run_connection(
    config: &AgentConfig,
    node_id: NodeId,
    era: Era,
    backend: Arc<dyn VolumeBackend>,
    instance_id: &str,
    control_tx: &watch::Sender<Option<ControlMessage>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let ca_cert_path = config.certificates_path.join("cluster.crt");
    let cert_path = config.certificates_path.join("node.crt");
    let key_path = config.certificates_path.join("node.key");
    let connector = tls::client_connector(&ca_cert_path, &cert_path, &key_path)?;

    let address = format!("{}:{}", config.control_service_address, config.control_service_port);
    let tcp_stream = TcpStream::connect(&address).await?;
    let server_name = ServerName::try_from(config.control_service_address.clone())?;
    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    let (mut writer, mut reader) = MessageStream::new(tls_stream).split();

    log::info!("connected to control service at {address}");

    let mut local_configuration = Configuration::empty();
    let mut report_interval = tokio::time::interval(Duration::from_secs(config.poll_interval_seconds));

    loop {
        tokio::select! {
            _ = report_interval.tick() => {
                let desired = local_configuration.desired_for(node_id);
                let observation = discover::observe(backend.as_ref(), instance_id, &desired)
                    .await
                    .unwrap_or_default();
                writer.send(&AgentMessage::NodeStateReport {
                    era,
                    node: observation.node,
                    nonmanifest: observation.nonmanifest,
                }).await?;
            }
            received = reader.recv::<ControlMessage>() => {
                let message = received?;
                if let ControlMessage::ClusterStatusUpdate { configuration, .. } = &message {
                    local_configuration = configuration.clone();
                }
                let _ = control_tx.send(Some(message));
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
