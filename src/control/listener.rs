//! Agent protocol listener: accepts mutually-authenticated TLS connections
//! from agents, records their reports into `ControlService`, and streams
//! `ClusterStatusUpdate`s back out as the broadcast channel publishes them.
//!
//! One task per connection, matching the concurrency model in SPEC_FULL §5:
//! a wedged or slow agent only stalls its own task, never another agent's or
//! the REST API.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio_rustls::TlsAcceptor;

use crate::control::ControlService;
use crate::protocol::tls::{self, TlsError};
use crate::protocol::wire::{AgentMessage, ControlMessage};
use crate::protocol::{MessageStream, ProtocolError};
use crate::store::ConfigurationStore;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer did not present a certificate")]
    NoPeerCertificate,
    #[error("failed to read node identity from certificate: {0}")]
    Identity(#[from] TlsError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Accepts connections on `address` until `shutdown` fires.
pub async fn serve(
    address: SocketAddr,
    acceptor: TlsAcceptor,
    control: Arc<ControlService>,
    store: Arc<ConfigurationStore>,
    broadcast_notify: Arc<Notify>,
    update_rx_template: watch::Receiver<Option<ControlMessage>>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    log::info!("agent protocol listener bound to {address}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp_stream, peer_addr) = accepted?;
                let acceptor = acceptor.clone();
                let control = control.clone();
                let store = store.clone();
                let broadcast_notify = broadcast_notify.clone();
                let update_rx = update_rx_template.clone();
                let connection_shutdown = shutdown.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(
                        tcp_stream,
                        acceptor,
                        control,
                        store,
                        broadcast_notify,
                        update_rx,
                        connection_shutdown,
                    )
                    .await
                    {
                        log::warn!("agent connection from {peer_addr} ended: {e}");
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    tcp_stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    control: Arc<ControlService>,
    store: Arc<ConfigurationStore>,
    broadcast_notify: Arc<Notify>,
    mut update_rx: watch::Receiver<Option<ControlMessage>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ListenerError> {
    let tls_stream = acceptor.accept(tcp_stream).await?;
    let node_id = {
        let (_, session) = tls_stream.get_ref();
        let certs = session.peer_certificates().ok_or(ListenerError::NoPeerCertificate)?;
        let cert = certs.first().ok_or(ListenerError::NoPeerCertificate)?;
        tls::node_uuid_from_certificate(cert)?
    };

    log::info!("node {node_id} connected");

    let (mut writer, mut reader) = MessageStream::new(tls_stream).split();

    let initial = ControlMessage::ClusterStatusUpdate {
        configuration: store.get(),
        cluster_state: control.cluster_state(),
    };
    writer.send(&initial).await?;

    loop {
        tokio::select! {
            changed = update_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                if let Some(message) = update_rx.borrow_and_update().clone() {
                    writer.send(&message).await?;
                }
            }
            received = reader.recv::<AgentMessage>() => {
                match received? {
                    AgentMessage::NodeStateReport { era, node, nonmanifest } => {
                        control.record_report(node_id, era, node, nonmanifest);
                        broadcast_notify.notify_one();
                    }
                    AgentMessage::SetNodeEraForTesting { era } => {
                        control.set_era_for_testing(node_id, era);
                    }
                    AgentMessage::NoOp => {}
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
