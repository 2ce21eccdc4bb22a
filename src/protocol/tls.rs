//! Mutual TLS setup for the control↔agent channel.
//!
//! `rustls` + `tokio-rustls` for the transport, `x509-parser` to pull
//! `node_uuid` back out of the custom extension `src/ca.rs` embeds in every
//! node certificate it signs.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig as RustlsServerConfig};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use uuid::Uuid;

use crate::model::NodeId;

/// The custom OID `src/ca.rs` embeds the signed node's uuid under. Chosen
/// from Cisco's unassigned-for-private-use arc, as is conventional for
/// homegrown X.509 extensions that aren't registered with IANA.
pub const NODE_UUID_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 9999, 1];

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read certificate material at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(std::path::PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(std::path::PathBuf),
    #[error("rustls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("client certificate did not carry a node_uuid extension")]
    MissingNodeUuid,
    #[error("client certificate's node_uuid extension is not a valid uuid: {0}")]
    MalformedNodeUuid(#[from] uuid::Error),
    #[error("certificate verifier construction failed: {0}")]
    Verifier(String),
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let bytes = std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut bytes.as_slice())
        .filter_map(Result::ok)
        .collect();
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let bytes = std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .ok()
        .flatten()
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Builds the control service's listener-side acceptor: requires and
/// verifies a client certificate signed by `ca_cert_path`.
pub fn server_acceptor(
    ca_cert_path: &Path,
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(ca_cert_path)? {
        roots.add(cert).map_err(TlsError::Rustls)?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| TlsError::Verifier(e.to_string()))?;

    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;

    let config = RustlsServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds an agent's connector: authenticates with its own leaf certificate
/// and trusts only the cluster CA.
pub fn client_connector(
    ca_cert_path: &Path,
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsConnector, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(ca_cert_path)? {
        roots.add(cert).map_err(TlsError::Rustls)?;
    }
    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(TlsError::Rustls)?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Extracts the `node_uuid` embedded by `src/ca.rs` in a peer certificate's
/// custom extension. Called by the control service immediately after
/// accepting a TLS connection, before trusting anything the peer sends.
pub fn node_uuid_from_certificate(cert_der: &CertificateDer<'_>) -> Result<NodeId, TlsError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der.as_ref())
        .map_err(|e| TlsError::Verifier(e.to_string()))?;

    let oid = x509_parser::der_parser::oid::Oid::from(NODE_UUID_OID)
        .map_err(|_| TlsError::Verifier("invalid node_uuid oid".to_string()))?;

    let extension = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == oid)
        .ok_or(TlsError::MissingNodeUuid)?;

    let text = std::str::from_utf8(extension.value).map_err(|_| TlsError::MissingNodeUuid)?;
    let uuid = Uuid::parse_str(text.trim())?;
    Ok(NodeId(uuid))
}

/// Reads the `node_uuid` out of a node's own certificate file. `flocker-agent`
/// calls this at startup rather than minting or persisting its own id: the
/// certificate `src/ca.rs` signed for it is the single source of truth.
pub fn node_uuid_from_cert_file(cert_path: &Path) -> Result<NodeId, TlsError> {
    let certs = read_certs(cert_path)?;
    let cert = certs.first().ok_or_else(|| TlsError::NoCertificates(cert_path.to_path_buf()))?;
    node_uuid_from_certificate(cert)
}
