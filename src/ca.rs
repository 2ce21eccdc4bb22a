//! Cluster CA utility: mints the root certificate and signs
//! control-service/node/API-user leaf certificates, embedding `node_uuid`
//! or `username` in a custom extension so `protocol::tls` can read identity
//! straight out of the certificate instead of a separate credential.
//!
//! Grounded on `rcgen` 0.13's certificate-builder API.

use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::tls::NODE_UUID_OID;

/// Same private-use OID arc as `node_uuid`, one arc entry over, for the
/// `username` embedded in API-user client certificates.
const USERNAME_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 9999, 2];

#[derive(Debug, Error)]
pub enum CaError {
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
}

pub struct SignedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Generates the self-signed cluster root. Every leaf certificate this
/// utility signs chains to this one; every node and the control service
/// trust only this root, never each other directly.
pub fn generate_root_ca(cluster_name: &str) -> Result<SignedCertificate, CaError> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("{cluster_name} Flocker Cluster CA"));
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let key_pair = KeyPair::generate()?;
    let certificate = params.self_signed(&key_pair)?;

    Ok(SignedCertificate {
        certificate_pem: certificate.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

struct RootCa {
    params: CertificateParams,
    key_pair: KeyPair,
}

fn parse_root(root_cert_pem: &str, root_key_pem: &str) -> Result<RootCa, CaError> {
    let key_pair = KeyPair::from_pem(root_key_pem)?;
    let params = CertificateParams::from_ca_cert_pem(root_cert_pem)?;
    Ok(RootCa { params, key_pair })
}

/// Signs the control service's own leaf certificate. Key usage is
/// restricted to server auth plus digital signature/key encipherment —
/// this certificate is never valid as a CA or for signing other leaves.
pub fn sign_control_service_certificate(
    root_cert_pem: &str,
    root_key_pem: &str,
    hostnames: &[String],
) -> Result<SignedCertificate, CaError> {
    let root = parse_root(root_cert_pem, root_key_pem)?;

    let mut params = CertificateParams::new(hostnames.to_vec())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "flocker-control");
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
    for hostname in hostnames {
        params.subject_alt_names.push(SanType::DnsName(Ia5String::try_from(hostname.clone())?));
    }

    let key_pair = KeyPair::generate()?;
    let certificate = params.signed_by(&key_pair, &root.params, &root.key_pair)?;

    Ok(SignedCertificate {
        certificate_pem: certificate.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

/// Signs a node's leaf certificate, embedding `node_uuid` as a custom
/// extension. Client-auth only: a node never accepts inbound protocol
/// connections, it only dials out to the control service.
pub fn sign_node_certificate(
    root_cert_pem: &str,
    root_key_pem: &str,
    node_uuid: Uuid,
) -> Result<SignedCertificate, CaError> {
    let root = parse_root(root_cert_pem, root_key_pem)?;

    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("flocker-node-{node_uuid}"));
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params
        .custom_extensions
        .push(CustomExtension::from_oid_content(NODE_UUID_OID, node_uuid.to_string().into_bytes()));

    let key_pair = KeyPair::generate()?;
    let certificate = params.signed_by(&key_pair, &root.params, &root.key_pair)?;

    Ok(SignedCertificate {
        certificate_pem: certificate.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

/// Signs an API-user client certificate, embedding `username`. Used by
/// operators authenticating to the REST API over mutual TLS instead of a
/// bearer token.
pub fn sign_api_user_certificate(
    root_cert_pem: &str,
    root_key_pem: &str,
    username: &str,
) -> Result<SignedCertificate, CaError> {
    let root = parse_root(root_cert_pem, root_key_pem)?;

    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("flocker-user-{username}"));
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params
        .custom_extensions
        .push(CustomExtension::from_oid_content(USERNAME_OID, username.as_bytes().to_vec()));

    let key_pair = KeyPair::generate()?;
    let certificate = params.signed_by(&key_pair, &root.params, &root.key_pair)?;

    Ok(SignedCertificate {
        certificate_pem: certificate.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_ca_generates_a_self_signed_certificate() {
        let root = generate_root_ca("test-cluster").unwrap();
        assert!(root.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(root.private_key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn node_certificate_chains_to_the_root() {
        let root = generate_root_ca("test-cluster").unwrap();
        let node_uuid = Uuid::new_v4();
        let leaf = sign_node_certificate(&root.certificate_pem, &root.private_key_pem, node_uuid).unwrap();
        assert!(leaf.certificate_pem.contains("BEGIN CERTIFICATE"));
    }
}
