//! `flocker-ca`: operator CLI wrapping `src/ca.rs`. Mints the cluster root
//! once, then signs one leaf certificate per invocation. Writes PEM files
//! under the fixed names every other binary expects to find them under.

use std::path::{Path, PathBuf};

use colored::Colorize;
use uuid::Uuid;

use flocker::ca::{self, SignedCertificate};
use flocker::error::FatalError;
use flocker::logging::{print_banner, setup_logging};

fn main() {
    setup_logging();
    print_banner("flocker-ca", |s| s.cyan().bold());

    match run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(e.exit_code())
        }
    }
}

fn usage() -> String {
    "usage:\n  \
     flocker-ca init <cluster-name> [certificates-path]\n  \
     flocker-ca sign-control-service <hostname>... [certificates-path]\n  \
     flocker-ca sign-node <node-uuid> [certificates-path]\n  \
     flocker-ca sign-user <username> [certificates-path]"
        .to_string()
}

fn run() -> Result<(), FatalError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        return Err(FatalError::BadConfiguration(usage()));
    };

    match command.as_str() {
        "init" => {
            let [cluster_name, tail @ ..] = rest else {
                return Err(FatalError::BadConfiguration(usage()));
            };
            let certificates_path = certificates_path_from(tail);
            let root = ca::generate_root_ca(cluster_name)?;
            write_pair(&certificates_path, "cluster.crt", "cluster.key", &root)?;
            log::info!("wrote cluster root certificate to {}", certificates_path.display());
        }
        "sign-control-service" => {
            let certificates_path = last_path_or_here(rest);
            let hostnames: Vec<String> = rest
                .iter()
                .filter(|a| certificates_path_candidate(a.as_str()).is_none())
                .cloned()
                .collect();
            if hostnames.is_empty() {
                return Err(FatalError::BadConfiguration(usage()));
            }
            let (root_cert, root_key) = read_root(&certificates_path)?;
            let leaf = ca::sign_control_service_certificate(&root_cert, &root_key, &hostnames)?;
            write_pair(&certificates_path, "control-service.crt", "control-service.key", &leaf)?;
            log::info!("signed control-service certificate for {hostnames:?}");
        }
        "sign-node" => {
            let [node_uuid, tail @ ..] = rest else {
                return Err(FatalError::BadConfiguration(usage()));
            };
            let certificates_path = certificates_path_from(tail);
            let node_uuid = Uuid::parse_str(node_uuid)
                .map_err(|e| FatalError::BadConfiguration(format!("invalid node uuid: {e}")))?;
            let (root_cert, root_key) = read_root(&certificates_path)?;
            let leaf = ca::sign_node_certificate(&root_cert, &root_key, node_uuid)?;
            write_pair(&certificates_path, "node.crt", "node.key", &leaf)?;
            log::info!("signed node certificate for {node_uuid}");
        }
        "sign-user" => {
            let [username, tail @ ..] = rest else {
                return Err(FatalError::BadConfiguration(usage()));
            };
            let certificates_path = certificates_path_from(tail);
            let (root_cert, root_key) = read_root(&certificates_path)?;
            let leaf = ca::sign_api_user_certificate(&root_cert, &root_key, username)?;
            let crt_name = format!("user-{username}.crt");
            let key_name = format!("user-{username}.key");
            write_pair(&certificates_path, &crt_name, &key_name, &leaf)?;
            log::info!("signed API user certificate for {username:?}");
        }
        _ => return Err(FatalError::BadConfiguration(usage())),
    }

    Ok(())
}

fn certificates_path_candidate(arg: &str) -> Option<PathBuf> {
    let path = PathBuf::from(arg);
    path.is_dir().then_some(path)
}

fn certificates_path_from(tail: &[String]) -> PathBuf {
    tail.first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/flocker"))
}

fn last_path_or_here(rest: &[String]) -> PathBuf {
    rest.last()
        .and_then(|a| certificates_path_candidate(a))
        .unwrap_or_else(|| PathBuf::from("/etc/flocker"))
}

fn read_root(certificates_path: &Path) -> Result<(String, String), FatalError> {
    let cert = std::fs::read_to_string(certificates_path.join("cluster.crt"))
        .map_err(|e| FatalError::CertificateError(format!("reading cluster.crt: {e}")))?;
    let key = std::fs::read_to_string(certificates_path.join("cluster.key"))
        .map_err(|e| FatalError::CertificateError(format!("reading cluster.key: {e}")))?;
    Ok((cert, key))
}

fn write_pair(
    certificates_path: &Path,
    cert_name: &str,
    key_name: &str,
    signed: &SignedCertificate,
) -> Result<(), FatalError> {
    std::fs::create_dir_all(certificates_path)
        .map_err(|e| FatalError::CertificateError(format!("{}: {e}", certificates_path.display())))?;
    std::fs::write(certificates_path.join(cert_name), &signed.certificate_pem)
        .map_err(|e| FatalError::CertificateError(format!("{cert_name}: {e}")))?;
    std::fs::write(certificates_path.join(key_name), &signed.private_key_pem)
        .map_err(|e| FatalError::CertificateError(format!("{key_name}: {e}")))?;
    Ok(())
}
