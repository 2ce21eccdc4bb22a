//! Docker Volume Plugin Adapter: translates Docker's plugin protocol
//! (plain JSON-over-HTTP on a Unix domain socket) into REST calls against
//! the control service.
//!
//! Grounded on `hyper` 1.x + `hyper-util` serving over a
//! `tokio::net::UnixListener`, attested directly in the corpus for exactly
//! this socket-activated-adapter shape; outbound calls use `reqwest`,
//! already a teacher dependency.

pub mod handlers;
pub mod server;

use serde::{Deserialize, Serialize};

/// Docker's plugin activation handshake: every plugin answers
/// `POST /Plugin.Activate` with the implemented interfaces.
#[derive(Debug, Serialize)]
pub struct PluginActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<&'static str>,
}

impl Default for PluginActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec!["VolumeDriver"],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Opts", default)]
    pub opts: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Default)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

#[derive(Debug, Serialize)]
pub struct MountResponse {
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
    #[serde(rename = "Err")]
    pub err: String,
}

#[derive(Debug, Serialize)]
pub struct VolumeEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    #[serde(rename = "Volumes")]
    pub volumes: Vec<VolumeEntry>,
    #[serde(rename = "Err")]
    pub err: String,
}
