//! `flocker-docker-plugin`: the Docker Volume Plugin Adapter. Translates
//! Docker's plugin protocol into REST calls against a `flocker-control`
//! instance, served over a Unix domain socket.

use std::path::PathBuf;

use colored::Colorize;
use serde::Deserialize;

use flocker::docker_plugin::handlers::DockerPluginClient;
use flocker::docker_plugin::server;
use flocker::error::FatalError;
use flocker::logging::{print_banner, setup_logging};
use flocker::model::NodeId;

#[derive(Debug, Deserialize)]
struct DockerPluginConfig {
    rest_base_url: String,
    node_uuid: NodeId,
    #[serde(default = "default_socket_path")]
    socket_path: String,
}

fn default_socket_path() -> String {
    server::socket_path().to_string()
}

impl DockerPluginConfig {
    fn read(path: &std::path::Path) -> Result<Self, FatalError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FatalError::BadConfiguration(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|e| FatalError::BadConfiguration(format!("{}: {e}", path.display())))
    }
}

#[tokio::main]
async fn main() {
    setup_logging();
    print_banner("flocker-docker-plugin", |s| s.cyan().bold());

    match main_body().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(e.exit_code())
        }
    }
}

async fn main_body() -> Result<(), FatalError> {
    let config_path = std::env::var("FLOCKER_DOCKER_PLUGIN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/flocker/docker-plugin.yml"));
    let config = DockerPluginConfig::read(&config_path)?;

    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| FatalError::BadConfiguration(e.to_string()))?;
    let client = DockerPluginClient::new(config.rest_base_url.clone(), http, config.node_uuid);

    log::info!(
        "serving Docker volume plugin protocol on {} against {}",
        config.socket_path,
        config.rest_base_url
    );

    server::serve(client, &config.socket_path)
        .await
        .map_err(|e| FatalError::BadConfiguration(e.to_string()))
}
