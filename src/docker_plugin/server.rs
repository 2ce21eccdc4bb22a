//! Unix-domain-socket HTTP server implementing Docker's plugin protocol,
//! grounded on `hyper` 1.x + `hyper-util` serving over
//! `tokio::net::UnixListener`.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use tokio::net::UnixListener;

use super::handlers::DockerPluginClient;
use super::{CreateRequest, NameRequest, PluginActivateResponse};

const SOCKET_PATH: &str = "/run/docker/plugins/flocker.sock";

pub fn socket_path() -> &'static str {
    SOCKET_PATH
}

async fn route(
    client: Arc<DockerPluginClient>,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = request.uri().path().to_string();
    let body_bytes = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let json_response = match path.as_str() {
        "/Plugin.Activate" => serde_json::to_value(PluginActivateResponse::default()).unwrap(),
        "/VolumeDriver.Create" => {
            let request: CreateRequest = serde_json::from_slice(&body_bytes).unwrap_or_default();
            serde_json::to_value(client.create(&request).await).unwrap()
        }
        "/VolumeDriver.Mount" => {
            let request = parse_name_request(&body_bytes);
            serde_json::to_value(client.mount(&request).await).unwrap()
        }
        "/VolumeDriver.Unmount" => {
            let request = parse_name_request(&body_bytes);
            serde_json::to_value(client.unmount(&request).await).unwrap()
        }
        "/VolumeDriver.Get" => {
            let request = parse_name_request(&body_bytes);
            match client.get(&request).await {
                Ok(volume) => serde_json::json!({ "Volume": volume, "Err": "" }),
                Err(e) => serde_json::to_value(e).unwrap(),
            }
        }
        "/VolumeDriver.Path" => {
            let request = parse_name_request(&body_bytes);
            match client.get(&request).await {
                Ok(volume) => serde_json::json!({ "Mountpoint": volume.mountpoint, "Err": "" }),
                Err(e) => serde_json::to_value(e).unwrap(),
            }
        }
        "/VolumeDriver.List" => serde_json::to_value(client.list().await).unwrap(),
        "/VolumeDriver.Remove" => {
            let request = parse_name_request(&body_bytes);
            serde_json::to_value(client.remove(&request).await).unwrap()
        }
        _ => serde_json::json!({ "Err": format!("unknown plugin verb {path}") }),
    };

    let bytes = serde_json::to_vec(&json_response).unwrap_or_default();
    Ok(Response::new(Full::new(Bytes::from(bytes))))
}

fn parse_name_request(body: &[u8]) -> NameRequest {
    serde_json::from_slice(body).unwrap_or(NameRequest { name: String::new() })
}

/// Serves the Docker plugin protocol on `socket_path` until the process is
/// killed. Docker connects to this socket directly; there is no TLS layer
/// here, matching the plugin protocol's own (root-only, local-socket)
/// trust model.
pub async fn serve(client: DockerPluginClient, socket_path: &str) -> std::io::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    let client = Arc::new(client);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let client = client.clone();

        tokio::spawn(async move {
            let service = service_fn(move |request| route(client.clone(), request));
            if let Err(e) = Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                log::warn!("docker plugin connection error: {e}");
            }
        });
    }
}
