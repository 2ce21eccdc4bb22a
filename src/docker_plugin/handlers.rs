//! Docker volume-plugin request handlers, each translating one Docker
//! plugin verb into a call against the control service's REST API.
//!
//! `Mount` polls `/v1/state/datasets` up to a bounded 120 s budget waiting
//! for the agent on this node to report the dataset attached and mounted;
//! every other verb is a single REST round trip.

use std::time::Duration;

use serde_json::Value;

use crate::model::NodeId;

use super::{CreateRequest, ErrorResponse, ListResponse, MountResponse, NameRequest, VolumeEntry};

const MOUNT_POLL_BUDGET: Duration = Duration::from_secs(120);
const MOUNT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DockerPluginClient {
    rest_base_url: String,
    http: reqwest::Client,
    node_uuid: NodeId,
}

impl DockerPluginClient {
    pub fn new(rest_base_url: String, http: reqwest::Client, node_uuid: NodeId) -> Self {
        Self {
            rest_base_url,
            http,
            node_uuid,
        }
    }

    async fn configuration_datasets(&self) -> Result<Vec<Value>, reqwest::Error> {
        let body: Value = self
            .http
            .get(format!("{}/v1/configuration/datasets", self.rest_base_url))
            .send()
            .await?
            .json()
            .await?;
        Ok(body["datasets"].as_array().cloned().unwrap_or_default())
    }

    async fn observed_datasets(&self) -> Result<Vec<Value>, reqwest::Error> {
        let body: Value = self
            .http
            .get(format!("{}/v1/state/datasets", self.rest_base_url))
            .send()
            .await?
            .json()
            .await?;
        Ok(body["datasets"].as_array().cloned().unwrap_or_default())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Value>, reqwest::Error> {
        let datasets = self.configuration_datasets().await?;
        Ok(datasets
            .into_iter()
            .find(|d| d["metadata"]["name"] == name))
    }

    /// The observed mount path for `dataset_id` on this node, if the agent
    /// here has reported it attached with a path yet.
    async fn observed_path(&self, dataset_id: &str) -> Result<Option<String>, reqwest::Error> {
        let observed = self.observed_datasets().await?;
        Ok(observed
            .into_iter()
            .find(|d| d["dataset_id"] == dataset_id && d["path"].is_string())
            .and_then(|d| d["path"].as_str().map(str::to_string)))
    }

    /// Creates a dataset with `primary` as its primary node. Shared by
    /// `create` (which honors a caller-supplied `primary_node` opt) and
    /// `mount`'s create-on-miss path (which always means this node).
    async fn create_dataset_with_primary(&self, name: &str, primary: NodeId, maximum_size: Option<u64>) -> Result<(), String> {
        let body = serde_json::json!({
            "primary": primary,
            "maximum_size": maximum_size,
            "metadata": { "name": name },
        });
        let response = self
            .http
            .post(format!("{}/v1/configuration/datasets", self.rest_base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("control service rejected create: {}", response.status()))
        }
    }

    /// Moves `dataset_id`'s primary manifestation to `primary`.
    async fn move_to_primary(&self, dataset_id: &str, primary: NodeId) -> Result<(), String> {
        let body = serde_json::json!({ "move_to_primary": primary });
        let response = self
            .http
            .post(format!("{}/v1/configuration/datasets/{dataset_id}", self.rest_base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("control service rejected move: {}", response.status()))
        }
    }

    pub async fn create(&self, request: &CreateRequest) -> ErrorResponse {
        match self.find_by_name(&request.name).await {
            Ok(Some(_)) => return ErrorResponse::default(),
            Err(e) => return ErrorResponse { err: e.to_string() },
            Ok(None) => {}
        }

        let body = serde_json::json!({
            "primary": request.opts.get("primary_node").cloned().unwrap_or_default(),
            "maximum_size": request.opts.get("size").and_then(|s| s.parse::<u64>().ok()),
            "metadata": { "name": request.name },
        });

        match self
            .http
            .post(format!("{}/v1/configuration/datasets", self.rest_base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => ErrorResponse::default(),
            Ok(response) => ErrorResponse {
                err: format!("control service rejected create: {}", response.status()),
            },
            Err(e) => ErrorResponse { err: e.to_string() },
        }
    }

    pub async fn mount(&self, request: &NameRequest) -> MountResponse {
        let deadline = tokio::time::Instant::now() + MOUNT_POLL_BUDGET;
        loop {
            let dataset = match self.find_by_name(&request.name).await {
                Ok(Some(dataset)) => dataset,
                // Nothing by this name yet: create it with this node as
                // primary, then poll for the agent here to pick it up.
                Ok(None) => {
                    if let Err(e) = self.create_dataset_with_primary(&request.name, self.node_uuid, None).await {
                        return MountResponse {
                            mountpoint: String::new(),
                            err: e,
                        };
                    }
                    tokio::time::sleep(MOUNT_POLL_INTERVAL).await;
                    continue;
                }
                Err(e) => {
                    return MountResponse {
                        mountpoint: String::new(),
                        err: e.to_string(),
                    }
                }
            };
            let dataset_id = dataset["dataset_id"].as_str().unwrap_or_default();

            // Exists, but its primary is elsewhere: move it here before
            // waiting on a path the agent on this node will never report.
            let primary = dataset["primary"].as_str().unwrap_or_default();
            if primary != self.node_uuid.to_string() {
                if let Err(e) = self.move_to_primary(dataset_id, self.node_uuid).await {
                    return MountResponse {
                        mountpoint: String::new(),
                        err: e,
                    };
                }
                tokio::time::sleep(MOUNT_POLL_INTERVAL).await;
                continue;
            }

            match self.observed_path(dataset_id).await {
                Ok(Some(path)) => {
                    return MountResponse {
                        mountpoint: path,
                        err: String::new(),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    return MountResponse {
                        mountpoint: String::new(),
                        err: e.to_string(),
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return MountResponse {
                    mountpoint: String::new(),
                    err: format!("timed out waiting for {:?} to mount", request.name),
                };
            }
            tokio::time::sleep(MOUNT_POLL_INTERVAL).await;
        }
    }

    pub async fn unmount(&self, _request: &NameRequest) -> ErrorResponse {
        // The agent detaches once the dataset is no longer desired on this
        // node, driven by configuration, not by the container lifecycle
        // event itself.
        ErrorResponse::default()
    }

    pub async fn get(&self, request: &NameRequest) -> Result<VolumeEntry, ErrorResponse> {
        let dataset = match self.find_by_name(&request.name).await {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                return Err(ErrorResponse {
                    err: format!("no dataset named {:?}", request.name),
                })
            }
            Err(e) => return Err(ErrorResponse { err: e.to_string() }),
        };
        let dataset_id = dataset["dataset_id"].as_str().unwrap_or_default();
        let mountpoint = self.observed_path(dataset_id).await.ok().flatten().unwrap_or_default();
        Ok(VolumeEntry {
            name: request.name.clone(),
            mountpoint,
        })
    }

    pub async fn list(&self) -> ListResponse {
        let datasets = match self.configuration_datasets().await {
            Ok(datasets) => datasets,
            Err(e) => {
                return ListResponse {
                    volumes: Vec::new(),
                    err: e.to_string(),
                }
            }
        };
        let observed = self.observed_datasets().await.unwrap_or_default();

        let volumes = datasets
            .iter()
            .filter_map(|d| {
                let name = d["metadata"]["name"].as_str()?.to_string();
                let dataset_id = d["dataset_id"].as_str()?;
                let mountpoint = observed
                    .iter()
                    .find(|o| o["dataset_id"] == dataset_id && o["path"].is_string())
                    .and_then(|o| o["path"].as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(VolumeEntry { name, mountpoint })
            })
            .collect();

        ListResponse {
            volumes,
            err: String::new(),
        }
    }

    pub async fn remove(&self, request: &NameRequest) -> ErrorResponse {
        let dataset = match self.find_by_name(&request.name).await {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                return ErrorResponse {
                    err: format!("no dataset named {:?}", request.name),
                }
            }
            Err(e) => return ErrorResponse { err: e.to_string() },
        };
        let Some(dataset_id) = dataset["dataset_id"].as_str() else {
            return ErrorResponse {
                err: "dataset response missing dataset_id".to_string(),
            };
        };

        let body = serde_json::json!({ "deleted": true });
        match self
            .http
            .post(format!("{}/v1/configuration/datasets/{dataset_id}", self.rest_base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => ErrorResponse::default(),
            Ok(response) => ErrorResponse {
                err: format!("control service rejected delete: {}", response.status()),
            },
            Err(e) => ErrorResponse { err: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;

    #[test]
    fn plugin_activate_response_advertises_volume_driver() {
        let response = super::super::PluginActivateResponse::default();
        assert_eq!(response.implements, vec!["VolumeDriver"]);
    }

    /// Returns a different canned JSON body on each successive call to the
    /// mocked endpoint, clamped to the last body once exhausted. Used to
    /// simulate a control service whose state changes between `mount`'s
    /// polling iterations without standing up a real one.
    struct SequencedJson {
        responses: Vec<serde_json::Value>,
        calls: AtomicUsize,
    }

    impl SequencedJson {
        fn new(responses: Vec<serde_json::Value>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl wiremock::Respond for SequencedJson {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let index = self.calls.fetch_add(1, Ordering::SeqCst).min(self.responses.len() - 1);
            ResponseTemplate::new(200).set_body_json(&self.responses[index])
        }
    }

    #[tokio::test]
    async fn mount_creates_dataset_when_missing_and_waits_for_convergence() {
        let server = MockServer::start().await;
        let node_uuid = NodeId::new();
        let dataset_id = uuid::Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/v1/configuration/datasets"))
            .respond_with(SequencedJson::new(vec![
                serde_json::json!({ "datasets": [] }),
                serde_json::json!({ "datasets": [
                    { "dataset_id": dataset_id.to_string(), "primary": node_uuid.to_string(), "metadata": { "name": "vol1" } }
                ] }),
            ]))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/configuration/datasets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "dataset_id": dataset_id.to_string(),
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/state/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "datasets": [
                    { "dataset_id": dataset_id.to_string(), "path": "/var/lib/flocker/vol1" }
                ]
            })))
            .mount(&server)
            .await;

        let client = DockerPluginClient::new(server.uri(), reqwest::Client::new(), node_uuid);
        let response = client.mount(&NameRequest { name: "vol1".to_string() }).await;

        assert_eq!(response.err, "");
        assert_eq!(response.mountpoint, "/var/lib/flocker/vol1");
    }

    #[tokio::test]
    async fn mount_moves_primary_here_when_dataset_exists_elsewhere() {
        let server = MockServer::start().await;
        let node_uuid = NodeId::new();
        let other_node = NodeId::new();
        let dataset_id = uuid::Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/v1/configuration/datasets"))
            .respond_with(SequencedJson::new(vec![
                serde_json::json!({ "datasets": [
                    { "dataset_id": dataset_id.to_string(), "primary": other_node.to_string(), "metadata": { "name": "vol1" } }
                ] }),
                serde_json::json!({ "datasets": [
                    { "dataset_id": dataset_id.to_string(), "primary": node_uuid.to_string(), "metadata": { "name": "vol1" } }
                ] }),
            ]))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("/v1/configuration/datasets/{dataset_id}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/state/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "datasets": [
                    { "dataset_id": dataset_id.to_string(), "path": "/var/lib/flocker/vol1" }
                ]
            })))
            .mount(&server)
            .await;

        let client = DockerPluginClient::new(server.uri(), reqwest::Client::new(), node_uuid);
        let response = client.mount(&NameRequest { name: "vol1".to_string() }).await;

        assert_eq!(response.err, "");
        assert_eq!(response.mountpoint, "/var/lib/flocker/vol1");
    }
}
