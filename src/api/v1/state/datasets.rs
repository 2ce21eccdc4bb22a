//! `GET /v1/state/datasets`

use rocket::serde::json::{json, Value};
use rocket::{get, State};

use crate::services::Services;

#[get("/v1/state/datasets")]
pub async fn state_datasets(services: &State<Services>) -> Value {
    let cluster_state = services.control.cluster_state();
    let datasets: Vec<Value> = cluster_state
        .nodes
        .iter()
        .flat_map(|(node_id, node)| {
            node.manifestations.values().map(move |m| {
                json!({
                    "dataset_id": m.dataset.dataset_id.to_string(),
                    "node": node_id.to_string(),
                    "primary": m.primary,
                    "path": node.paths.get(&m.dataset.dataset_id),
                })
            })
        })
        .collect();

    json!({ "datasets": datasets })
}
