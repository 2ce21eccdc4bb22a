//! `GET /v1/configuration/datasets`

use rocket::{get, State};

use super::DatasetView;
use crate::api::v1::conditional::Tagged;
use crate::services::Services;

#[get("/v1/configuration/datasets")]
pub async fn list_datasets(services: &State<Services>) -> Tagged {
    let configuration = services.store.get();
    let views: Vec<DatasetView> = configuration
        .nodes
        .iter()
        .flat_map(|(node_id, node)| {
            node.manifestations
                .values()
                .filter(|m| m.primary)
                .map(move |m| DatasetView {
                    dataset_id: m.dataset.dataset_id,
                    primary: *node_id,
                    maximum_size: m.dataset.maximum_size,
                    metadata: m.dataset.metadata.clone(),
                    deleted: m.dataset.deleted,
                })
        })
        .collect();

    Tagged::ok(
        configuration.tag,
        rocket::serde::json::json!({ "datasets": views }),
    )
}
