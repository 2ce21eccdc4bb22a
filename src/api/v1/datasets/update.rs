//! `POST /v1/configuration/datasets/{id}`: metadata/maximum_size updates,
//! primary moves, and deletion — all guarded by the same conditional-tag
//! compare-and-swap `create.rs` uses.

use std::collections::BTreeMap;

use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{post, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::v1::conditional::{
    configuration_error_response, precondition_failed, store_error_response, IfConfigurationMatches, Tagged,
};
use crate::model::{DatasetId, NodeId};
use crate::services::Services;

#[derive(Debug, Deserialize, Default)]
pub struct UpdateDatasetRequest {
    pub maximum_size: Option<u64>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub move_to_primary: Option<NodeId>,
    #[serde(default)]
    pub deleted: bool,
}

#[post("/v1/configuration/datasets/<dataset_id>", format = "json", data = "<request>")]
pub async fn update_dataset(
    dataset_id: Uuid,
    request: Json<UpdateDatasetRequest>,
    if_matches: IfConfigurationMatches,
    services: &State<Services>,
) -> Result<Tagged, (rocket::http::Status, Json<rocket::serde::json::Value>)> {
    let dataset_id = DatasetId(dataset_id);
    let mut configuration = services.store.get();
    let expected_tag = configuration.tag;

    if let Some(expected) = if_matches.0 {
        if expected_tag != expected {
            return Err(precondition_failed(expected_tag));
        }
    }

    if let Some(new_node) = request.move_to_primary {
        configuration
            .move_primary(dataset_id, new_node, Utc::now())
            .map_err(configuration_error_response)?;
    }

    if request.maximum_size.is_some() || request.metadata.is_some() {
        let maximum_size = request.maximum_size;
        let metadata = request.metadata.clone();
        configuration.update_dataset(dataset_id, |dataset| {
            if let Some(size) = maximum_size {
                dataset.maximum_size = Some(size);
            }
            if let Some(metadata) = metadata {
                dataset.metadata = metadata;
            }
        });
    }

    if request.deleted {
        configuration
            .mark_deleted(dataset_id, Utc::now())
            .map_err(configuration_error_response)?;
    }

    let new_tag = services
        .store
        .set_if_matches(expected_tag, configuration)
        .map_err(store_error_response)?;
    services.broadcast.notify_one();

    Ok(Tagged::ok(
        new_tag,
        rocket::serde::json::json!({ "dataset_id": dataset_id.to_string() }),
    ))
}
