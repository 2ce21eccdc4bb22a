//! `POST /v1/configuration/datasets`

use std::collections::BTreeMap;

use rocket::serde::json::Json;
use rocket::{post, State};
use serde::Deserialize;

use crate::api::v1::conditional::{
    configuration_error_response, precondition_failed, store_error_response, IfConfigurationMatches, Tagged,
};
use crate::model::{Dataset, DatasetId, NodeId};
use crate::services::Services;

#[derive(Debug, Deserialize)]
pub struct CreateDatasetRequest {
    pub primary: NodeId,
    pub maximum_size: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[post("/v1/configuration/datasets", format = "json", data = "<request>")]
pub async fn create_dataset(
    request: Json<CreateDatasetRequest>,
    if_matches: IfConfigurationMatches,
    services: &State<Services>,
) -> Result<Tagged, (rocket::http::Status, Json<rocket::serde::json::Value>)> {
    let mut configuration = services.store.get();
    let expected_tag = configuration.tag;

    if let Some(expected) = if_matches.0 {
        if expected_tag != expected {
            return Err(precondition_failed(expected_tag));
        }
    }

    let dataset_id = DatasetId::new();
    let mut dataset = Dataset::new(dataset_id);
    dataset.maximum_size = request.maximum_size;
    dataset.metadata = request.metadata.clone();

    configuration
        .create_dataset(request.primary, dataset)
        .map_err(configuration_error_response)?;

    let new_tag = services
        .store
        .set_if_matches(expected_tag, configuration)
        .map_err(store_error_response)?;
    services.broadcast.notify_one();

    Ok(Tagged::created(
        new_tag,
        rocket::serde::json::json!({ "dataset_id": dataset_id.to_string() }),
    ))
}
