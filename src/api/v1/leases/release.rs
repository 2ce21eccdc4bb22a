//! `DELETE /v1/configuration/leases/{dataset_id}`

use rocket::serde::json::Json;
use rocket::{delete, State};
use uuid::Uuid;

use crate::api::v1::conditional::{precondition_failed, store_error_response, IfConfigurationMatches, Tagged};
use crate::model::DatasetId;
use crate::services::Services;

#[delete("/v1/configuration/leases/<dataset_id>")]
pub async fn release_lease(
    dataset_id: Uuid,
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

    configuration.release_lease(dataset_id);

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
