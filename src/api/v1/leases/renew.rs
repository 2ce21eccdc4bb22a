//! `PUT /v1/configuration/leases/{dataset_id}`: extends an existing lease's
//! expiration without changing which node holds it.

use chrono::{DateTime, Utc};
use rocket::serde::json::Json;
use rocket::{put, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::v1::conditional::{precondition_failed, store_error_response, IfConfigurationMatches, Tagged};
use crate::model::{DatasetId, Lease, NodeId};
use crate::services::Services;

#[derive(Debug, Deserialize)]
pub struct RenewLeaseRequest {
    pub node_uuid: NodeId,
    pub expires_at: Option<DateTime<Utc>>,
}

#[put("/v1/configuration/leases/<dataset_id>", format = "json", data = "<request>")]
pub async fn renew_lease(
    dataset_id: Uuid,
    request: Json<RenewLeaseRequest>,
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

    let Some(existing) = configuration.lease_for(dataset_id).copied() else {
        return Err((
            rocket::http::Status::NotFound,
            Json(rocket::serde::json::json!({ "error": "no lease held for this dataset" })),
        ));
    };

    if existing.node_uuid != request.node_uuid {
        return Err((
            rocket::http::Status::Conflict,
            Json(rocket::serde::json::json!({
                "error": "lease is held by a different node",
                "held_by": existing.node_uuid.to_string(),
            })),
        ));
    }

    configuration.acquire_lease(Lease {
        dataset_id,
        node_uuid: existing.node_uuid,
        expiration: request.expires_at,
    });

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
