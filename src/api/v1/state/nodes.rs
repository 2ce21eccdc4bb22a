//! `GET /v1/state/nodes/by_era/{era}`

use rocket::serde::json::{json, Value};
use rocket::{get, http::Status, State};
use uuid::Uuid;

use crate::services::Services;

#[get("/v1/state/nodes/by_era/<era_uuid>")]
pub async fn state_nodes_by_era(era_uuid: Uuid, services: &State<Services>) -> (Status, Value) {
    match services.control.node_for_era(era_uuid) {
        Some(node_id) => (Status::Ok, json!({ "node_uuid": node_id.to_string() })),
        None => (Status::NotFound, json!({ "error": "no node reporting under that era" })),
    }
}
