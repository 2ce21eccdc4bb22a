//! `/v1` route aggregation, mirroring `schemas/v1/api/mod.rs`'s
//! per-resource `pub mod` + `routes()` convention.

pub mod conditional;
pub mod datasets;
pub mod leases;
pub mod state;

use rocket::serde::json::{json, Value};
use rocket::{get, routes};

#[get("/v1/version")]
pub fn version() -> Value {
    json!({ "version": crate::model::Configuration::CURRENT_VERSION })
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        datasets::list::list_datasets,
        datasets::create::create_dataset,
        datasets::update::update_dataset,
        state::datasets::state_datasets,
        state::nodes::state_nodes_by_era,
        leases::acquire::acquire_lease,
        leases::renew::renew_lease,
        leases::release::release_lease,
        version,
    ]
}
