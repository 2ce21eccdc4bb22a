//! `GET /health` at the root, outside `/v1` — every teacher-grounded service
//! in this corpus exposes one.

use rocket::get;
use rocket::serde::json::{json, Value};

#[get("/health")]
pub fn health() -> Value {
    json!({ "status": "ok" })
}

pub fn routes() -> Vec<rocket::Route> {
    rocket::routes![health]
}
