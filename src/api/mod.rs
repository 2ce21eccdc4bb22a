//! REST API: the control service's front door.
//!
//! Grounded in the teacher's per-resource module convention
//! (`schemas/v1/api/<resource>/{mod.rs,types.rs,list.rs,get.rs,create.rs}`,
//! re-exported and aggregated by a `routes()` function) and its
//! `(Status, Json<Value>)` error-tuple convention for non-2xx responses.

pub mod health;
pub mod v1;

pub fn routes() -> Vec<rocket::Route> {
    let mut routes = v1::routes();
    routes.extend(health::routes());
    routes
}
