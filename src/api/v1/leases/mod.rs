//! `/v1/configuration/leases/{dataset_id}`: acquire, renew, and release a
//! lease pinning a dataset to its current node.

pub mod acquire;
pub mod release;
pub mod renew;
