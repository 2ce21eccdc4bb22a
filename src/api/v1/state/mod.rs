//! `/v1/state`: the observed side of the system, aggregated from every
//! connected agent's reports. Unlike `/v1/configuration`, these routes are
//! not conditional-tag-guarded — `ClusterState` is never written through the
//! REST API, only read.

pub mod datasets;
pub mod nodes;
