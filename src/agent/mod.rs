//! The agent half of the system: local discovery, the convergence loop, and
//! its action plans.

pub mod deployer;
pub mod discover;
pub mod plan;
