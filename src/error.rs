//! Process-level error taxonomy.
//!
//! Every subsystem gets its own `thiserror` enum (see `backend::BackendError`,
//! `store::ConfigStoreError`, `protocol::ProtocolError`); this module only
//! defines the *fatal* conditions a binary's `main` maps to an exit code, per
//! SPEC_FULL §6/§7. Nothing else in the crate should construct a
//! `FatalError` directly — it is the top of the funnel, not a general-purpose
//! error type.

use std::fmt;

/// A condition severe enough that the process should not keep running.
/// Continuing past one of these risks silent data-integrity loss, which is
/// strictly worse than a loud exit.
#[derive(Debug)]
pub enum FatalError {
    BadConfiguration(String),
    UnreadableStore(String),
    CertificateError(String),
    BackendError(String),
}

impl FatalError {
    /// Process exit code, per SPEC_FULL §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::BadConfiguration(_) => 1,
            FatalError::UnreadableStore(_) => 2,
            FatalError::CertificateError(_) => 3,
            FatalError::BackendError(_) => 64,
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::BadConfiguration(msg) => write!(f, "bad configuration: {msg}"),
            FatalError::UnreadableStore(msg) => write!(f, "unreadable persistent store: {msg}"),
            FatalError::CertificateError(msg) => write!(f, "certificate error: {msg}"),
            FatalError::BackendError(msg) => write!(f, "unexpected backend error at boot: {msg}"),
        }
    }
}

impl std::error::Error for FatalError {}

impl From<crate::ca::CaError> for FatalError {
    fn from(e: crate::ca::CaError) -> Self {
        FatalError::CertificateError(e.to_string())
    }
}
