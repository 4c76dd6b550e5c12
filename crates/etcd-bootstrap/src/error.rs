//! Error types for the bootstrap agent.
//!
//! Every variant is fatal: the agent logs it and exits non-zero, and
//! the process supervisor is expected to restart it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Errors that can occur while deciding how to start etcd.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("did not find any valid addresses")]
    NoAddressFound,

    #[error("failed to enumerate interface addresses: {0}")]
    AddressEnumeration(#[source] nix::Error),

    #[error("failed to inspect {}: {source}", path.display())]
    StateInspection {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("peers cannot be blank")]
    MissingPeers,

    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    #[error("membership request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to add new member: {0}")]
    AddMemberFailed(String),

    #[error("failed to exec {}: {reason}", path.display())]
    ExecFailed { path: PathBuf, reason: String },
}
