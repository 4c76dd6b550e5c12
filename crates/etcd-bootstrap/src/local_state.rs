//! Local state inspection.
//!
//! etcd creates `member/` (voting member) or `proxy/` (proxy) under its
//! data directory on first successful start. Once either exists, etcd's
//! own durable state decides how it starts and no join logic may run.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BootstrapError, BootstrapResult};

/// Subdirectories of the data directory that mark a prior role.
pub const ROLE_MARKERS: [&str; 2] = ["member", "proxy"];

/// Return the first role marker present under `data_dir`, if any.
///
/// A missing marker is not an error. Any other filesystem error is
/// propagated so an inconclusive check never reads as "never joined".
pub fn prior_role(data_dir: &Path) -> BootstrapResult<Option<PathBuf>> {
    for marker in ROLE_MARKERS {
        let path = data_dir.join(marker);
        match std::fs::metadata(&path) {
            Ok(_) => return Ok(Some(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "role marker absent");
            }
            Err(source) => return Err(BootstrapError::StateInspection { path, source }),
        }
    }
    Ok(None)
}

/// Whether this node has started as a member or proxy before.
pub fn has_prior_role(data_dir: &Path) -> BootstrapResult<bool> {
    Ok(prior_role(data_dir)?.is_some())
}
