//! Process handoff — replaces the agent with etcd.
//!
//! The engine receives a fresh environment built from the decision and
//! the node's configuration; nothing from the agent's own environment is
//! inherited.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::engine::Decision;
use crate::error::{BootstrapError, BootstrapResult};

/// `argv[0]` passed to the engine.
pub const ENGINE_ARGV0: &str = "etcd";

/// Environment variable names understood by etcd.
pub mod keys {
    pub const DATA_DIR: &str = "ETCD_DATA_DIR";
    pub const NAME: &str = "ETCD_NAME";
    pub const DISCOVERY: &str = "ETCD_DISCOVERY";
    pub const INITIAL_CLUSTER: &str = "ETCD_INITIAL_CLUSTER";
    pub const INITIAL_CLUSTER_STATE: &str = "ETCD_INITIAL_CLUSTER_STATE";
    pub const PROXY: &str = "ETCD_PROXY";
    pub const LISTEN_PEER_URLS: &str = "ETCD_LISTEN_PEER_URLS";
    pub const INITIAL_ADVERTISE_PEER_URLS: &str = "ETCD_INITIAL_ADVERTISE_PEER_URLS";
    pub const LISTEN_CLIENT_URLS: &str = "ETCD_LISTEN_CLIENT_URLS";
    pub const ADVERTISE_CLIENT_URLS: &str = "ETCD_ADVERTISE_CLIENT_URLS";
}

/// Environment handed to etcd. Keys are unique; the last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEnv {
    vars: BTreeMap<String, String>,
}

impl EngineEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge the keys every role needs on top of the role-specific ones.
    ///
    /// None of the fixed keys is ever set by a role, so role-specific
    /// values survive the merge.
    pub fn with_node(mut self, config: &Config) -> Self {
        let peer_urls = config.peer_urls.join(",");
        let client_urls = config.client_urls.join(",");

        self.set(keys::DATA_DIR, config.data_dir.to_string_lossy());
        self.set(keys::NAME, config.name.as_str());
        self.set(keys::LISTEN_PEER_URLS, peer_urls.as_str());
        self.set(keys::INITIAL_ADVERTISE_PEER_URLS, peer_urls);
        self.set(keys::LISTEN_CLIENT_URLS, client_urls.as_str());
        self.set(keys::ADVERTISE_CLIENT_URLS, client_urls);
        self
    }

    /// `KEY=value` strings for `execve`.
    fn to_envp(&self) -> Result<Vec<CString>, std::ffi::NulError> {
        self.iter()
            .map(|(k, v)| CString::new(format!("{k}={v}")))
            .collect()
    }
}

/// Replace the current process with etcd.
///
/// Only returns on failure.
pub fn handoff(config: &Config, decision: Decision) -> BootstrapResult<Infallible> {
    info!(role = %decision.role, path = %config.path.display(), "handing off to etcd");
    let env = decision.env.with_node(config);
    exec(&config.path, &env)
}

fn exec(path: &Path, env: &EngineEnv) -> BootstrapResult<Infallible> {
    let failed = |reason: String| BootstrapError::ExecFailed {
        path: path.to_path_buf(),
        reason,
    };

    for (key, value) in env.iter() {
        info!("{key} = {value}");
    }

    let program = CString::new(path.as_os_str().as_bytes()).map_err(|e| failed(e.to_string()))?;
    let argv = [CString::new(ENGINE_ARGV0).map_err(|e| failed(e.to_string()))?];
    let envp = env.to_envp().map_err(|e| failed(e.to_string()))?;

    nix::unistd::execve(&program, &argv, &envp).map_err(|errno| failed(errno.desc().to_string()))
}
