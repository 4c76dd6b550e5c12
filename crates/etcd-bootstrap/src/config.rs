//! Agent configuration.
//!
//! [`Options`] is the raw operator input; [`Config`] is what the
//! decision engine works from, with the node name, engine path and
//! advertised URLs resolved.

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::address::{AddressResolver, InterfaceAddrs};
use crate::error::{BootstrapError, BootstrapResult};

pub const DEFAULT_DATA_DIR: &str = "/var/lib/etcd";
pub const DEFAULT_MEMBERS: usize = 5;
pub const DEFAULT_CLIENT_PORT: u16 = 2379;
pub const DEFAULT_PEER_PORT: u16 = 2380;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Name of the engine binary looked up on `PATH`.
pub const ENGINE_BINARY: &str = "etcd";

/// Operator-supplied options. Empty strings mean "not set".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub data_dir: PathBuf,
    pub path: String,
    pub discovery: String,
    /// Comma-separated bootstrap endpoints.
    pub peers: String,
    pub members: usize,
    pub name: String,
    pub listen_peer_urls: String,
    pub listen_client_urls: String,
    pub client_port: u16,
    pub peer_port: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            path: String::new(),
            discovery: String::new(),
            peers: String::new(),
            members: DEFAULT_MEMBERS,
            name: String::new(),
            listen_peer_urls: String::new(),
            listen_client_urls: String::new(),
            client_port: DEFAULT_CLIENT_PORT,
            peer_port: DEFAULT_PEER_PORT,
        }
    }
}

/// Resolved configuration, built once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Path to the etcd binary.
    pub path: PathBuf,
    pub discovery: Option<String>,
    pub peers: Vec<String>,
    /// Member count at or above which new nodes start as proxies.
    pub desired_members: usize,
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
}

impl Options {
    /// Resolve against the host: hostname, `PATH` and interfaces.
    pub fn build<S: InterfaceAddrs>(
        self,
        resolver: &mut AddressResolver<S>,
    ) -> BootstrapResult<Config> {
        let hostname = || -> BootstrapResult<String> {
            nix::unistd::gethostname()
                .map_err(|e| BootstrapError::Config(format!("failed to read hostname: {e}")))?
                .into_string()
                .map_err(|_| BootstrapError::Config("hostname is not valid UTF-8".to_string()))
        };
        let path_var = std::env::var_os("PATH");
        self.build_with(resolver, hostname, path_var.as_deref())
    }

    fn build_with<S, H>(
        self,
        resolver: &mut AddressResolver<S>,
        hostname: H,
        path_var: Option<&OsStr>,
    ) -> BootstrapResult<Config>
    where
        S: InterfaceAddrs,
        H: FnOnce() -> BootstrapResult<String>,
    {
        if self.members == 0 {
            return Err(BootstrapError::Config(
                "desired member count must be at least 1".to_string(),
            ));
        }

        let name = resolve_name(&self.name, hostname)?;

        let path = if self.path.is_empty() {
            find_executable(ENGINE_BINARY, path_var).ok_or_else(|| {
                BootstrapError::Config(format!("{ENGINE_BINARY} not found in PATH"))
            })?
        } else {
            PathBuf::from(&self.path)
        };

        let client_urls = resolver.derive_urls(&self.listen_client_urls, self.client_port)?;
        let peer_urls = resolver.derive_urls(&self.listen_peer_urls, self.peer_port)?;

        let config = Config {
            data_dir: self.data_dir,
            path,
            discovery: Some(self.discovery).filter(|d| !d.is_empty()),
            peers: split_list(&self.peers),
            desired_members: self.members,
            name,
            peer_urls,
            client_urls,
        };
        debug!(?config, "configuration resolved");
        Ok(config)
    }
}

/// Explicit name or hostname, truncated at the first `.`.
fn resolve_name<H>(explicit: &str, hostname: H) -> BootstrapResult<String>
where
    H: FnOnce() -> BootstrapResult<String>,
{
    let full = if explicit.is_empty() {
        hostname()?
    } else {
        explicit.to_string()
    };

    let short = full.split('.').next().unwrap_or_default();
    if short.is_empty() {
        return Err(BootstrapError::Config(format!(
            "cannot derive a node name from {full:?}"
        )));
    }
    Ok(short.to_string())
}

/// Comma-separated list with blanks dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// First executable regular file called `name` in the `PATH` entries.
fn find_executable(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    std::env::split_paths(path_var?)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
