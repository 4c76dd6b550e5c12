//! etcd-bootstrapd — starts etcd with the right cluster role.
//!
//! Reads its options from `ETCD_*` environment variables (or flags),
//! decides whether this node restarts, rejoins, joins as a new member
//! or runs as a proxy, then execs etcd with the assembled environment.
//!
//! # Usage
//!
//! ```text
//! ETCD_PEERS=http://10.0.0.1:2379 ETCD_MEMBERS=3 etcd-bootstrapd
//! ```

use std::convert::Infallible;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use etcd_bootstrap::config::{
    DEFAULT_CLIENT_PORT, DEFAULT_DATA_DIR, DEFAULT_LOG_LEVEL, DEFAULT_MEMBERS, DEFAULT_PEER_PORT,
};
use etcd_bootstrap::{AddressResolver, Bootstrapper, HttpMembersClient, Options};

#[derive(Parser, Debug)]
#[command(name = "etcd-bootstrapd", about = "Bootstrap agent that starts etcd")]
struct Cli {
    /// etcd data directory.
    #[arg(long, env = "ETCD_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Agent log level (trace, debug, info, warn, error).
    #[arg(long, env = "ETCD_LOGLEVEL", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// Path to the etcd binary; looked up on PATH when empty.
    #[arg(long, env = "ETCD_PATH", default_value = "")]
    path: String,

    /// Discovery URL; bypasses all peer logic when set.
    #[arg(long, env = "ETCD_DISCOVERY", default_value = "")]
    discovery: String,

    /// Comma-separated client endpoints of the existing cluster.
    #[arg(long, env = "ETCD_PEERS", default_value = "")]
    peers: String,

    /// Desired number of voting members; further nodes become proxies.
    #[arg(long, env = "ETCD_MEMBERS", default_value_t = DEFAULT_MEMBERS)]
    members: usize,

    /// Node name; defaults to the short hostname.
    #[arg(long, env = "ETCD_NAME", default_value = "")]
    name: String,

    /// Comma-separated peer URLs; derived from local addresses when empty.
    #[arg(long, env = "ETCD_LISTEN_PEER_URLS", default_value = "")]
    listen_peer_urls: String,

    /// Comma-separated client URLs; derived from local addresses when empty.
    #[arg(long, env = "ETCD_LISTEN_CLIENT_URLS", default_value = "")]
    listen_client_urls: String,

    /// Port used for derived client URLs.
    #[arg(long, env = "ETCD_CLIENT_PORT", default_value_t = DEFAULT_CLIENT_PORT)]
    client_port: u16,

    /// Port used for derived peer URLs.
    #[arg(long, env = "ETCD_PEER_PORT", default_value_t = DEFAULT_PEER_PORT)]
    peer_port: u16,
}

impl Cli {
    fn options(self) -> Options {
        Options {
            data_dir: self.data_dir,
            path: self.path,
            discovery: self.discovery,
            peers: self.peers,
            members: self.members,
            name: self.name,
            listen_peer_urls: self.listen_peer_urls,
            listen_client_urls: self.listen_client_urls,
            client_port: self.client_port,
            peer_port: self.peer_port,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match parse_level(&cli.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("failed to set log level: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into())),
        )
        .init();

    let Err(e) = run(cli.options()).await;
    error!(error = %format!("{e:#}"), "bootstrap failed");
    ExitCode::FAILURE
}

/// Decide the role and exec etcd. Only returns on failure.
async fn run(options: Options) -> anyhow::Result<Infallible> {
    let config = options
        .build(&mut AddressResolver::system())
        .context("failed to build configuration")?;

    let client = HttpMembersClient::new(config.peers.clone())?;
    let decision = Bootstrapper::new(&config, &client).decide().await?;

    Ok(etcd_bootstrap::handoff(&config, decision)?)
}

/// Map a log level name to a filter, accepting logrus-style aliases.
fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
    let filter = match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "fatal" | "panic" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        other => anyhow::bail!("not a valid log level: {other:?}"),
    };
    Ok(filter)
}
