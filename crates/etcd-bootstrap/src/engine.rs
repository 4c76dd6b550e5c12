//! Bootstrap decision engine.
//!
//! Evaluates the startup checks in a fixed order and stops at the first
//! one that matches. The outcome is a [`Decision`]: the role etcd will
//! start in plus the role-specific part of its environment.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{BootstrapError, BootstrapResult};
use crate::handoff::{EngineEnv, keys};
use crate::initial_cluster::InitialCluster;
use crate::local_state;
use crate::membership::MembersApi;

/// How etcd will be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A discovery token is set; etcd bootstraps itself through it.
    Discovery,
    /// The data directory already holds a member or proxy marker.
    Restart { marker: PathBuf },
    /// The cluster already lists this node's name.
    Rejoin,
    /// The cluster is at capacity; start as a non-voting proxy.
    Proxy { members: usize },
    /// This node was added to the cluster as a new voting member.
    NewMember { id: String },
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Discovery => f.write_str("discovery"),
            Role::Restart { .. } => f.write_str("restart"),
            Role::Rejoin => f.write_str("rejoin"),
            Role::Proxy { .. } => f.write_str("proxy"),
            Role::NewMember { .. } => f.write_str("new-member"),
        }
    }
}

/// Terminal outcome of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub role: Role,
    /// Role-specific environment; node keys are merged at handoff.
    pub env: EngineEnv,
}

impl Decision {
    fn new(role: Role, env: EngineEnv) -> Self {
        Self { role, env }
    }
}

/// Decides how this node joins the cluster.
pub struct Bootstrapper<'a, M: ?Sized> {
    config: &'a Config,
    members: &'a M,
}

impl<'a, M: MembersApi + ?Sized> Bootstrapper<'a, M> {
    pub fn new(config: &'a Config, members: &'a M) -> Self {
        Self { config, members }
    }

    /// Run the checks and pick exactly one role.
    ///
    /// Order: discovery token, on-disk role marker, peers present,
    /// member list, name already listed, capacity, add member.
    pub async fn decide(&self) -> BootstrapResult<Decision> {
        let config = self.config;
        let mut env = EngineEnv::new();

        if let Some(discovery) = &config.discovery {
            info!(%discovery, "starting etcd as ETCD_DISCOVERY is set");
            env.set(keys::DISCOVERY, discovery.as_str());
            return Ok(Decision::new(Role::Discovery, env));
        }

        if let Some(marker) = local_state::prior_role(&config.data_dir)? {
            info!(path = %marker.display(), "starting etcd as role marker exists");
            return Ok(Decision::new(Role::Restart { marker }, env));
        }

        if config.peers.is_empty() {
            return Err(BootstrapError::MissingPeers);
        }

        let members = self.members.list_members().await?;
        debug!(count = members.len(), peers = ?config.peers, "fetched cluster members");

        if members.iter().any(|m| m.name == config.name) {
            info!(
                name = %config.name,
                members = members.len(),
                "starting etcd as node is already a member"
            );
            return Ok(Decision::new(Role::Rejoin, env));
        }

        // Proxies need the full peer set too, so this is set before the
        // capacity check.
        let mut cluster = InitialCluster::from_members(&members);
        cluster.push(&config.name, &config.peer_urls);
        env.set(keys::INITIAL_CLUSTER, cluster.to_string());

        if members.len() >= config.desired_members {
            info!(
                name = %config.name,
                members = members.len(),
                desired = config.desired_members,
                "starting etcd in proxy mode as the cluster is full"
            );
            env.set(keys::PROXY, "on");
            return Ok(Decision::new(
                Role::Proxy {
                    members: members.len(),
                },
                env,
            ));
        }

        let added = self.members.add_member(&config.peer_urls).await?;
        info!(
            name = %config.name,
            id = %added.id,
            members = members.len() + 1,
            "joined cluster as a new member"
        );
        env.set(keys::INITIAL_CLUSTER_STATE, "existing");

        Ok(Decision::new(Role::NewMember { id: added.id }, env))
    }
}
