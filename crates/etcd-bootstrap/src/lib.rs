//! etcd-bootstrap — decides how a node joins an etcd cluster.
//!
//! Inspects local and remote state, picks exactly one startup role,
//! assembles the environment etcd expects, and replaces the current
//! process with etcd.
//!
//! # Architecture
//!
//! ```text
//! Options ──► Config (name, engine path, advertised URLs)
//!               │        └── AddressResolver (local IPv4 addresses)
//!               ▼
//! Bootstrapper::decide()
//!   ├── 1. discovery token set      → Role::Discovery
//!   ├── 2. member/ or proxy/ exists → Role::Restart
//!   ├── 3. no peers                 → BootstrapError::MissingPeers
//!   ├── 4. MembersApi::list_members()
//!   ├── 5. name already listed      → Role::Rejoin
//!   ├── 6. ETCD_INITIAL_CLUSTER
//!   ├── 7. members >= desired       → Role::Proxy
//!   └── 8. MembersApi::add_member() → Role::NewMember
//!               │
//!               ▼
//! handoff() ── execve(etcd) ── never returns
//! ```

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod initial_cluster;
pub mod local_state;
pub mod membership;

pub use address::{AddressResolver, InterfaceAddrs, SystemInterfaces};
pub use config::{Config, Options};
pub use engine::{Bootstrapper, Decision, Role};
pub use error::{BootstrapError, BootstrapResult};
pub use handoff::{EngineEnv, handoff};
pub use initial_cluster::InitialCluster;
pub use membership::{HttpMembersClient, Member, MembersApi};
