//! End-to-end bootstrap scenarios.
//!
//! Runs the decision engine over the real HTTP membership client
//! against an in-process emulation of the etcd v2 members API, then
//! checks the environment that would be handed to etcd.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::{Value, json};

use etcd_bootstrap::handoff::keys;
use etcd_bootstrap::*;

/// Emulated cluster state shared with the HTTP handlers.
#[derive(Default)]
struct Cluster {
    members: Vec<Member>,
    list_requests: usize,
    add_requests: usize,
}

type Shared = Arc<Mutex<Cluster>>;

async fn list(State(cluster): State<Shared>) -> Json<Value> {
    let mut cluster = cluster.lock().unwrap();
    cluster.list_requests += 1;
    Json(json!({ "members": cluster.members }))
}

async fn add(State(cluster): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut cluster = cluster.lock().unwrap();
    cluster.add_requests += 1;

    let peer_urls: Vec<String> = serde_json::from_value(body["peerURLs"].clone()).unwrap();
    if cluster
        .members
        .iter()
        .any(|m| m.peer_urls.iter().any(|u| peer_urls.contains(u)))
    {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": "etcdserver: peerURL exists" })),
        );
    }

    let member = Member {
        id: format!("{:x}", 0x1000 + cluster.members.len()),
        name: String::new(),
        peer_urls,
        client_urls: Vec::new(),
    };
    cluster.members.push(member.clone());
    (StatusCode::CREATED, Json(json!(member)))
}

async fn start_cluster(names: &[&str]) -> (String, Shared) {
    let members = names
        .iter()
        .enumerate()
        .map(|(i, name)| Member {
            id: format!("{:x}", i + 1),
            name: name.to_string(),
            peer_urls: vec![format!("http://10.0.0.{}:2380", i + 1)],
            client_urls: vec![format!("http://10.0.0.{}:2379", i + 1)],
        })
        .collect();
    let shared: Shared = Arc::new(Mutex::new(Cluster {
        members,
        ..Cluster::default()
    }));

    let router = Router::new()
        .route("/v2/members", get(list).post(add))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), shared)
}

fn node_config(data_dir: &Path, peers: &str, members: usize, name: &str) -> Config {
    let options = Options {
        data_dir: data_dir.to_path_buf(),
        path: "/usr/local/bin/etcd".to_string(),
        peers: peers.to_string(),
        members,
        name: name.to_string(),
        ..Options::default()
    };
    let mut resolver = AddressResolver::new(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
    options.build(&mut resolver).unwrap()
}

async fn decide(config: &Config) -> BootstrapResult<Decision> {
    let client = HttpMembersClient::new(config.peers.clone())?;
    Bootstrapper::new(config, &client).decide().await
}

#[tokio::test]
async fn second_node_joins_as_new_member() {
    let (endpoint, cluster) = start_cluster(&["n1"]).await;
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), &endpoint, 3, "n2");

    let decision = decide(&config).await.unwrap();
    assert!(matches!(decision.role, Role::NewMember { .. }));

    let env = decision.env.with_node(&config);
    assert_eq!(env.get(keys::INITIAL_CLUSTER_STATE), Some("existing"));
    assert_eq!(env.get(keys::PROXY), None);
    assert_eq!(
        env.get(keys::INITIAL_CLUSTER),
        Some("n1=http://10.0.0.1:2380,n2=http://10.0.0.9:2380")
    );
    assert_eq!(env.get(keys::NAME), Some("n2"));
    assert_eq!(env.get(keys::LISTEN_PEER_URLS), Some("http://10.0.0.9:2380"));
    assert_eq!(env.get(keys::ADVERTISE_CLIENT_URLS), Some("http://10.0.0.9:2379"));

    let cluster = cluster.lock().unwrap();
    assert_eq!(cluster.add_requests, 1);
    assert_eq!(cluster.members.len(), 2);
    assert_eq!(cluster.members[1].peer_urls, ["http://10.0.0.9:2380"]);
}

#[tokio::test]
async fn full_cluster_yields_proxy() {
    let (endpoint, cluster) = start_cluster(&["n1", "n3", "n4"]).await;
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), &endpoint, 3, "n2");

    let decision = decide(&config).await.unwrap();
    assert_eq!(decision.role, Role::Proxy { members: 3 });

    let env = decision.env.with_node(&config);
    assert_eq!(env.get(keys::PROXY), Some("on"));
    assert_eq!(env.get(keys::INITIAL_CLUSTER_STATE), None);
    assert!(
        env.get(keys::INITIAL_CLUSTER)
            .unwrap()
            .ends_with("n2=http://10.0.0.9:2380")
    );
    assert_eq!(cluster.lock().unwrap().add_requests, 0);
}

#[tokio::test]
async fn member_marker_skips_network() {
    let (endpoint, cluster) = start_cluster(&["n1"]).await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("member")).unwrap();
    let config = node_config(dir.path(), &endpoint, 3, "n2");

    let decision = decide(&config).await.unwrap();
    assert!(matches!(decision.role, Role::Restart { .. }));

    let cluster = cluster.lock().unwrap();
    assert_eq!(cluster.list_requests, 0);
    assert_eq!(cluster.add_requests, 0);
}

#[tokio::test]
async fn restart_after_lost_marker_rejoins() {
    let (endpoint, cluster) = start_cluster(&["n1", "n2"]).await;
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), &endpoint, 3, "n2.example.com");

    let decision = decide(&config).await.unwrap();
    assert_eq!(decision.role, Role::Rejoin);
    assert_eq!(cluster.lock().unwrap().add_requests, 0);
}

#[tokio::test]
async fn duplicate_peer_url_is_rejected() {
    let (endpoint, _cluster) = start_cluster(&["n1"]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config(dir.path(), &endpoint, 3, "n2");
    config.peer_urls = vec!["http://10.0.0.1:2380".to_string()];

    let err = decide(&config).await.unwrap_err();
    match err {
        BootstrapError::AddMemberFailed(reason) => assert!(reason.contains("peerURL exists")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn rolling_join_fills_then_proxies() {
    let (endpoint, cluster) = start_cluster(&["n1"]).await;
    let mut roles = Vec::new();

    for name in ["n2", "n3", "n4"] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = node_config(dir.path(), &endpoint, 3, name);
        let octet = name[1..].parse::<u8>().unwrap() + 100;
        config.peer_urls = vec![format!("http://10.0.0.{octet}:2380")];

        let decision = decide(&config).await.unwrap();
        roles.push(decision.role.to_string());
    }

    assert_eq!(roles, ["new-member", "new-member", "proxy"]);
    assert_eq!(cluster.lock().unwrap().members.len(), 3);
}

#[tokio::test]
async fn no_peers_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path(), "", 3, "n2");

    let err = decide(&config).await.unwrap_err();
    assert!(matches!(err, BootstrapError::MissingPeers));
}

#[tokio::test]
async fn discovery_token_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config(dir.path(), "", 3, "n2");
    config.discovery = Some("https://discovery.etcd.io/3e86b59982e49066c5d813af1c2e2579".to_string());

    let decision = decide(&config).await.unwrap();
    assert_eq!(decision.role, Role::Discovery);

    let env = decision.env.with_node(&config);
    assert_eq!(
        env.get(keys::DISCOVERY),
        Some("https://discovery.etcd.io/3e86b59982e49066c5d813af1c2e2579")
    );
    assert_eq!(env.get(keys::INITIAL_CLUSTER), None);
}
