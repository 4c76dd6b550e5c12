//! Membership client for the etcd v2 members API.
//!
//! Two operations are needed: list the current members and add this
//! node as a new member. Each is a single attempt bounded by a short
//! deadline; retrying is left to whoever restarts the agent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, BootstrapResult};

/// Deadline for a whole membership operation, across all endpoints.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const MEMBERS_PATH: &str = "/v2/members";

/// A cluster member as reported by the members API.
///
/// Members that were added but have not started yet report an empty
/// `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    pub client_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MemberList {
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Serialize)]
struct AddMemberRequest<'a> {
    #[serde(rename = "peerURLs")]
    peer_urls: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Access to the running cluster's member set.
#[async_trait]
pub trait MembersApi: Send + Sync {
    /// List the current members.
    async fn list_members(&self) -> BootstrapResult<Vec<Member>>;

    /// Add a new voting member advertising `peer_urls`.
    async fn add_member(&self, peer_urls: &[String]) -> BootstrapResult<Member>;
}

/// HTTP implementation of [`MembersApi`].
///
/// Endpoints are tried in the order given. Only a failure to connect
/// moves on to the next endpoint: once a request may have reached a
/// server, its outcome is final, response or not.
#[derive(Debug, Clone)]
pub struct HttpMembersClient {
    endpoints: Vec<String>,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpMembersClient {
    /// Create a client for the given bootstrap endpoints.
    pub fn new(endpoints: Vec<String>) -> BootstrapResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BootstrapError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            endpoints,
            http,
            timeout: REQUEST_TIMEOUT,
        })
    }

    /// Override the operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request to the first endpoint that accepts a connection.
    async fn send<F>(&self, build: F) -> BootstrapResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut last_error = None;

        for endpoint in &self.endpoints {
            let url = format!("{}{MEMBERS_PATH}", endpoint.trim_end_matches('/'));
            match build(&url).send().await {
                Ok(resp) => {
                    debug!(%url, status = %resp.status(), "members API responded");
                    return Ok(resp);
                }
                Err(e) if e.is_connect() => {
                    debug!(%url, error = %e, "endpoint unreachable");
                    last_error = Some(format!("{endpoint}: {e}"));
                }
                Err(e) => {
                    warn!(%url, error = %e, "request failed after connecting");
                    return Err(BootstrapError::ClusterUnreachable(format!("{endpoint}: {e}")));
                }
            }
        }

        Err(BootstrapError::ClusterUnreachable(
            last_error.unwrap_or_else(|| "no endpoints configured".to_string()),
        ))
    }

    async fn deadline<T>(
        &self,
        op: impl Future<Output = BootstrapResult<T>>,
    ) -> BootstrapResult<T> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| BootstrapError::Timeout(self.timeout))?
    }

    async fn fetch_members(&self) -> BootstrapResult<Vec<Member>> {
        let resp = self.send(|url| self.http.get(url)).await?;

        let status = resp.status();
        if !status.is_success() {
            let message = error_message(resp).await;
            return Err(BootstrapError::ClusterUnreachable(format!(
                "listing members returned {status}: {message}"
            )));
        }

        let list: MemberList = resp.json().await.map_err(|e| {
            BootstrapError::ClusterUnreachable(format!("malformed member list: {e}"))
        })?;
        Ok(list.members)
    }

    async fn post_member(&self, peer_urls: &[String]) -> BootstrapResult<Member> {
        let body = AddMemberRequest { peer_urls };
        let resp = self
            .send(|url| self.http.post(url).json(&body))
            .await
            .map_err(|e| match e {
                BootstrapError::ClusterUnreachable(reason) => BootstrapError::AddMemberFailed(reason),
                other => other,
            })?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            let message = error_message(resp).await;
            return Err(BootstrapError::AddMemberFailed(format!("{status}: {message}")));
        }

        resp.json()
            .await
            .map_err(|e| BootstrapError::AddMemberFailed(format!("malformed member: {e}")))
    }
}

#[async_trait]
impl MembersApi for HttpMembersClient {
    async fn list_members(&self) -> BootstrapResult<Vec<Member>> {
        let members = self.deadline(self.fetch_members()).await?;
        debug!(count = members.len(), "listed cluster members");
        Ok(members)
    }

    async fn add_member(&self, peer_urls: &[String]) -> BootstrapResult<Member> {
        let member = self.deadline(self.post_member(peer_urls)).await?;
        info!(id = %member.id, peer_urls = ?member.peer_urls, "member added");
        Ok(member)
    }
}

/// The `message` field of an etcd error body, or the raw body.
async fn error_message(resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => text.trim().to_string(),
    }
}
