//! The `ETCD_INITIAL_CLUSTER` listing.

use std::fmt;

use tracing::warn;

use crate::membership::Member;

/// Ordered `name=peerURL` listing of every known member.
///
/// A member advertising several peer URLs contributes one pair per URL,
/// which is how etcd expects multi-URL members to be written.
///
/// Names are unique. Members that were added but never started all
/// report the empty name, so listing each of them separately is not
/// possible. A repeated name is folded into the first entry with that
/// name: its peer URLs are appended there, so every known peer URL is
/// still listed, but the second member loses its own entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialCluster {
    entries: Vec<(String, Vec<String>)>,
}

impl InitialCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a listing from the members reported by the cluster.
    pub fn from_members(members: &[Member]) -> Self {
        let mut cluster = Self::new();
        for member in members {
            cluster.push(&member.name, &member.peer_urls);
        }
        cluster
    }

    /// Append a member. Returns `false` if the name was already listed,
    /// in which case its peer URLs are folded into the existing entry.
    pub fn push(&mut self, name: &str, peer_urls: &[String]) -> bool {
        let Some(index) = self.entries.iter().position(|(n, _)| n == name) else {
            self.entries.push((name.to_string(), peer_urls.to_vec()));
            return true;
        };

        let urls = &mut self.entries[index].1;
        warn!(%name, "duplicate member name in initial cluster, merging peer URLs");
        for url in peer_urls {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        false
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Number of distinct members listed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Member names in listing order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl fmt::Display for InitialCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, urls) in &self.entries {
            for url in urls {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{name}={url}")?;
                first = false;
            }
        }
        Ok(())
    }
}
