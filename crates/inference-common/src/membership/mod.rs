//! Network membership snapshot
//!
//! The sidecar writes a full snapshot of registered nodes; consumers read it
//! through a [`MembershipCache`] and never patch it in place.

mod cache;
mod client;

pub use cache::{MembershipCache, MembershipError, MembershipSource};
pub use client::{SidecarClient, SidecarStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

/// Reachable endpoint of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

impl NodeAddress {
    /// `scheme://host:port`, bracketing IPv6 hosts
    pub fn url(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("{}://[{}]:{}", self.scheme, v6, self.port),
            _ => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

/// One registered participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub uid: u16,
    pub identity: String,
    pub address: NodeAddress,
    pub stake_alpha: f64,
    pub stake_tao: f64,
    pub stake_total: f64,
    pub trust: f64,
    pub last_updated: DateTime<Utc>,
}

/// Wire form of a snapshot, as served by `GET /api/nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<MemberRecord>,
}

/// Immutable set of members with an identity index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "NodesResponse", into = "NodesResponse")]
pub struct MembershipSnapshot {
    nodes: Vec<MemberRecord>,
    by_identity: HashMap<String, usize>,
}

impl From<NodesResponse> for MembershipSnapshot {
    fn from(payload: NodesResponse) -> Self {
        Self::new(payload.nodes)
    }
}

impl From<MembershipSnapshot> for NodesResponse {
    fn from(snapshot: MembershipSnapshot) -> Self {
        Self {
            nodes: snapshot.nodes,
        }
    }
}

impl MembershipSnapshot {
    /// Build the snapshot; for duplicate identities the first record wins
    pub fn new(nodes: Vec<MemberRecord>) -> Self {
        let mut by_identity = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            by_identity.entry(node.identity.clone()).or_insert(position);
        }
        Self { nodes, by_identity }
    }

    pub fn nodes(&self) -> &[MemberRecord] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&MemberRecord> {
        self.by_identity
            .get(identity)
            .and_then(|position| self.nodes.get(*position))
    }

    pub fn uid(&self, identity: &str) -> Option<u16> {
        self.get(identity).map(|node| node.uid)
    }

    pub fn address_url(&self, identity: &str) -> Option<String> {
        self.get(identity).map(|node| node.address.url())
    }

    /// Identities in snapshot order
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.identity.as_str())
    }
}

/// Fixed, replaceable membership for local networks and tests
#[derive(Debug, Default)]
pub struct StaticMembership {
    snapshot: RwLock<MembershipSnapshot>,
}

impl StaticMembership {
    pub fn new(nodes: Vec<MemberRecord>) -> Self {
        Self {
            snapshot: RwLock::new(MembershipSnapshot::new(nodes)),
        }
    }

    pub fn replace(&self, nodes: Vec<MemberRecord>) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = MembershipSnapshot::new(nodes);
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn fetch_snapshot(&self) -> Result<MembershipSnapshot, MembershipError> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn member(uid: u16, identity: &str, stake: f64) -> MemberRecord {
        MemberRecord {
            uid,
            identity: identity.to_string(),
            address: NodeAddress {
                host: "127.0.0.1".to_string(),
                port: 8000 + uid,
                scheme: "http".to_string(),
            },
            stake_alpha: stake,
            stake_tao: 0.0,
            stake_total: stake,
            trust: 0.0,
            last_updated: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::member;
    use super::*;

    #[test]
    fn test_lookup_by_identity() {
        let snapshot = MembershipSnapshot::new(vec![member(0, "a", 1.0), member(1, "b", 2.0)]);
        assert_eq!(snapshot.uid("b"), Some(1));
        assert_eq!(
            snapshot.address_url("a").as_deref(),
            Some("http://127.0.0.1:8000")
        );
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn test_first_duplicate_wins() {
        let snapshot = MembershipSnapshot::new(vec![member(3, "a", 1.0), member(9, "a", 2.0)]);
        assert_eq!(snapshot.uid("a"), Some(3));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_ipv6_address_is_bracketed() {
        let address = NodeAddress {
            host: "::1".to_string(),
            port: 9000,
            scheme: "https".to_string(),
        };
        assert_eq!(address.url(), "https://[::1]:9000");
    }

    #[test]
    fn test_wire_shape() {
        let snapshot = MembershipSnapshot::new(vec![member(0, "a", 1.5)]);
        let json = serde_json::to_value(&snapshot).unwrap();
        let node = &json["nodes"][0];
        assert_eq!(node["identity"], "a");
        assert_eq!(node["stakeTotal"], 1.5);
        assert_eq!(node["address"]["port"], 8000);

        let back: MembershipSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.uid("a"), Some(0));
    }
}
