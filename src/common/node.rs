//! Struct and implementation of the Node entry in the Kademlia routing table
use std::{
    fmt::{self, Debug, Formatter},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::Id;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A peer record: how to reach a node, and who it claims to be.
pub struct Node {
    id: Id,
    #[serde(with = "address")]
    address: SocketAddr,
    #[serde(default)]
    public_key: Bytes,
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> Node {
        Node {
            id,
            address,
            public_key: Bytes::new(),
        }
    }

    /// Creates a Node whose id is derived from its public key.
    pub fn from_public_key(public_key: &[u8], address: SocketAddr) -> Node {
        Node {
            id: Id::from_public_key(public_key),
            address,
            public_key: Bytes::copy_from_slice(public_key),
        }
    }

    /// Attach a public key without changing the id.
    pub fn with_public_key(mut self, public_key: Bytes) -> Node {
        self.public_key = public_key;
        self
    }

    /// Creates a node with random Id on a random loopback port, for testing.
    pub fn random() -> Node {
        Node::new(
            Id::random(),
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, rand::random())),
        )
    }

    #[cfg(test)]
    pub(crate) fn unique(i: usize) -> Node {
        let mut bytes = [0u8; 20];
        bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());

        Node::new(
            Id::from(bytes),
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, i as u16)),
        )
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn public_key(&self) -> &Bytes {
        &self.public_key
    }

    // === Public Methods ===

    /// Sort key of this node relative to `target`.
    pub fn distance_key(&self, target: &Id) -> DistanceKey {
        DistanceKey {
            distance: self.id.distance(target),
            address: self.address.to_string(),
        }
    }
}

/// Orders nodes by XOR distance to a target, then by their address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistanceKey {
    distance: Id,
    address: String,
}

impl DistanceKey {
    pub fn distance(&self) -> &Id {
        &self.distance
    }
}

/// Socket addresses travel as strings, and are parsed back from whatever
/// string-like form the deserializer produces.
mod address {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(address: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(address)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SocketAddr, D::Error> {
        let string = String::deserialize(deserializer)?;

        string.parse().map_err(D::Error::custom)
    }
}
