//! Handling of incoming requests against the routing table and the local store.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::common::{Id, Node, RequestSpecific, ResponseSpecific, RoutingTable, MAX_BUCKET_SIZE_K};
use crate::core::store::{Store, MAX_VALUES};
use crate::validator::{AcceptAll, StorableValidator};

/// Default lifetime of a stored value at the depth of the local bucket.
pub const DEFAULT_DATA_TTL: Duration = Duration::from_secs(25 * 60 * 60);

#[derive(Debug)]
/// Settings for the request handling [Server].
pub struct ServerSettings {
    /// Maximum number of values to store.
    ///
    /// Defaults to [MAX_VALUES]
    pub max_values: usize,
    /// Base lifetime of stored values, see [Server::ttl_for].
    ///
    /// Defaults to [DEFAULT_DATA_TTL]
    pub data_ttl: Duration,
    /// Validates values before they are stored.
    ///
    /// Defaults to [AcceptAll]
    pub validator: Box<dyn StorableValidator>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_values: MAX_VALUES,
            data_ttl: DEFAULT_DATA_TTL,
            validator: Box::new(AcceptAll),
        }
    }
}

#[derive(Debug)]
/// A server that answers PING, STORE, FIND_NODE and FIND_VALUE requests.
pub struct Server {
    store: Store,
    data_ttl: Duration,
    validator: Box<dyn StorableValidator>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerSettings::default())
    }
}

impl Server {
    /// Creates a new [Server]
    pub fn new(settings: ServerSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.max_values).unwrap_or(NonZeroUsize::MIN);

        Self {
            store: Store::new(capacity),
            data_ttl: settings.data_ttl,
            validator: settings.validator,
        }
    }

    // === Getters ===

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    // === Public Methods ===

    /// Returns the response to a request from `from`.
    pub fn handle_request(
        &mut self,
        routing_table: &RoutingTable,
        from: &Node,
        request: RequestSpecific,
    ) -> ResponseSpecific {
        self.handle_request_at(Instant::now(), routing_table, from, request)
    }

    pub fn handle_request_at(
        &mut self,
        now: Instant,
        routing_table: &RoutingTable,
        from: &Node,
        request: RequestSpecific,
    ) -> ResponseSpecific {
        match request {
            RequestSpecific::Ping => ResponseSpecific::Pong,
            RequestSpecific::Store { key, value } => {
                match value {
                    Some(value) => {
                        if self.is_valid_storable(&value) {
                            let ttl = self.ttl_for(routing_table, &key);
                            self.store.put_at(key, value, ttl, now);
                        } else {
                            debug!(?key, ?from, "Refused to store an invalid value");
                        }
                    }
                    None => {
                        self.store.remove(&key);
                    }
                }

                ResponseSpecific::Stored
            }
            RequestSpecific::FindNode { target } => {
                ResponseSpecific::Nodes(routing_table.closest(&target, MAX_BUCKET_SIZE_K, true, false))
            }
            RequestSpecific::FindValue { target } => match self.store.get_at(&target, now) {
                Some(value) => ResponseSpecific::Value(value),
                None => ResponseSpecific::Nodes(routing_table.closest(
                    &target,
                    MAX_BUCKET_SIZE_K,
                    true,
                    false,
                )),
            },
        }
    }

    pub fn is_valid_storable(&self, value: &Bytes) -> bool {
        self.validator.is_valid_storable(value)
    }

    /// Lifetime of a value stored under `key`.
    ///
    /// The base lifetime is halved for every level of trie depth separating the
    /// bucket of the local id from the bucket of the key, so values far from
    /// this node fade out sooner.
    pub fn ttl_for(&self, routing_table: &RoutingTable, key: &Id) -> Duration {
        let local_depth = routing_table.depth_of(routing_table.id());
        let key_depth = routing_table.depth_of(key);

        scaled_ttl(self.data_ttl, local_depth.abs_diff(key_depth))
    }
}

fn scaled_ttl(base: Duration, halvings: usize) -> Duration {
    if halvings >= 32 {
        return Duration::ZERO;
    }

    base / (1u32 << halvings)
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::str::FromStr;

    use super::*;

    fn node_with_first_byte(first: u8, unique: u8) -> Node {
        let mut bytes = [0u8; 20];
        bytes[0] = first;
        bytes[19] = unique;

        Node::new(
            Id::from(bytes),
            SocketAddr::from(([127, 0, 0, 1], u16::from(first) << 8 | u16::from(unique))),
        )
    }

    #[test]
    fn ping() {
        let mut server = Server::default();
        let table = RoutingTable::new(Id::random());

        let response = server.handle_request(&table, &Node::random(), RequestSpecific::Ping);

        assert_eq!(response, ResponseSpecific::Pong);
    }

    #[test]
    fn store_then_find_value() {
        let mut server = Server::default();
        let table = RoutingTable::new(Id::random());
        let key = Id::random();
        let from = Node::random();

        let response = server.handle_request(
            &table,
            &from,
            RequestSpecific::Store {
                key,
                value: Some(Bytes::from_static(b"v")),
            },
        );
        assert_eq!(response, ResponseSpecific::Stored);

        let response =
            server.handle_request(&table, &from, RequestSpecific::FindValue { target: key });
        assert_eq!(response, ResponseSpecific::Value(Bytes::from_static(b"v")));
    }

    #[test]
    fn store_none_deletes() {
        let mut server = Server::default();
        let table = RoutingTable::new(Id::random());
        let key = Id::random();
        let from = Node::random();

        server.store_mut().put(key, Bytes::from_static(b"v"), DEFAULT_DATA_TTL);

        let response =
            server.handle_request(&table, &from, RequestSpecific::Store { key, value: None });

        assert_eq!(response, ResponseSpecific::Stored);
        assert!(server.store().is_empty());
    }

    #[test]
    fn invalid_value_is_refused() {
        let mut server = Server::new(ServerSettings {
            validator: Box::new(|value: &[u8]| value == b"good"),
            ..Default::default()
        });
        let table = RoutingTable::new(Id::random());
        let key = Id::random();

        let response = server.handle_request(
            &table,
            &Node::random(),
            RequestSpecific::Store {
                key,
                value: Some(Bytes::from_static(b"bad")),
            },
        );

        assert_eq!(response, ResponseSpecific::Stored);
        assert!(server.store().is_empty());
    }

    #[test]
    fn find_value_falls_back_to_nodes() {
        let mut server = Server::default();
        let mut table = RoutingTable::new(Id::random());
        let node = Node::random();
        table.add(node.clone());

        let response = server.handle_request(
            &table,
            &Node::random(),
            RequestSpecific::FindValue { target: Id::random() },
        );

        assert_eq!(response, ResponseSpecific::Nodes(vec![node]));
    }

    #[test]
    fn find_value_purges_expired() {
        let mut server = Server::default();
        let table = RoutingTable::new(Id::random());
        let key = Id::random();
        let now = Instant::now();

        server
            .store_mut()
            .put_at(key, Bytes::from_static(b"v"), Duration::from_secs(1), now);

        let response = server.handle_request_at(
            now + Duration::from_secs(2),
            &table,
            &Node::random(),
            RequestSpecific::FindValue { target: key },
        );

        assert_eq!(response, ResponseSpecific::Nodes(vec![]));
        assert!(server.store().is_empty());
    }

    #[test]
    fn find_node_returns_closest() {
        let mut server = Server::default();
        let mut table = RoutingTable::new(Id::ZERO);

        let nodes: Vec<_> = (0..5).map(|i| node_with_first_byte(0x80 + i, i)).collect();
        for node in &nodes {
            table.add(node.clone());
        }

        let target = Id::from_str("8300000000000000000000000000000000000000").unwrap();
        let response =
            server.handle_request(&table, &Node::random(), RequestSpecific::FindNode { target });

        let ResponseSpecific::Nodes(closest) = response else {
            panic!("expected nodes");
        };
        assert_eq!(closest[0], nodes[3]);
        assert_eq!(closest.len(), 5);
    }

    #[test]
    fn ttl_halves_with_depth_difference() {
        let server = Server::default();
        let mut table = RoutingTable::new(Id::ZERO);

        assert_eq!(server.ttl_for(&table, &Id::MAX), DEFAULT_DATA_TTL);

        // Split twice along the local id: buckets "1", "01", "00".
        for i in 0..10 {
            table.add(node_with_first_byte(0x80 + i, i));
            table.add(node_with_first_byte(0x40 + i, i));
        }
        for i in 0..11 {
            table.add(node_with_first_byte(0x10 + i, i));
        }

        assert_eq!(table.depth_of(&Id::ZERO), 2);
        assert_eq!(table.depth_of(&Id::MAX), 1);

        assert_eq!(server.ttl_for(&table, &Id::ZERO), DEFAULT_DATA_TTL);
        assert_eq!(server.ttl_for(&table, &Id::MAX), DEFAULT_DATA_TTL / 2);
    }

    #[test]
    fn scaled_ttl_bottoms_out() {
        assert_eq!(scaled_ttl(Duration::from_secs(8), 3), Duration::from_secs(1));
        assert_eq!(scaled_ttl(Duration::from_secs(8), 40), Duration::ZERO);
    }

    #[test]
    fn find_node_includes_locked_peers() {
        let mut server = Server::default();
        let mut table = RoutingTable::new(Id::ZERO);

        let busy = node_with_first_byte(0x80, 1);
        let stale = node_with_first_byte(0x80, 2);
        table.add(busy.clone());
        table.add(stale.clone());

        table.lock(busy.id());
        table.mark_stale(stale.id());

        let response = server.handle_request(
            &table,
            &Node::random(),
            RequestSpecific::FindNode { target: Id::MAX },
        );

        assert_eq!(response, ResponseSpecific::Nodes(vec![busy]));
    }
}
