//! Actor implementation - I/O orchestration layer for the DHT.

pub(crate) mod config;
mod handle_request;
mod handle_response;
mod info;
pub(crate) mod socket;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::Sender;
use tracing::{debug, error, info};

use crate::common::{
    AddOutcome, Id, Node, RequestSpecific, RoutingTable, Rpc, MAX_BUCKET_SIZE_K,
};
use crate::core::iterative_query::{IterativeQuery, QueryOutcome, ALPHA};
use crate::core::put_query::PutQuery;
use crate::core::routing_maintenance::RoutingMaintenance;
use crate::core::server::Server;
use crate::transport::Transport;

use socket::RpcSocket;

pub use config::Config;
pub use info::Info;
pub use socket::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_STORE_TIMEOUT};

/// What to do with the outcome of an [IterativeQuery].
#[derive(Debug)]
enum QueryPurpose {
    /// Self lookup after a bootstrap node answered.
    Bootstrap(Option<Sender<bool>>),
    Refresh,
    FindNode(Option<Sender<Vec<Node>>>),
    Get(Option<Sender<Option<Bytes>>>),
    /// Store at the closest nodes found. Replication does not rewrite the
    /// local record, so `store_locally` is false for it.
    Put {
        value: Bytes,
        store_locally: bool,
        sender: Option<Sender<usize>>,
    },
}

#[derive(Debug)]
struct PendingQuery {
    query: IterativeQuery,
    purpose: QueryPurpose,
}

#[derive(Debug)]
struct PendingPut {
    query: PutQuery,
    sender: Option<Sender<usize>>,
}

#[derive(Debug)]
/// Internal Actor called in the Dht thread loop, useful to create your own actor setup.
pub struct Actor {
    socket: RpcSocket,

    // Routing
    /// Closest nodes to this node
    routing_table: RoutingTable,
    /// Refresh and replication timing
    maintenance: RoutingMaintenance,

    /// Request handling and the local store
    server: Server,

    iterative_queries: Vec<PendingQuery>,
    put_queries: Vec<PendingPut>,
    /// PINGs to bootstrap nodes, by transaction id.
    bootstrap_pings: HashMap<u32, Option<Sender<bool>>>,

    /// Values put through [Actor::publish]. Republishing them is up to the application.
    published: HashMap<Id, Bytes>,

    request_timeout: Duration,
    store_timeout: Duration,
}

impl Actor {
    /// Creates a new Actor on top of a bound transport. Does not perform
    /// network I/O; call [Actor::tick] to make progress.
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Self {
        let public_key = config
            .signing_key
            .as_ref()
            .map(|key| Bytes::copy_from_slice(key.verifying_key().as_bytes()))
            .unwrap_or_default();

        let id = config
            .id
            .or_else(|| {
                config
                    .signing_key
                    .as_ref()
                    .map(|key| Id::from_public_key(key.verifying_key().as_bytes()))
            })
            .unwrap_or_else(Id::random);

        let local = Node::new(id, transport.local_addr()).with_public_key(public_key);

        info!(?id, address = ?local.address(), "Kademlia node listening");

        Actor {
            socket: RpcSocket::new(transport, local),

            routing_table: RoutingTable::new(id),
            maintenance: RoutingMaintenance::new(config.refresh_interval, config.replicate_interval),

            server: Server::new(config.server_settings),

            iterative_queries: Vec::new(),
            put_queries: Vec::new(),
            bootstrap_pings: HashMap::new(),

            published: HashMap::new(),

            request_timeout: config.request_timeout,
            store_timeout: config.store_timeout,
        }
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.routing_table.id()
    }

    /// Returns this node's own peer record.
    pub fn local_node(&self) -> &Node {
        self.socket.local()
    }

    /// Returns the address the transport is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.routing_table
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    pub fn published(&self) -> &HashMap<Id, Bytes> {
        &self.published
    }

    /// Returns `true` once a bootstrap succeeded, until shutdown.
    pub fn is_bootstrapped(&self) -> bool {
        self.maintenance.is_running()
    }

    /// Returns a thread safe and lightweight summary of this node's
    /// information and statistics.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Public Methods ===

    /// Advances timeouts, in-flight queries, maintenance, and handles at most
    /// one incoming message.
    ///
    /// Call in a loop; delays degrade query completion and routing table quality.
    pub fn tick(&mut self) {
        self.handle_timeouts();

        self.tick_iterative_queries();
        self.tick_put_queries();

        self.periodic_node_maintenance();

        self.handle_message();
    }

    /// Join the network through a known node.
    ///
    /// The node is pinged first. If it answers, a lookup of our own id fills
    /// the routing table, and `true` is sent once it is done. A timeout sends
    /// `false` and leaves no state behind.
    pub fn bootstrap(&mut self, node: &Node, sender: Option<Sender<bool>>) {
        debug!(bootstrap = ?node.address(), "Pinging bootstrap node");

        let tid = self.request(node, RequestSpecific::Ping, self.request_timeout);
        self.bootstrap_pings.insert(tid, sender);
    }

    /// Store a value at the closest nodes to `key`, and send the number of
    /// nodes that acknowledged.
    ///
    /// The value is also stored locally if this node is one of the closest.
    pub fn put(&mut self, key: Id, value: Bytes, sender: Option<Sender<usize>>) {
        self.start_query(
            key,
            Rpc::FindNode,
            QueryPurpose::Put {
                value,
                store_locally: true,
                sender,
            },
        );
    }

    /// Same as [Actor::put], and remembers the value in the published set.
    pub fn publish(&mut self, key: Id, value: Bytes, sender: Option<Sender<usize>>) {
        self.published.insert(key, value.clone());
        self.put(key, value, sender);
    }

    /// Look up the value of `key`, from the local store first, then the network.
    pub fn get(&mut self, key: Id, sender: Option<Sender<Option<Bytes>>>) {
        if let Some(value) = self.server.store_mut().get(&key) {
            respond(sender, Some(value));
            return;
        }

        self.start_query(key, Rpc::FindValue, QueryPurpose::Get(sender));
    }

    /// Look up the closest responding nodes to `target`.
    pub fn find_node(&mut self, target: Id, sender: Option<Sender<Vec<Node>>>) {
        self.start_query(target, Rpc::FindNode, QueryPurpose::FindNode(sender));
    }

    /// Stop maintenance and abandon every pending operation.
    ///
    /// Pending senders are dropped, so their receivers see a disconnection.
    pub fn shutdown(&mut self) {
        self.maintenance.stop();
        self.iterative_queries.clear();
        self.put_queries.clear();
        self.bootstrap_pings.clear();
    }

    // === Private Methods ===

    /// Send a request, locking the target node in the routing table until
    /// it answers or times out.
    fn request(&mut self, to: &Node, request: RequestSpecific, timeout: Duration) -> u32 {
        let tid = self.socket.request(to, request, timeout);
        self.routing_table.lock(to.id());

        tid
    }

    /// One-shot STORE, used for caching and replication.
    fn store_at(&mut self, to: &Node, key: Id, value: Bytes) -> u32 {
        self.request(
            to,
            RequestSpecific::Store {
                key,
                value: Some(value),
            },
            self.store_timeout,
        )
    }

    fn start_query(&mut self, target: Id, rpc: Rpc, purpose: QueryPurpose) {
        if rpc == Rpc::FindNode {
            self.routing_table.touch(&target, Instant::now());
        }

        let seeds = self.routing_table.closest(&target, ALPHA, true, false);
        let query = IterativeQuery::new(*self.id(), target, rpc, seeds);

        self.iterative_queries.push(PendingQuery { query, purpose });
    }

    fn handle_timeouts(&mut self) {
        for request in self.socket.expired() {
            debug!(
                tid = request.transaction_id,
                to = ?request.to.address(),
                rpc = ?request.rpc,
                "Request timed out"
            );

            self.request_failed(request.transaction_id);
            self.mark_stale(request.to.id());
        }
    }

    /// Resolve whichever operation was waiting for `tid` as failed.
    fn request_failed(&mut self, tid: u32) {
        if let Some(sender) = self.bootstrap_pings.remove(&tid) {
            error!("Bootstrap node did not respond");
            respond(sender, false);
            return;
        }

        if let Some(pending) = self
            .iterative_queries
            .iter_mut()
            .find(|pending| pending.query.inflight(tid))
        {
            pending.query.on_failure(tid);
            return;
        }

        if let Some(pending) = self
            .put_queries
            .iter_mut()
            .find(|pending| pending.query.inflight(tid))
        {
            pending.query.failure(tid);
        }
    }

    fn tick_iterative_queries(&mut self) {
        for index in 0..self.iterative_queries.len() {
            let query = &mut self.iterative_queries[index].query;
            if !query.round_done() {
                continue;
            }

            let contacts = query.next_round();
            let request = query.request();

            for node in contacts {
                let tid = self.request(&node, request.clone(), self.request_timeout);
                self.iterative_queries[index].query.add_inflight(tid, &node);
            }
        }

        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.iterative_queries)
            .into_iter()
            .partition(|pending| pending.query.is_done());

        self.iterative_queries = pending;

        for pending in done {
            self.finish_query(pending);
        }
    }

    fn finish_query(&mut self, pending: PendingQuery) {
        let PendingQuery { query, purpose } = pending;
        let target = *query.target();

        match purpose {
            QueryPurpose::Bootstrap(sender) => {
                let nodes = query.outcome().nodes();
                self.refresh_buckets_of(&nodes);
                self.maintenance.start();

                info!(
                    id = ?self.id(),
                    routing_table_size = self.routing_table.size(),
                    "Bootstrapped"
                );

                respond(sender, true);
            }
            QueryPurpose::Refresh => {}
            QueryPurpose::FindNode(sender) => respond(sender, query.outcome().nodes()),
            QueryPurpose::Get(sender) => match query.outcome() {
                QueryOutcome::Value { value, closest } => {
                    if let Some(node) = closest {
                        debug!(key = ?target, to = ?node.address(), "Caching value at closest node");
                        self.store_at(&node, target, value.clone());
                    }

                    respond(sender, Some(value));
                }
                QueryOutcome::Nodes(_) => respond(sender, None),
            },
            QueryPurpose::Put {
                value,
                store_locally,
                sender,
            } => {
                let nodes = query.outcome().nodes();

                if store_locally && self.is_among_closest(&target, &nodes) {
                    let ttl = self.server.ttl_for(&self.routing_table, &target);
                    self.server.store_mut().put(target, value.clone(), ttl);
                }

                let mut put_query = PutQuery::new(target, value.clone());

                for node in &nodes {
                    let tid = self.store_at(node, target, value.clone());
                    put_query.add_inflight(tid);
                }

                self.put_queries.push(PendingPut {
                    query: put_query,
                    sender,
                });
            }
        }
    }

    fn tick_put_queries(&mut self) {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.put_queries)
            .into_iter()
            .partition(|pending| pending.query.is_done());

        self.put_queries = pending;

        for pending in done {
            respond(pending.sender, pending.query.stored_at());
        }
    }

    fn periodic_node_maintenance(&mut self) {
        let decisions = self
            .maintenance
            .periodic_maintenance_decisions(&self.routing_table);

        for target in decisions.refresh_targets {
            debug!(?target, "Refreshing bucket");
            self.start_query(target, Rpc::FindNode, QueryPurpose::Refresh);
        }

        if decisions.should_replicate {
            self.replicate();
        }
    }

    /// Re-put every record older than the replication interval.
    fn replicate(&mut self) {
        let due = self
            .server
            .store()
            .due_for_replication_at(Instant::now(), self.maintenance.replicate_interval());

        for (key, value) in due {
            debug!(?key, "Replicating value");

            self.start_query(
                key,
                Rpc::FindNode,
                QueryPurpose::Put {
                    value,
                    store_locally: false,
                    sender: None,
                },
            );
        }
    }

    /// Refresh every bucket, other than our own, that holds one of `nodes`.
    fn refresh_buckets_of(&mut self, nodes: &[Node]) {
        let own = *self.routing_table.find_bucket(self.id()).prefix();
        let mut seen = HashSet::new();

        let targets: Vec<Id> = nodes
            .iter()
            .filter_map(|node| {
                let bucket = self.routing_table.find_bucket(node.id());

                if bucket.prefix() == &own || !seen.insert(*bucket.prefix()) {
                    return None;
                }

                bucket.random_node().map(|node| *node.id())
            })
            .collect();

        for target in targets {
            self.start_query(target, Rpc::FindNode, QueryPurpose::Refresh);
        }
    }

    /// Returns true if fewer than K nodes were found, or this node is closer
    /// to `target` than the farthest of them.
    fn is_among_closest(&self, target: &Id, nodes: &[Node]) -> bool {
        if nodes.len() < MAX_BUCKET_SIZE_K {
            return true;
        }

        nodes
            .last()
            .map(|farthest| self.id().distance(target) < farthest.id().distance(target))
            .unwrap_or(true)
    }

    /// Insert the sender of a message into the routing table, and replicate
    /// to it the values it became responsible for.
    fn add_node(&mut self, node: Node) {
        if node.id() == self.id() {
            return;
        }

        let before = if self.routing_table.contains(node.id()) {
            None
        } else {
            Some(self.closest_neighbours())
        };

        let outcome = self.routing_table.add(node.clone());

        if let (AddOutcome::Inserted, Some(before)) = (outcome, before) {
            self.replicate_to(&node, &before);
        }
    }

    /// Mark a silent node as stale, and replicate to its replacement if one
    /// got promoted.
    fn mark_stale(&mut self, node_id: &Id) {
        let has_replacements = self.routing_table.contains(node_id)
            && !self
                .routing_table
                .find_bucket(node_id)
                .replacements()
                .is_empty();

        let before = if has_replacements {
            Some(self.closest_neighbours())
        } else {
            None
        };

        if let (Some(promoted), Some(before)) = (self.routing_table.mark_stale(node_id), before) {
            self.replicate_to(&promoted, &before);
        }
    }

    /// Distance to the closest known node, for every key in the local store.
    fn closest_neighbours(&self) -> HashMap<Id, Option<Id>> {
        self.server
            .store()
            .entries_at(Instant::now())
            .into_iter()
            .map(|(key, _)| {
                let distance = self
                    .routing_table
                    .closest(&key, 1, true, false)
                    .first()
                    .map(|node| node.id().distance(&key));

                (key, distance)
            })
            .collect()
    }

    /// STORE to a newly inserted node every local value it is now one of the
    /// K closest to, if we were at least as close as any node known before
    /// it, or it is now the closest.
    fn replicate_to(&mut self, node: &Node, before: &HashMap<Id, Option<Id>>) {
        let local_id = *self.id();
        let entries = self.server.store().entries_at(Instant::now());

        for (key, value) in entries {
            let closest = self
                .routing_table
                .closest(&key, MAX_BUCKET_SIZE_K, true, false);

            let position = match closest.iter().position(|n| n.id() == node.id()) {
                Some(position) => position,
                None => continue,
            };

            let local_is_closer = match before.get(&key) {
                Some(Some(previous)) => local_id.distance(&key) <= *previous,
                _ => true,
            };

            if local_is_closer || position == 0 {
                debug!(?key, to = ?node.address(), "Replicating value to new node");
                self.store_at(node, key, value);
            }
        }
    }

    fn handle_message(&mut self) {
        match self.socket.recv_from() {
            Some(socket::Incoming::Request { message, from }) => {
                self.handle_request(from, message);
            }
            Some(socket::Incoming::Response { message, request }) => {
                self.handle_response(message, request);
            }
            None => {}
        }
    }
}

fn respond<T>(sender: Option<Sender<T>>, value: T) {
    if let Some(sender) = sender {
        // The caller may have stopped waiting.
        let _ = sender.send(value);
    }
}
