//! Iterative node lookup with bounded parallelism.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::{DistanceKey, Id, Node, RequestSpecific, Rpc, MAX_BUCKET_SIZE_K};

/// Number of parallel requests in a lookup round.
pub const ALPHA: usize = 3;

/// The result of a finished [IterativeQuery].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A node answered with the value. `closest` is the closest node that
    /// responded without it, where the value should be cached.
    Value { value: Bytes, closest: Option<Node> },
    /// Up to K closest responding nodes, sorted by distance to the target.
    Nodes(Vec<Node>),
}

impl QueryOutcome {
    pub fn nodes(self) -> Vec<Node> {
        match self {
            QueryOutcome::Nodes(nodes) => nodes,
            QueryOutcome::Value { .. } => Vec::new(),
        }
    }
}

/// An iterative process of querying the closest known nodes to a target in
/// rounds, learning closer nodes from their responses, until the closest
/// responders stop improving.
///
/// Nodes move from `inactive` (known, not yet responded) to `active`
/// (responded). A round is only started once every request of the previous
/// round is resolved, by a response or by a timeout.
#[derive(Debug)]
pub struct IterativeQuery {
    local_id: Id,
    target: Id,
    rpc: Rpc,
    active: BTreeMap<DistanceKey, Node>,
    inactive: BTreeMap<DistanceKey, Node>,
    queried: HashSet<DistanceKey>,
    inflight_requests: HashMap<u32, DistanceKey>,
    /// `None` before the first round.
    last_closest: Option<Option<DistanceKey>>,
    value: Option<(Bytes, Option<Node>)>,
    done: bool,
}

impl IterativeQuery {
    /// Create a lookup for `target` with [Rpc::FindNode] or [Rpc::FindValue],
    /// seeded with some nodes from the routing table.
    pub fn new(local_id: Id, target: Id, rpc: Rpc, seeds: Vec<Node>) -> Self {
        trace!(?target, ?rpc, "New Query");

        let mut query = IterativeQuery {
            local_id,
            target,
            rpc,
            active: BTreeMap::new(),
            inactive: BTreeMap::new(),
            queried: HashSet::new(),
            inflight_requests: HashMap::new(),
            last_closest: None,
            value: None,
            done: false,
        };

        for node in seeds {
            query.add_candidate(node);
        }

        query
    }

    // === Getters ===

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn rpc(&self) -> Rpc {
        self.rpc
    }

    pub fn request(&self) -> RequestSpecific {
        match self.rpc {
            Rpc::FindValue => RequestSpecific::FindValue {
                target: self.target,
            },
            _ => RequestSpecific::FindNode {
                target: self.target,
            },
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Return true if a response (by transaction_id) is expected by this query.
    pub fn inflight(&self, tid: u32) -> bool {
        self.inflight_requests.contains_key(&tid)
    }

    /// Return true if every request of the current round is resolved.
    pub fn round_done(&self) -> bool {
        self.inflight_requests.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn inactive_len(&self) -> usize {
        self.inactive.len()
    }

    // === Public Methods ===

    /// Decide the nodes to query in the next round, or finish the query.
    ///
    /// Returns an empty list once the query is done.
    pub fn next_round(&mut self) -> Vec<Node> {
        loop {
            if self.done {
                return Vec::new();
            }

            if self.value.is_some() || self.converged() {
                return self.finish();
            }

            let closest = self.active.keys().next().cloned();
            let size = if self.last_closest.as_ref() == Some(&closest) {
                // No progress, try every candidate left.
                if self.inactive.is_empty() {
                    return self.finish();
                }
                self.inactive.len()
            } else {
                self.last_closest = Some(closest);
                ALPHA
            };

            let contacts: Vec<Node> = self
                .inactive
                .iter()
                .filter(|(key, _)| !self.queried.contains(*key))
                .take(size)
                .map(|(_, node)| node.clone())
                .collect();

            if !contacts.is_empty() {
                return contacts;
            }
        }
    }

    /// Register the transaction id of a request sent to `node`.
    pub fn add_inflight(&mut self, tid: u32, node: &Node) {
        let key = node.distance_key(&self.target);

        self.queried.insert(key.clone());
        self.inflight_requests.insert(tid, key);
    }

    /// A node answered with closer nodes.
    pub fn on_nodes(&mut self, tid: u32, nodes: Vec<Node>) {
        let key = match self.inflight_requests.remove(&tid) {
            Some(key) => key,
            None => return,
        };

        if let Some(node) = self.inactive.remove(&key) {
            self.active.insert(key, node);
        }

        for node in nodes {
            self.add_candidate(node);
        }
    }

    /// A node answered with a value that passed validation, which resolves
    /// the whole query.
    pub fn on_value(&mut self, tid: u32, value: Bytes) {
        if self.inflight_requests.remove(&tid).is_none() {
            return;
        }

        let closest = self.active.values().next().cloned();
        debug!(target = ?self.target, ?closest, "Query found a value");

        self.value = Some((value, closest));
        self.inflight_requests.clear();
    }

    /// A node timed out, or answered with nothing useful.
    pub fn on_failure(&mut self, tid: u32) {
        if let Some(key) = self.inflight_requests.remove(&tid) {
            self.inactive.remove(&key);
        }
    }

    /// The result of a finished query.
    pub fn outcome(&self) -> QueryOutcome {
        match &self.value {
            Some((value, closest)) => QueryOutcome::Value {
                value: value.clone(),
                closest: closest.clone(),
            },
            None => QueryOutcome::Nodes(
                self.active
                    .values()
                    .take(MAX_BUCKET_SIZE_K)
                    .cloned()
                    .collect(),
            ),
        }
    }

    // === Private Methods ===

    fn add_candidate(&mut self, node: Node) {
        if node.id() == &self.local_id {
            return;
        }

        let key = node.distance_key(&self.target);

        if self.active.contains_key(&key) || self.queried.contains(&key) {
            return;
        }

        self.inactive.entry(key).or_insert(node);
    }

    /// K nodes responded, and no candidate left could be closer than the
    /// farthest of them.
    ///
    /// Stricter than stopping as soon as K nodes responded: a closer
    /// candidate learned late still gets queried, so responses arriving out
    /// of distance order cannot hide the true K closest.
    fn converged(&self) -> bool {
        let kth = match self.active.keys().nth(MAX_BUCKET_SIZE_K - 1) {
            Some(kth) => kth,
            None => return false,
        };

        match self.inactive.keys().next() {
            Some(candidate) => candidate > kth,
            None => true,
        }
    }

    fn finish(&mut self) -> Vec<Node> {
        self.done = true;
        self.inflight_requests.clear();

        debug!(
            target = ?self.target,
            active = ?self.active.len(),
            inactive = ?self.inactive.len(),
            found_value = self.value.is_some(),
            "Done query"
        );

        Vec::new()
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use super::*;

    /// A simulated network where every node knows every other node.
    struct Network {
        nodes: Vec<Node>,
        unresponsive: HashSet<Id>,
        values: HashMap<Id, Bytes>,
    }

    impl Network {
        fn new(size: usize) -> Self {
            Network {
                nodes: (0..size)
                    .map(|i| {
                        Node::new(Id::random(), SocketAddr::from(([10, 0, 0, 1], i as u16)))
                    })
                    .collect(),
                unresponsive: HashSet::new(),
                values: HashMap::new(),
            }
        }

        fn closest(&self, target: &Id, exclude: &Id, nodes: &[Node]) -> Vec<Node> {
            let mut nodes: Vec<_> = nodes.iter().filter(|n| n.id() != exclude).cloned().collect();
            nodes.sort_by_key(|n| n.distance_key(target));
            nodes.truncate(MAX_BUCKET_SIZE_K);
            nodes
        }

        /// Drive a query to completion, answering each request synchronously.
        fn run(&self, query: &mut IterativeQuery) -> usize {
            let mut tid = 0;
            let mut rounds = 0;

            loop {
                let contacts = query.next_round();
                if contacts.is_empty() {
                    break;
                }
                rounds += 1;

                let mut sent = vec![];
                for node in contacts {
                    tid += 1;
                    query.add_inflight(tid, &node);
                    sent.push((tid, node));
                }

                for (tid, node) in sent {
                    if self.unresponsive.contains(node.id()) {
                        query.on_failure(tid);
                    } else if let (Rpc::FindValue, Some(value)) =
                        (query.rpc(), self.values.get(node.id()))
                    {
                        query.on_value(tid, value.clone());
                    } else {
                        query.on_nodes(tid, self.closest(query.target(), node.id(), &self.nodes));
                    }
                }
            }

            rounds
        }
    }

    #[test]
    fn converges_to_closest_nodes() {
        let network = Network::new(200);
        let local_id = Id::random();
        let target = Id::random();

        let seeds = network.nodes[..5].to_vec();
        let mut query = IterativeQuery::new(local_id, target, Rpc::FindNode, seeds);

        network.run(&mut query);

        assert!(query.is_done());

        let expected = network.closest(&target, &local_id, &network.nodes);
        assert_eq!(query.outcome(), QueryOutcome::Nodes(expected));
    }

    #[test]
    fn unresponsive_nodes_are_dropped() {
        let mut network = Network::new(100);
        let local_id = Id::random();
        let target = Id::random();

        for node in network.nodes.iter().step_by(20) {
            network.unresponsive.insert(*node.id());
        }

        let seeds = network.nodes[1..6].to_vec();
        let mut query = IterativeQuery::new(local_id, target, Rpc::FindNode, seeds);

        network.run(&mut query);

        let nodes = query.outcome().nodes();
        assert_eq!(nodes.len(), MAX_BUCKET_SIZE_K);
        assert!(nodes.iter().all(|n| !network.unresponsive.contains(n.id())));

        let mut sorted = nodes.clone();
        sorted.sort_by_key(|n| n.distance_key(&target));
        assert_eq!(sorted, nodes);
    }

    #[test]
    fn value_short_circuits() {
        let mut network = Network::new(100);
        let local_id = Id::random();
        let target = Id::random();

        let holder = *network.closest(&target, &local_id, &network.nodes)[0].id();
        network.values.insert(holder, Bytes::from_static(b"value"));

        let seeds: Vec<_> = network
            .nodes
            .iter()
            .filter(|n| n.id() != &holder)
            .take(5)
            .cloned()
            .collect();
        let mut query = IterativeQuery::new(local_id, target, Rpc::FindValue, seeds);

        network.run(&mut query);

        assert!(query.is_done());
        match query.outcome() {
            QueryOutcome::Value { value, closest } => {
                assert_eq!(value, Bytes::from_static(b"value"));
                // The holder never joins the active set.
                let closest = closest.unwrap();
                assert_ne!(closest.id(), &holder);
            }
            outcome => panic!("expected a value, got {:?}", outcome),
        }
    }

    #[test]
    fn stalled_round_queries_every_candidate() {
        let local_id = Id::random();
        let target = Id::random();

        let seeds: Vec<_> = (0..10)
            .map(|i| Node::new(Id::random(), SocketAddr::from(([10, 0, 0, 2], i))))
            .collect();
        let mut query = IterativeQuery::new(local_id, target, Rpc::FindNode, seeds);

        let mut tid = 0;
        let mut answer_all_with_nothing = |query: &mut IterativeQuery, contacts: Vec<Node>| {
            for node in contacts {
                tid += 1;
                query.add_inflight(tid, &node);
                query.on_nodes(tid, vec![]);
            }
        };

        // First round: ALPHA closest seeds.
        let contacts = query.next_round();
        assert_eq!(contacts.len(), ALPHA);
        answer_all_with_nothing(&mut query, contacts);

        // The closest responder changed from nothing, so ALPHA again.
        let contacts = query.next_round();
        assert_eq!(contacts.len(), ALPHA);
        answer_all_with_nothing(&mut query, contacts);

        // No progress: every remaining candidate at once.
        let contacts = query.next_round();
        assert_eq!(contacts.len(), 4);
        answer_all_with_nothing(&mut query, contacts);

        assert!(query.next_round().is_empty());
        assert!(query.is_done());
        assert_eq!(query.outcome().nodes().len(), 10);
    }

    #[test]
    fn no_seeds_finishes_empty() {
        let mut query = IterativeQuery::new(Id::random(), Id::random(), Rpc::FindNode, vec![]);

        assert!(query.next_round().is_empty());
        assert!(query.is_done());
        assert_eq!(query.outcome(), QueryOutcome::Nodes(vec![]));
    }

    #[test]
    fn local_id_and_duplicates_are_not_candidates() {
        let local = Node::random();
        let other = Node::random();
        let mut query = IterativeQuery::new(
            *local.id(),
            Id::random(),
            Rpc::FindNode,
            vec![local.clone(), other.clone()],
        );

        let contacts = query.next_round();
        assert_eq!(contacts, vec![other.clone()]);

        query.add_inflight(1, &other);
        query.on_nodes(1, vec![local, other.clone()]);

        assert_eq!(query.inactive_len(), 0);
        assert_eq!(query.active_len(), 1);
        assert!(query.next_round().is_empty());
        assert_eq!(query.outcome().nodes(), vec![other]);
    }

    #[test]
    fn unknown_transaction_is_ignored() {
        let other = Node::random();
        let mut query =
            IterativeQuery::new(Id::random(), Id::random(), Rpc::FindValue, vec![other.clone()]);

        query.next_round();
        query.add_inflight(1, &other);

        query.on_value(2, Bytes::from_static(b"v"));
        assert!(query.inflight(1));
        assert!(!query.round_done());

        query.on_failure(1);
        assert!(query.round_done());
        assert_eq!(query.inactive_len(), 0);
    }
}
