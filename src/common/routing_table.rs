//! Kademlia routing table as a binary trie of k-buckets

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::slice::Iter;
use std::time::Instant;

use rand::seq::SliceRandom;

use crate::common::{Id, Node, ID_BITS};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

#[derive(Debug, Clone)]
/// Kademlia routing table.
///
/// Every leaf of the trie owns one [KBucket] covering the ids that share its
/// [Prefix]. Only the bucket covering the local id ever splits, so the table
/// keeps fine grained knowledge close to home and a coarse view far away.
pub struct RoutingTable {
    id: Id,
    root: TrieNode,
}

#[derive(Debug, Clone)]
enum TrieNode {
    Leaf(KBucket),
    /// Children for bit `0` and bit `1` at this depth.
    Branch(Box<[TrieNode; 2]>),
}

/// What [RoutingTable::add] did with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Already known, moved to the tail of its bucket.
    Refreshed,
    /// Newly inserted into a bucket.
    Inserted,
    /// Its bucket is full, kept in the bucket's replacement cache.
    Cached,
    /// The local node is never added.
    Ignored,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            root: TrieNode::Leaf(KBucket::new(Prefix::ROOT)),
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Attempts to add a node to this routing table.
    pub fn add(&mut self, node: Node) -> AddOutcome {
        if node.id() == &self.id {
            return AddOutcome::Ignored;
        }

        let local_id = self.id;

        add_at(&mut self.root, 0, &local_id, node)
    }

    /// Remove a node from this routing table.
    pub fn remove(&mut self, node_id: &Id) -> Option<Node> {
        self.bucket_mut(node_id)
            .remove(node_id)
            .map(|entry| entry.node)
    }

    /// Returns `true` if a node with this id is in the table.
    pub fn contains(&self, node_id: &Id) -> bool {
        self.find_bucket(node_id).contains(node_id)
    }

    /// Returns the entry of a known node.
    pub fn get(&self, node_id: &Id) -> Option<&BucketEntry> {
        self.find_bucket(node_id).get(node_id)
    }

    /// Descend the trie along the bits of `id` to the bucket covering it.
    pub fn find_bucket(&self, id: &Id) -> &KBucket {
        let mut node = &self.root;
        let mut depth = 0;

        loop {
            match node {
                TrieNode::Leaf(bucket) => return bucket,
                TrieNode::Branch(children) => {
                    node = &children[usize::from(id.bit(depth))];
                    depth += 1;
                }
            }
        }
    }

    /// Depth of the leaf covering `id`, which is the length of its bucket prefix.
    pub fn depth_of(&self, id: &Id) -> usize {
        self.find_bucket(id).prefix().len()
    }

    /// Return up to `max` nodes closest to `target`, sorted by distance, then
    /// by address.
    pub fn closest(
        &self,
        target: &Id,
        max: usize,
        include_locked: bool,
        include_stale: bool,
    ) -> Vec<Node> {
        let mut entries: Vec<_> = self
            .buckets()
            .into_iter()
            .flat_map(|bucket| bucket.iter())
            .filter(|entry| include_locked || !entry.is_locked())
            .filter(|entry| include_stale || !entry.is_stale())
            .map(|entry| (entry.node.distance_key(target), &entry.node))
            .collect();

        entries.sort_by(|a, b| a.0.cmp(&b.0));

        entries
            .into_iter()
            .take(max)
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// Mark a node as in-flight, it will not be evicted until unlocked.
    pub fn lock(&mut self, node_id: &Id) {
        if let Some(entry) = self.bucket_mut(node_id).get_mut(node_id) {
            entry.state = EntryState::Locked;
        }
    }

    /// Release the in-flight mark of a node.
    pub fn unlock(&mut self, node_id: &Id) {
        if let Some(entry) = self.bucket_mut(node_id).get_mut(node_id) {
            entry.state = EntryState::Free;
        }
    }

    /// Unlock a node that failed to respond and mark it as stale.
    ///
    /// If its bucket holds replacements, the most recently seen one takes the
    /// stale node's place and is returned.
    pub fn mark_stale(&mut self, node_id: &Id) -> Option<Node> {
        let bucket = self.bucket_mut(node_id);

        let entry = bucket.get_mut(node_id)?;
        entry.state = EntryState::Free;
        entry.stale = true;

        let replacement = bucket.replacements.pop_back()?;
        bucket.remove(node_id);
        bucket.enqueue(replacement.clone());

        Some(replacement)
    }

    /// Set the last touched time of the bucket covering `id`.
    pub fn touch(&mut self, id: &Id, now: Instant) {
        self.bucket_mut(id).last_touched = now;
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets().iter().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets().iter().map(|bucket| bucket.len()).sum()
    }

    /// All buckets, in prefix order.
    pub fn buckets(&self) -> Vec<&KBucket> {
        let mut buckets = Vec::new();
        let mut stack = vec![&self.root];

        while let Some(node) = stack.pop() {
            match node {
                TrieNode::Leaf(bucket) => buckets.push(bucket),
                TrieNode::Branch(children) => {
                    stack.push(&children[1]);
                    stack.push(&children[0]);
                }
            }
        }

        buckets
    }

    /// Every node of the routing table, stale ones included.
    pub fn nodes(&self) -> Vec<Node> {
        self.buckets()
            .into_iter()
            .flat_map(|bucket| bucket.iter().map(|entry| entry.node.clone()))
            .collect()
    }

    /// Turn this routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Vec<Node> {
        self.buckets()
            .into_iter()
            .flat_map(|bucket| bucket.iter())
            .filter(|entry| !entry.is_stale())
            .map(|entry| entry.node.clone())
            .collect()
    }

    // === Private Methods ===

    fn bucket_mut(&mut self, id: &Id) -> &mut KBucket {
        leaf_bucket_mut(&mut self.root, id, 0)
    }
}

fn leaf_bucket_mut<'a>(node: &'a mut TrieNode, id: &Id, depth: usize) -> &'a mut KBucket {
    match node {
        TrieNode::Leaf(bucket) => bucket,
        TrieNode::Branch(children) => {
            leaf_bucket_mut(&mut children[usize::from(id.bit(depth))], id, depth + 1)
        }
    }
}

fn add_at(node: &mut TrieNode, depth: usize, local_id: &Id, incoming: Node) -> AddOutcome {
    let bucket = match node {
        TrieNode::Branch(children) => {
            let child = &mut children[usize::from(incoming.id().bit(depth))];
            return add_at(child, depth + 1, local_id, incoming);
        }
        TrieNode::Leaf(bucket) => bucket,
    };

    if let Some(index) = bucket.position(incoming.id()) {
        bucket.entries.remove(index);
        bucket.enqueue(incoming);

        return AddOutcome::Refreshed;
    }

    if !bucket.is_full() {
        bucket.enqueue(incoming);

        return AddOutcome::Inserted;
    }

    if bucket.prefix.contains(local_id) && depth < ID_BITS {
        let [zero, one] = bucket.split();
        *node = TrieNode::Branch(Box::new([TrieNode::Leaf(zero), TrieNode::Leaf(one)]));

        return add_at(node, depth, local_id, incoming);
    }

    if bucket.evict_stale() {
        bucket.enqueue(incoming);

        return AddOutcome::Inserted;
    }

    bucket.add_replacement(incoming);

    AddOutcome::Cached
}

/// The leading bits shared by every id in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    bits: Id,
    len: usize,
}

impl Prefix {
    /// The empty prefix covering the whole id space.
    pub const ROOT: Prefix = Prefix {
        bits: Id::ZERO,
        len: 0,
    };

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> &Id {
        &self.bits
    }

    pub fn contains(&self, id: &Id) -> bool {
        (*id & Id::mask(self.len)) == self.bits
    }

    /// The prefix one bit longer, extended with `bit`.
    pub fn child(&self, bit: bool) -> Prefix {
        let bits = if bit {
            self.bits | Id::with_bit(self.len)
        } else {
            self.bits
        };

        Prefix {
            bits,
            len: self.len + 1,
        }
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for i in 0..self.len {
            write!(f, "{}", u8::from(self.bits.bit(i)))?;
        }

        Ok(())
    }
}

/// Whether an RPC to a node is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Free,
    Locked,
}

#[derive(Debug, Clone)]
pub struct BucketEntry {
    node: Node,
    state: EntryState,
    stale: bool,
}

impl BucketEntry {
    fn new(node: Node) -> Self {
        BucketEntry {
            node,
            state: EntryState::Free,
            stale: false,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == EntryState::Locked
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    prefix: Prefix,
    /// Entries in the k-bucket, sorted by the least recently seen.
    entries: Vec<BucketEntry>,
    /// Nodes seen while the bucket was full, most recent last.
    replacements: VecDeque<Node>,
    last_touched: Instant,
}

impl KBucket {
    pub fn new(prefix: Prefix) -> Self {
        KBucket {
            prefix,
            entries: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            replacements: VecDeque::new(),
            last_touched: Instant::now(),
        }
    }

    // === Getters ===

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn last_touched(&self) -> Instant {
        self.last_touched
    }

    pub fn replacements(&self) -> &VecDeque<Node> {
        &self.replacements
    }

    // === Public Methods ===

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_BUCKET_SIZE_K
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &Id) -> Option<&BucketEntry> {
        self.entries.iter().find(|entry| entry.node.id() == id)
    }

    pub fn iter(&self) -> Iter<'_, BucketEntry> {
        self.entries.iter()
    }

    /// A random node of this bucket, if any.
    pub fn random_node(&self) -> Option<&Node> {
        self.entries
            .choose(&mut rand::thread_rng())
            .map(|entry| &entry.node)
    }

    // === Private Methods ===

    fn position(&self, id: &Id) -> Option<usize> {
        self.entries.iter().position(|entry| entry.node.id() == id)
    }

    fn get_mut(&mut self, id: &Id) -> Option<&mut BucketEntry> {
        self.entries.iter_mut().find(|entry| entry.node.id() == id)
    }

    fn enqueue(&mut self, node: Node) {
        self.replacements.retain(|cached| cached.id() != node.id());
        self.entries.push(BucketEntry::new(node));
    }

    fn remove(&mut self, id: &Id) -> Option<BucketEntry> {
        self.replacements.retain(|cached| cached.id() != id);

        self.position(id).map(|index| self.entries.remove(index))
    }

    fn add_replacement(&mut self, node: Node) {
        self.replacements.retain(|cached| cached.id() != node.id());
        self.replacements.push_back(node);

        if self.replacements.len() > MAX_BUCKET_SIZE_K {
            self.replacements.pop_front();
        }
    }

    /// Remove the least recently seen stale entry that is not locked.
    fn evict_stale(&mut self) -> bool {
        match self
            .entries
            .iter()
            .position(|entry| entry.stale && !entry.is_locked())
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Split into the buckets for `prefix + 0` and `prefix + 1`, keeping the
    /// recency order of entries and replacements.
    fn split(&mut self) -> [KBucket; 2] {
        let depth = self.prefix.len;
        let mut children = [
            KBucket::new(self.prefix.child(false)),
            KBucket::new(self.prefix.child(true)),
        ];

        for entry in self.entries.drain(..) {
            children[usize::from(entry.node.id().bit(depth))]
                .entries
                .push(entry);
        }

        for node in self.replacements.drain(..) {
            children[usize::from(node.id().bit(depth))]
                .replacements
                .push_back(node);
        }

        for child in children.iter_mut() {
            child.last_touched = self.last_touched;
        }

        children
    }
}
