use std::collections::HashSet;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::Id;

#[derive(Debug)]
/// Once an [super::iterative_query::IterativeQuery] is done, we store the value
/// at the closest nodes using this PutQuery, which counts the nodes that
/// acknowledged the STORE.
pub struct PutQuery {
    target: Id,
    value: Bytes,
    /// Nodes that confirmed success
    stored_at: usize,
    inflight_requests: HashSet<u32>,
}

impl PutQuery {
    pub fn new(target: Id, value: Bytes) -> Self {
        trace!(?target, "PutQuery start");

        Self {
            target,
            value,
            stored_at: 0,
            inflight_requests: HashSet::new(),
        }
    }

    // === Getters ===

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn stored_at(&self) -> usize {
        self.stored_at
    }

    /// Return true if a response (by transaction_id) is expected by this query.
    pub fn inflight(&self, tid: u32) -> bool {
        self.inflight_requests.contains(&tid)
    }

    /// Done once every STORE got acknowledged or timed out.
    pub fn is_done(&self) -> bool {
        self.inflight_requests.is_empty()
    }

    // === Public Methods ===

    pub fn add_inflight(&mut self, tid: u32) {
        self.inflight_requests.insert(tid);
    }

    pub fn success(&mut self, tid: u32) {
        if self.inflight_requests.remove(&tid) {
            self.stored_at += 1;

            if self.is_done() {
                debug!(target = ?self.target, stored_at = self.stored_at, "PutQuery done");
            }
        }
    }

    pub fn failure(&mut self, tid: u32) {
        self.inflight_requests.remove(&tid);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counts_acknowledgements() {
        let mut query = PutQuery::new(Id::random(), Bytes::from_static(b"v"));
        assert!(query.is_done());

        for tid in 0..4 {
            query.add_inflight(tid);
        }
        assert!(!query.is_done());

        query.success(0);
        query.success(0);
        query.failure(1);
        query.success(2);
        assert!(query.inflight(3));
        assert!(!query.is_done());

        query.failure(3);
        assert!(query.is_done());
        assert_eq!(query.stored_at(), 2);
    }
}
