use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::{Node, Rpc};

#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub transaction_id: u32,
    pub to: Node,
    pub rpc: Rpc,
    pub sent_at: Instant,
    pub timeout: Duration,
}

impl InflightRequest {
    pub fn does_match(&self, from: &SocketAddr, rpc: Rpc) -> bool {
        if self.rpc != rpc || self.to.address().port() != from.port() {
            return false;
        }

        if self.to.address().ip().is_unspecified() {
            return true;
        }

        self.to.address().ip() == from.ip()
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.sent_at) >= self.timeout
    }
}

#[derive(Debug, Default)]
pub struct InflightRequests {
    requests: HashMap<u32, InflightRequest>,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new inflight request O(1) amortized
    pub fn add(&mut self, transaction_id: u32, to: Node, rpc: Rpc, timeout: Duration) {
        self.requests.insert(
            transaction_id,
            InflightRequest {
                transaction_id,
                to,
                rpc,
                sent_at: Instant::now(),
                timeout,
            },
        );
    }

    /// Check if a transaction_id is still inflight and not expired O(1)
    pub fn contains(&self, transaction_id: u32) -> bool {
        self.requests
            .get(&transaction_id)
            .map(|request| !request.is_expired_at(Instant::now()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Remove inflight request by transaction_id if it exists, is not expired,
    /// and matches the address and rpc of the response. O(1) amortized
    pub fn remove(
        &mut self,
        transaction_id: u32,
        from: &SocketAddr,
        rpc: Rpc,
    ) -> Option<InflightRequest> {
        let request = self.requests.get(&transaction_id)?;

        // Expired requests are left for [Self::expired_at] to report.
        if request.is_expired_at(Instant::now()) || !request.does_match(from, rpc) {
            return None;
        }

        self.requests.remove(&transaction_id)
    }

    /// Remove and return every request whose timeout elapsed.
    pub fn expired_at(&mut self, now: Instant) -> Vec<InflightRequest> {
        let expired: Vec<u32> = self
            .requests
            .values()
            .filter(|request| request.is_expired_at(now))
            .map(|request| request.transaction_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|tid| self.requests.remove(&tid))
            .collect()
    }
}
