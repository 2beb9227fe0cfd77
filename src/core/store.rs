//! Memory-resident key/value store with lazy expiry.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;

use crate::common::Id;

/// Default maximum number of values kept in a [Store].
///
/// Once full, storing a new key evicts the least recently used record, even
/// one that has not expired yet.
pub const MAX_VALUES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    value: Bytes,
    created: Instant,
    ttl: Duration,
}

impl Record {
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A record expires once `now > created + ttl`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.created.checked_add(self.ttl) {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}

/// Values stored at this node, bounded by an LRU policy.
///
/// Expired records are not swept, they are dropped when read.
#[derive(Debug)]
pub struct Store {
    records: LruCache<Id, Record>,
}

impl Store {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Store {
            records: LruCache::new(capacity),
        }
    }

    // === Public Methods ===

    pub fn put(&mut self, key: Id, value: Bytes, ttl: Duration) {
        self.put_at(key, value, ttl, Instant::now())
    }

    pub fn put_at(&mut self, key: Id, value: Bytes, ttl: Duration, now: Instant) {
        self.records.put(
            key,
            Record {
                value,
                created: now,
                ttl,
            },
        );
    }

    /// Returns the value of an unexpired record, purging it if it expired.
    pub fn get(&mut self, key: &Id) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &Id, now: Instant) -> Option<Bytes> {
        if self.records.peek(key)?.is_expired_at(now) {
            self.records.pop(key);

            return None;
        }

        self.records.get(key).map(|record| record.value.clone())
    }

    pub fn remove(&mut self, key: &Id) -> Option<Record> {
        self.records.pop(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keys and values of every unexpired record.
    pub fn entries_at(&self, now: Instant) -> Vec<(Id, Bytes)> {
        self.records
            .iter()
            .filter(|(_, record)| !record.is_expired_at(now))
            .map(|(key, record)| (*key, record.value.clone()))
            .collect()
    }

    /// Unexpired records created more than `interval` before `now`.
    pub fn due_for_replication_at(&self, now: Instant, interval: Duration) -> Vec<(Id, Bytes)> {
        self.records
            .iter()
            .filter(|(_, record)| !record.is_expired_at(now))
            .filter(|(_, record)| {
                now.saturating_duration_since(record.created) > interval
            })
            .map(|(key, record)| (*key, record.value.clone()))
            .collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new(NonZeroUsize::new(MAX_VALUES).unwrap_or(NonZeroUsize::MIN))
    }
}
