//! Routing table maintenance logic.

use std::time::{Duration, Instant};

use crate::common::{Id, RoutingTable};

/// Default interval between bucket refresh checks.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
/// Default interval between replication passes.
pub const DEFAULT_REPLICATE_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Republishing of the published set is not automatic, this is the interval
/// an application is expected to republish at.
pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Routing table maintenance state
#[derive(Debug)]
pub struct RoutingMaintenance {
    /// Timers only run after a successful bootstrap.
    running: bool,
    refresh_interval: Duration,
    replicate_interval: Duration,
    last_refresh: Instant,
    last_replicate: Instant,
}

/// Decisions about routing table maintenance
#[derive(Debug, Default)]
pub struct MaintenanceDecisions {
    /// Random targets, one per bucket untouched for a whole refresh interval.
    pub refresh_targets: Vec<Id>,

    /// Whether to re-put old records of the local store.
    pub should_replicate: bool,
}

impl RoutingMaintenance {
    /// Create new routing maintenance tracker, stopped.
    pub fn new(refresh_interval: Duration, replicate_interval: Duration) -> Self {
        RoutingMaintenance {
            running: false,
            refresh_interval,
            replicate_interval,
            last_refresh: Instant::now(),
            last_replicate: Instant::now(),
        }
    }

    // === Getters ===

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn replicate_interval(&self) -> Duration {
        self.replicate_interval
    }

    // === Public Methods ===

    pub fn start(&mut self) {
        self.start_at(Instant::now())
    }

    pub fn start_at(&mut self, now: Instant) {
        if !self.running {
            self.running = true;
            self.last_refresh = now;
            self.last_replicate = now;
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Determine what maintenance operations should be performed.
    ///
    /// Computes decisions and resets internal timers when intervals elapse.
    pub fn periodic_maintenance_decisions(
        &mut self,
        routing_table: &RoutingTable,
    ) -> MaintenanceDecisions {
        self.periodic_maintenance_decisions_at(Instant::now(), routing_table)
    }

    pub fn periodic_maintenance_decisions_at(
        &mut self,
        now: Instant,
        routing_table: &RoutingTable,
    ) -> MaintenanceDecisions {
        if !self.running {
            return MaintenanceDecisions::default();
        }

        let refresh_is_due =
            now.saturating_duration_since(self.last_refresh) >= self.refresh_interval;
        let should_replicate =
            now.saturating_duration_since(self.last_replicate) >= self.replicate_interval;

        let refresh_targets = if refresh_is_due {
            self.last_refresh = now;
            self.refresh_targets(now, routing_table)
        } else {
            Vec::new()
        };

        if should_replicate {
            self.last_replicate = now;
        }

        MaintenanceDecisions {
            refresh_targets,
            should_replicate,
        }
    }

    // === Private Methods ===

    /// A random node id from every non empty bucket not touched for a whole
    /// refresh interval.
    fn refresh_targets(&self, now: Instant, routing_table: &RoutingTable) -> Vec<Id> {
        routing_table
            .buckets()
            .into_iter()
            .filter(|bucket| {
                now.saturating_duration_since(bucket.last_touched()) >= self.refresh_interval
            })
            .filter_map(|bucket| bucket.random_node().map(|node| *node.id()))
            .collect()
    }
}

impl Default for RoutingMaintenance {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_INTERVAL, DEFAULT_REPLICATE_INTERVAL)
    }
}
