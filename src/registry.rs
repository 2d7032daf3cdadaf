//! Connection Registry & Reconciler
//!
//! Keeps one [`ConnectionRecord`] per remote endpoint ever observed and merges
//! each new [`Snapshot`] into them. A cycle runs in two passes: every endpoint
//! in the snapshot is activated first, then every record missing from it is
//! deactivated, so nothing present in the current snapshot is ever marked
//! inactive by its own cycle.
//!
//! Elapsed time is kept as an anchor (`time_established`) plus the derived
//! `time_connected`. While a record is inactive its `time_connected` is frozen.
//! On reactivation the anchor is moved to `now - time_connected` so the shown
//! duration carries on from where it stopped instead of restarting at zero.

use crate::conn_table::TransportLayer;
use crate::dns_resolver::{DomainCache, ReverseLookup};
use crate::snapshot::Snapshot;
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub remote_address: SocketAddr,
    pub local_address: SocketAddr,
    pub transport_layer: TransportLayer,
    pub domain: String,
    pub name: String,
    pub is_active: bool,
    pub time_established: Instant,
    pub time_connected: Duration,
    /// Last cycle in which the endpoint was present.
    pub last_seen: Instant,
}

impl ConnectionRecord {
    fn activate(&mut self, now: Instant) {
        if !self.is_active {
            // Keep the old anchor if the offset does not fit before `now`
            self.time_established = now
                .checked_sub(self.time_connected)
                .unwrap_or(self.time_established);
            debug!("Reactivated {} ({})", self.remote_address, self.domain);
        }
        self.time_connected = now.saturating_duration_since(self.time_established);
        self.is_active = true;
        self.last_seen = now;
    }

    fn deactivate(&mut self, now: Instant) {
        // Settle the elapsed time at the cycle that noticed the disconnect.
        self.time_connected = now.saturating_duration_since(self.time_established);
        self.is_active = false;
        debug!(
            "Deactivated {} ({}) after {:.2}s",
            self.remote_address,
            self.domain,
            self.time_connected.as_secs_f64()
        );
    }
}

/// Active first, then name ascending, then time connected ascending.
pub fn display_order(a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
    b.is_active
        .cmp(&a.is_active)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.time_connected.cmp(&b.time_connected))
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<SocketAddr, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, remote_address: &SocketAddr) -> Option<&ConnectionRecord> {
        self.records.get(remote_address)
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.is_active).count()
    }

    /// Merges `snapshot` into the registry as of `now`. Domains for endpoints
    /// seen for the first time are looked up through `domains`.
    pub async fn reconcile<R: ReverseLookup>(
        &mut self,
        snapshot: &Snapshot,
        domains: &mut DomainCache<R>,
        now: Instant,
    ) {
        for endpoint in snapshot.endpoints() {
            match self.records.get_mut(&endpoint.remote_address) {
                Some(record) => record.activate(now),
                None => {
                    let entry = domains.resolve(endpoint.remote_address.ip()).await;
                    info!(
                        "New connection {} -> {} ({})",
                        endpoint.local_address, endpoint.remote_address, entry.domain
                    );
                    self.records.insert(
                        endpoint.remote_address,
                        ConnectionRecord {
                            remote_address: endpoint.remote_address,
                            local_address: endpoint.local_address,
                            transport_layer: endpoint.transport_layer,
                            domain: entry.domain,
                            name: entry.name,
                            is_active: true,
                            time_established: now,
                            time_connected: Duration::ZERO,
                            last_seen: now,
                        },
                    );
                }
            }
        }

        for record in self.records.values_mut() {
            if record.is_active && !snapshot.contains(&record.remote_address) {
                record.deactivate(now);
            }
        }
    }

    /// Drops inactive records not seen for longer than `max_idle`.
    /// Returns how many were removed.
    pub fn prune_inactive(&mut self, now: Instant, max_idle: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.is_active || now.saturating_duration_since(r.last_seen) <= max_idle);
        let removed = before - self.records.len();
        if removed > 0 {
            info!("Pruned {} inactive connection(s) idle longer than {}s", removed, max_idle.as_secs());
        }
        removed
    }

    /// Current records in display order.
    pub fn sorted(&self) -> Vec<&ConnectionRecord> {
        let mut rows: Vec<&ConnectionRecord> = self.records.values().collect();
        rows.sort_by(|a, b| display_order(a, b));
        rows
    }
}
