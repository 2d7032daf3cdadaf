use crate::conn_table::ConnectionSource;
use crate::dns_resolver::{DomainCache, ReverseLookup};
use crate::registry::ConnectionRegistry;
use crate::snapshot;
use ipnetwork::IpNetwork;
use log::debug;
use std::time::{Duration, Instant};

/// Owns every piece of mutable state and runs one sampling cycle at a time.
pub struct ConnectionMonitor<S, R> {
    source: S,
    excluded: Vec<IpNetwork>,
    retention: Option<Duration>,
    registry: ConnectionRegistry,
    domains: DomainCache<R>,
}

impl<S: ConnectionSource, R: ReverseLookup> ConnectionMonitor<S, R> {
    pub fn new(source: S, lookup: R) -> Self {
        ConnectionMonitor {
            source,
            excluded: Vec::new(),
            retention: None,
            registry: ConnectionRegistry::new(),
            domains: DomainCache::new(lookup),
        }
    }

    pub fn with_excluded_networks(mut self, excluded: Vec<IpNetwork>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Drop inactive records after `retention` without being seen.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Acquire a snapshot and reconcile it into the registry as of `now`.
    pub async fn run_cycle(&mut self, now: Instant) -> &ConnectionRegistry {
        self.source.refresh();
        let snapshot = snapshot::acquire(&mut self.source, &self.excluded);
        if snapshot.is_empty() {
            debug!("No remote endpoints in this cycle");
        }

        self.registry.reconcile(&snapshot, &mut self.domains, now).await;

        if let Some(max_idle) = self.retention {
            self.registry.prune_inactive(now, max_idle);
        }

        debug!(
            "Cycle done: {} in snapshot, {} tracked, {} domains cached",
            snapshot.len(),
            self.registry.len(),
            self.domains.len()
        );
        &self.registry
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn_table::{Endpoint, TableRead, TransportLayer};
    use crate::dns_resolver::testing::FakeLookup;
    use std::collections::VecDeque;

    /// Replays one table per cycle.
    struct ScriptedTable {
        cycles: VecDeque<Vec<&'static str>>,
        current: VecDeque<Endpoint>,
    }

    impl ScriptedTable {
        fn new(cycles: Vec<Vec<&'static str>>) -> Self {
            ScriptedTable {
                cycles: cycles.into(),
                current: VecDeque::new(),
            }
        }
    }

    impl ConnectionSource for ScriptedTable {
        fn refresh(&mut self) {
            let remotes = self.cycles.pop_front().unwrap_or_default();
            self.current = remotes
                .into_iter()
                .map(|remote| Endpoint {
                    local_address: "10.0.0.2:50000".parse().unwrap(),
                    remote_address: remote.parse().unwrap(),
                    transport_layer: TransportLayer::Tcp,
                })
                .collect();
        }

        fn next_entry(&mut self) -> TableRead {
            match self.current.pop_front() {
                Some(e) => TableRead::Entry(e),
                None => TableRead::Exhausted,
            }
        }
    }

    #[tokio::test]
    async fn test_cycles_track_connect_and_disconnect() {
        let table = ScriptedTable::new(vec![
            vec!["0.0.0.0:0", "1.1.1.1:443"],
            vec!["0.0.0.0:0"],
            vec!["1.1.1.1:443"],
        ]);
        let fake = FakeLookup::default().with("1.1.1.1", Ok("one.one.one.one"));
        let mut monitor = ConnectionMonitor::new(table, fake.clone());
        let t0 = Instant::now();

        let registry = monitor.run_cycle(t0).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_count(), 1);

        let registry = monitor.run_cycle(t0 + Duration::from_secs(3)).await;
        assert_eq!(registry.active_count(), 0);

        let registry = monitor.run_cycle(t0 + Duration::from_secs(5)).await;
        let record = registry.sorted()[0].clone();
        assert!(record.is_active);
        assert_eq!(record.name, "one");
        assert_eq!(record.time_connected, Duration::from_secs(3));
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_excluded_and_retention() {
        let table = ScriptedTable::new(vec![vec!["127.0.0.1:5432", "8.8.8.8:53"], vec![], vec![]]);
        let mut monitor = ConnectionMonitor::new(table, FakeLookup::default())
            .with_excluded_networks(vec!["127.0.0.0/8".parse().unwrap()])
            .with_retention(Some(Duration::from_secs(10)));
        let t0 = Instant::now();

        assert_eq!(monitor.run_cycle(t0).await.len(), 1);
        assert_eq!(monitor.run_cycle(t0 + Duration::from_secs(5)).await.len(), 1);
        assert_eq!(monitor.run_cycle(t0 + Duration::from_secs(30)).await.len(), 0);
        assert!(monitor.registry().is_empty());
    }
}
