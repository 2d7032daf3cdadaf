use crate::conn_table::{ConnectionSource, Endpoint, TableRead};
use ipnetwork::IpNetwork;
use log::debug;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Endpoints observed at one sampling instant, keyed by remote address.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    endpoints: HashMap<SocketAddr, Endpoint>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, remote_address: &SocketAddr) -> bool {
        self.endpoints.contains_key(remote_address)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }
}

impl FromIterator<Endpoint> for Snapshot {
    /// A repeated remote address keeps the last endpoint seen.
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        let mut endpoints = HashMap::new();
        for endpoint in iter {
            endpoints.insert(endpoint.remote_address, endpoint);
        }
        Snapshot { endpoints }
    }
}

/// Drains `source` until it reports exhaustion and keeps only real connections:
/// listening sockets (unspecified remote address) and anything inside
/// `excluded` are dropped.
pub fn acquire<S: ConnectionSource>(source: &mut S, excluded: &[IpNetwork]) -> Snapshot {
    let mut raw = Vec::new();
    loop {
        match source.next_entry() {
            TableRead::Entry(endpoint) => raw.push(endpoint),
            TableRead::Exhausted => break,
        }
    }

    let total = raw.len();
    let snapshot: Snapshot = raw
        .into_iter()
        .filter(|e| !e.remote_address.ip().is_unspecified())
        .filter(|e| !excluded.iter().any(|net| net.contains(e.remote_address.ip())))
        .collect();

    debug!("Snapshot: {} table entries, {} remote endpoints kept", total, snapshot.len());
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn_table::{parse_table, StaticSource, TransportLayer};

    fn endpoint(local: &str, remote: &str) -> Endpoint {
        Endpoint {
            local_address: local.parse().unwrap(),
            remote_address: remote.parse().unwrap(),
            transport_layer: TransportLayer::Tcp,
        }
    }

    #[test]
    fn test_listening_sockets_are_dropped() {
        let mut source = StaticSource::new(vec![
            endpoint("0.0.0.0:22", "0.0.0.0:0"),
            endpoint("[::]:22", "[::]:0"),
            endpoint("10.0.0.2:50000", "93.184.216.34:443"),
        ]);

        let snapshot = acquire(&mut source, &[]);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&"93.184.216.34:443".parse().unwrap()));
        assert!(snapshot.endpoints().all(|e| !e.remote_address.ip().is_unspecified()));
    }

    #[test]
    fn test_empty_source_gives_empty_snapshot() {
        let mut source = StaticSource::new(Vec::new());
        assert!(acquire(&mut source, &[]).is_empty());
    }

    #[test]
    fn test_duplicate_remote_last_one_wins() {
        let mut source = StaticSource::new(vec![
            endpoint("10.0.0.2:50000", "1.1.1.1:443"),
            endpoint("10.0.0.2:50001", "1.1.1.1:443"),
        ]);

        let snapshot = acquire(&mut source, &[]);
        assert_eq!(snapshot.len(), 1);
        let kept = snapshot.endpoints().next().unwrap();
        assert_eq!(kept.local_address.port(), 50001);
    }

    #[test]
    fn test_excluded_networks() {
        let excluded: Vec<IpNetwork> = vec!["127.0.0.0/8".parse().unwrap()];
        let mut source = StaticSource::new(vec![
            endpoint("127.0.0.1:40000", "127.0.0.1:5432"),
            endpoint("10.0.0.2:50000", "8.8.8.8:53"),
        ]);

        let snapshot = acquire(&mut source, &excluded);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&"8.8.8.8:53".parse().unwrap()));
    }
    #[test]
    fn test_mapped_tcp6_rows_are_filtered_as_ipv4() {
        let table = "\
  sl  local_address                         remote_address                        st
   0: 0000000000000000FFFF000000000000:0016 0000000000000000FFFF000000000000:0000 0A
   1: 0000000000000000FFFF00000F02000A:C1F4 0000000000000000FFFF000022D8B85D:01BB 01
";
        let mut source = StaticSource::new(parse_table(table, true));
        assert!(acquire(&mut source, &[]).contains(&"93.184.216.34:443".parse().unwrap()));

        let excluded: Vec<IpNetwork> = vec!["93.184.216.0/24".parse().unwrap()];
        let mut source = StaticSource::new(parse_table(table, true));
        assert!(acquire(&mut source, &excluded).is_empty());
    }
}
