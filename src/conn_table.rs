//! Connection Table Source
//!
//! Reads the kernel's TCP socket table from `/proc/net/tcp` and
//! `/proc/net/tcp6`. Entries are handed out one at a time; running out is
//! reported as [`TableRead::Exhausted`], which is the normal end of a read and
//! not an error.

use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

const PROC_NET_TCP: &str = "/proc/net/tcp";
const PROC_NET_TCP6: &str = "/proc/net/tcp6";

/// Protocol tag carried on every endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportLayer {
    Tcp,
}

impl fmt::Display for TransportLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportLayer::Tcp => f.write_str("tcp"),
        }
    }
}

/// One row of the connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub local_address: SocketAddr,
    pub remote_address: SocketAddr,
    pub transport_layer: TransportLayer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRead {
    Entry(Endpoint),
    Exhausted,
}

pub trait ConnectionSource {
    /// Starts a new read of the table. Sources that are not re-readable keep
    /// the default no-op.
    fn refresh(&mut self) {}

    /// Next endpoint in the table, or `Exhausted` once nothing is left for this cycle.
    fn next_entry(&mut self) -> TableRead;
}

/// `/proc/net/tcp{,6}` reader. Each `refresh` loads a
/// fresh copy of the table which is then drained through [`ConnectionSource`].
pub struct ProcNetTcp {
    paths: Vec<(PathBuf, bool)>,
    pending: VecDeque<Endpoint>,
}

impl ProcNetTcp {
    pub fn new(include_ipv6: bool) -> Self {
        let mut paths = vec![(PathBuf::from(PROC_NET_TCP), false)];
        if include_ipv6 {
            paths.push((PathBuf::from(PROC_NET_TCP6), true));
        }
        ProcNetTcp {
            paths,
            pending: VecDeque::new(),
        }
    }
}

impl ConnectionSource for ProcNetTcp {
    /// Reads every configured table file. Files that cannot be read are
    /// skipped with a warning, leaving fewer (possibly zero) entries.
    fn refresh(&mut self) {
        self.pending.clear();
        for (path, ipv6) in &self.paths {
            match fs::read_to_string(path) {
                Ok(content) => self.pending.extend(parse_table(&content, *ipv6)),
                Err(e) => {
                    if *ipv6 {
                        debug!("Skipping {}: {}", path.display(), e);
                    } else {
                        warn!("Failed to read {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    fn next_entry(&mut self) -> TableRead {
        match self.pending.pop_front() {
            Some(endpoint) => TableRead::Entry(endpoint),
            None => TableRead::Exhausted,
        }
    }
}

/// Parses the text of a `/proc/net/tcp`-format file. The header line and any
/// malformed rows are skipped.
pub fn parse_table(content: &str, ipv6: bool) -> Vec<Endpoint> {
    let mut result = Vec::new();
    for line in content.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }

        let local_address = match parse_addr_port(parts[1], ipv6) {
            Some(v) => v,
            None => continue,
        };
        let remote_address = match parse_addr_port(parts[2], ipv6) {
            Some(v) => v,
            None => continue,
        };

        result.push(Endpoint {
            local_address,
            remote_address,
            transport_layer: TransportLayer::Tcp,
        });
    }
    result
}

fn parse_addr_port(s: &str, ipv6: bool) -> Option<SocketAddr> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = if ipv6 {
        IpAddr::V6(parse_ipv6(addr_hex)?)
    } else {
        IpAddr::V4(parse_ipv4(addr_hex)?)
    };
    // Dual-stack sockets list IPv4 peers as ::ffff:a.b.c.d
    Some(SocketAddr::new(ip.to_canonical(), port))
}

// The kernel prints each 32-bit word in host byte order (little endian here).
fn parse_ipv4(hex: &str) -> Option<Ipv4Addr> {
    if hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    let bytes = raw.to_le_bytes();
    Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn parse_ipv6(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for i in 0..4 {
        let word = u32::from_str_radix(&hex[i * 8..(i + 1) * 8], 16).ok()?;
        bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    Some(Ipv6Addr::from(bytes))
}

/// Fixed list of endpoints, used to drive the pipeline without a kernel table.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct StaticSource {
    entries: VecDeque<Endpoint>,
}

#[cfg(test)]
impl StaticSource {
    pub fn new(entries: Vec<Endpoint>) -> Self {
        StaticSource {
            entries: entries.into(),
        }
    }
}

#[cfg(test)]
impl ConnectionSource for StaticSource {
    fn next_entry(&mut self) -> TableRead {
        match self.entries.pop_front() {
            Some(endpoint) => TableRead::Entry(endpoint),
            None => TableRead::Exhausted,
        }
    }
}
