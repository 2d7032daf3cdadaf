//! Domain Resolution Cache
//!
//! Reverse DNS (PTR) lookup with per-process memoization. Every IP is looked
//! up at most once; failures are cached as the `unknown.na` sentinel so an
//! unresolvable address is never retried.

use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

pub const UNKNOWN_DOMAIN: &str = "unknown.na";
pub const UNKNOWN_NAME: &str = "unknown";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("lookup timed out")]
    Timeout,
    #[error("no PTR record")]
    NoRecord,
    #[error("malformed domain '{0}'")]
    Malformed(String),
    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// Resolved (domain, short name) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEntry {
    pub domain: String,
    pub name: String,
}

impl DomainEntry {
    pub fn unknown() -> Self {
        DomainEntry {
            domain: UNKNOWN_DOMAIN.to_string(),
            name: UNKNOWN_NAME.to_string(),
        }
    }

    /// Builds an entry from a looked-up domain, deriving the short name.
    pub fn from_domain(domain: &str) -> Result<Self, ResolutionFailure> {
        let domain = domain.trim_end_matches('.');
        let name = short_name(domain).ok_or_else(|| ResolutionFailure::Malformed(domain.to_string()))?;
        Ok(DomainEntry {
            domain: domain.to_string(),
            name: name.to_string(),
        })
    }
}

/// First of the last two labels: `mail.example.com` -> `example`.
/// Domains with fewer than two labels have no short name.
pub fn short_name(domain: &str) -> Option<&str> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    let name = labels[labels.len() - 2];
    let ext = labels[labels.len() - 1];
    if name.is_empty() || ext.is_empty() {
        return None;
    }
    Some(name)
}

/// One reverse lookup against some resolver.
pub trait ReverseLookup {
    fn reverse(&self, ip: IpAddr) -> impl Future<Output = Result<String, ResolutionFailure>> + Send;
}

/// Reverse lookups through the system resolver configuration.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
    timeout: Option<Duration>,
}

impl SystemResolver {
    /// `timeout_ms == 0` leaves lookups unbounded.
    pub fn new(timeout_ms: u64) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("System resolver config unavailable ({}), using Google DNS", e);
            use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
            TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
        });

        SystemResolver {
            resolver,
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }
}

impl ReverseLookup for SystemResolver {
    fn reverse(&self, ip: IpAddr) -> impl Future<Output = Result<String, ResolutionFailure>> + Send {
        let resolver = self.resolver.clone();
        let timeout = self.timeout;

        async move {
            // Perform reverse DNS lookup with timeout
            let resolve_future = resolver.reverse_lookup(ip);
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, resolve_future)
                    .await
                    .map_err(|_| ResolutionFailure::Timeout)?,
                None => resolve_future.await,
            };

            match result {
                Ok(lookup) => lookup
                    .iter()
                    .next()
                    .map(|name| name.to_string().trim_end_matches('.').to_string())
                    .ok_or(ResolutionFailure::NoRecord),
                Err(e) => match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => Err(ResolutionFailure::NoRecord),
                    _ => Err(ResolutionFailure::Lookup(e.to_string())),
                },
            }
        }
    }
}

/// Memoizing IP -> domain map. Entries are never evicted.
pub struct DomainCache<R> {
    cache: HashMap<IpAddr, DomainEntry>,
    lookup: R,
}

impl<R: ReverseLookup> DomainCache<R> {
    pub fn new(lookup: R) -> Self {
        DomainCache {
            cache: HashMap::new(),
            lookup,
        }
    }

    pub async fn resolve(&mut self, ip: IpAddr) -> DomainEntry {
        // Check cache first
        if let Some(entry) = self.cache.get(&ip) {
            return entry.clone();
        }

        // Perform reverse DNS lookup
        let entry = match self.lookup.reverse(ip).await.and_then(|d| DomainEntry::from_domain(&d)) {
            Ok(entry) => {
                debug!("DNS resolved {} -> {}", ip, entry.domain);
                entry
            }
            Err(e) => {
                debug!("DNS reverse lookup failed for {}: {}", ip, e);
                DomainEntry::unknown()
            }
        };

        // Cache the result, failures included
        self.cache.insert(ip, entry.clone());
        entry
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory resolver that counts how often it is asked.
    #[derive(Clone, Default)]
    pub struct FakeLookup {
        answers: HashMap<IpAddr, Result<String, ResolutionFailure>>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeLookup {
        pub fn with(mut self, ip: &str, answer: Result<&str, ResolutionFailure>) -> Self {
            self.answers.insert(ip.parse().unwrap(), answer.map(str::to_string));
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReverseLookup for FakeLookup {
        fn reverse(&self, ip: IpAddr) -> impl Future<Output = Result<String, ResolutionFailure>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self
                .answers
                .get(&ip)
                .cloned()
                .unwrap_or(Err(ResolutionFailure::NoRecord));
            async move { answer }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeLookup;
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("mail.example.com"), Some("example"));
        assert_eq!(short_name("example.com"), Some("example"));
        assert_eq!(short_name("a.b.c.d.co"), Some("d"));
        assert_eq!(short_name("localhost"), None);
        assert_eq!(short_name("example."), None);
    }

    #[test]
    fn test_entry_strips_trailing_dot() {
        let entry = DomainEntry::from_domain("dns.google.").unwrap();
        assert_eq!(entry.domain, "dns.google");
        assert_eq!(entry.name, "dns");
    }

    #[tokio::test]
    async fn test_resolves_once_per_ip() {
        let fake = FakeLookup::default().with("93.184.216.34", Ok("mail.example.com"));
        let mut cache = DomainCache::new(fake.clone());
        let ip: IpAddr = "93.184.216.34".parse().unwrap();

        let first = cache.resolve(ip).await;
        let second = cache.resolve(ip).await;

        assert_eq!(fake.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.domain, "mail.example.com");
        assert_eq!(first.name, "example");
    }

    #[tokio::test]
    async fn test_failures_are_cached_without_retry() {
        let fake = FakeLookup::default().with("10.1.1.1", Err(ResolutionFailure::Timeout));
        let mut cache = DomainCache::new(fake.clone());
        let ip: IpAddr = "10.1.1.1".parse().unwrap();

        assert_eq!(cache.resolve(ip).await, DomainEntry::unknown());
        assert_eq!(cache.resolve(ip).await, DomainEntry::unknown());
        assert_eq!(fake.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_domain_becomes_unknown() {
        let fake = FakeLookup::default().with("192.168.1.1", Ok("router"));
        let mut cache = DomainCache::new(fake.clone());

        let entry = cache.resolve("192.168.1.1".parse().unwrap()).await;
        assert_eq!(entry.domain, UNKNOWN_DOMAIN);
        assert_eq!(entry.name, UNKNOWN_NAME);
    }

    #[tokio::test]
    async fn test_distinct_ips_each_resolved() {
        let fake = FakeLookup::default()
            .with("1.1.1.1", Ok("one.one.one.one"))
            .with("8.8.8.8", Ok("dns.google"));
        let mut cache = DomainCache::new(fake.clone());

        cache.resolve("1.1.1.1".parse().unwrap()).await;
        cache.resolve("8.8.8.8".parse().unwrap()).await;
        cache.resolve("1.1.1.1".parse().unwrap()).await;

        assert_eq!(fake.calls(), 2);
        assert_eq!(cache.len(), 2);
    }
}
