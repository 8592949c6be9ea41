//! Immutable cache entries.
//!
//! An entry is never modified after publication: a refresh builds a new
//! entry and swaps it into the store, so readers holding the old `Arc` keep
//! a consistent view. The only interior state is the round-robin cursor.

use crate::base::neterror::NetError;
use crate::dns::Resolution;
use crate::hostdb::key::ResolutionKey;
use crate::hostdb::roundrobin::RoundRobinSet;
use crate::hostdb::status::HostStatusTracker;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;

/// Longest TTL an expiring entry keeps, the largest value a DNS TTL can carry.
const MAX_TTL: Duration = Duration::from_secs(i32::MAX as u64);

/// Clamped TTL and the instant it runs out.
fn expiry(ttl: Duration, now: Instant) -> (Duration, Option<Instant>) {
    let ttl = ttl.min(MAX_TTL);
    // An unrepresentable deadline expires at once rather than never
    (ttl, Some(now.checked_add(ttl).unwrap_or(now)))
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Answered by the resolver.
    Resolved,
    /// Hosts file override.
    Static,
    /// The key itself was an address.
    Literal,
}

/// Freshness of an entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past expiry but inside the grace window: usable, needs a refresh.
    Stale,
    /// Unusable.
    Expired,
}

#[derive(Debug)]
pub struct CacheEntry {
    key: ResolutionKey,
    addrs: RoundRobinSet,
    hostname: Option<Box<str>>,
    ttl: Duration,
    /// `None` for entries that never expire (static and literal).
    expires_at: Option<Instant>,
    failure: Option<NetError>,
    source: Source,
}

impl CacheEntry {
    /// Entry for a resolver answer, keeping at most `max_addresses` addresses.
    pub fn resolved(
        key: ResolutionKey,
        resolution: Resolution,
        ttl: Duration,
        now: Instant,
        max_addresses: usize,
    ) -> Self {
        let Resolution {
            mut addrs,
            hostname,
            ..
        } = resolution;
        addrs.truncate(max_addresses.max(1));
        let (ttl, expires_at) = expiry(ttl, now);

        Self {
            key,
            addrs: RoundRobinSet::new(addrs),
            hostname,
            ttl,
            expires_at,
            failure: None,
            source: Source::Resolved,
        }
    }

    /// Negative entry recording a resolution failure.
    pub fn negative(key: ResolutionKey, failure: NetError, ttl: Duration, now: Instant) -> Self {
        let (ttl, expires_at) = expiry(ttl, now);
        Self {
            key,
            addrs: RoundRobinSet::new(Vec::new()),
            hostname: None,
            ttl,
            expires_at,
            failure: Some(failure),
            source: Source::Resolved,
        }
    }

    /// Permanent single-address entry for hosts file and literal answers.
    pub fn fixed(key: ResolutionKey, addr: IpAddr, source: Source) -> Self {
        Self {
            key,
            addrs: RoundRobinSet::new(vec![addr]),
            hostname: None,
            ttl: Duration::MAX,
            expires_at: None,
            failure: None,
            source,
        }
    }

    pub fn key(&self) -> &ResolutionKey {
        &self.key
    }

    pub fn addresses(&self) -> &[IpAddr] {
        self.addrs.addrs()
    }

    /// Addresses paired with `port`, in resolution order.
    pub fn socket_addrs(&self, port: u16) -> Vec<SocketAddr> {
        self.addresses()
            .iter()
            .map(|ip| SocketAddr::new(*ip, port))
            .collect()
    }

    pub fn round_robin(&self) -> &RoundRobinSet {
        &self.addrs
    }

    /// Next address by health-aware rotation.
    pub fn select_next(&self, status: &HostStatusTracker) -> Option<IpAddr> {
        self.addrs.select_next(status)
    }

    /// Host name from a reverse lookup.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// TTL the entry was cached with.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Time left before expiry; `Duration::MAX` for permanent entries.
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        match self.expires_at {
            Some(at) => at.saturating_duration_since(now),
            None => Duration::MAX,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.failure.is_some()
    }

    /// The failure a negative entry records.
    pub fn failure(&self) -> Option<&NetError> {
        self.failure.as_ref()
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Classify against `now`. Negative entries get no grace window.
    pub fn freshness(&self, now: Instant, grace: Duration) -> Freshness {
        let Some(expires_at) = self.expires_at else {
            return Freshness::Fresh;
        };
        if now < expires_at {
            return Freshness::Fresh;
        }
        if self.is_negative() {
            return Freshness::Expired;
        }
        match expires_at.checked_add(grace) {
            Some(limit) if now >= limit => Freshness::Expired,
            _ => Freshness::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key() -> ResolutionKey {
        ResolutionKey::for_name("a.example").unwrap()
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(1, 2, 3, last))
    }

    #[test]
    fn test_freshness_windows() {
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        let grace = Duration::from_secs(30);
        let entry = CacheEntry::resolved(
            key(),
            Resolution::addresses(vec![ip(4)], ttl),
            ttl,
            now,
            16,
        );

        assert_eq!(entry.freshness(now, grace), Freshness::Fresh);
        assert_eq!(entry.freshness(now + Duration::from_secs(59), grace), Freshness::Fresh);
        assert_eq!(entry.freshness(now + ttl, grace), Freshness::Stale);
        assert_eq!(entry.freshness(now + Duration::from_secs(89), grace), Freshness::Stale);
        assert_eq!(entry.freshness(now + ttl + grace, grace), Freshness::Expired);
    }

    #[test]
    fn test_negative_has_no_grace() {
        let now = Instant::now();
        let entry = CacheEntry::negative(
            key(),
            NetError::NameNotResolved,
            Duration::from_secs(5),
            now,
        );

        assert!(entry.is_negative());
        assert!(entry.addresses().is_empty());
        assert_eq!(entry.failure(), Some(&NetError::NameNotResolved));
        assert_eq!(entry.freshness(now, Duration::from_secs(30)), Freshness::Fresh);
        assert_eq!(
            entry.freshness(now + Duration::from_secs(5), Duration::from_secs(30)),
            Freshness::Expired
        );
    }

    #[test]
    fn test_fixed_entry_never_expires() {
        let entry = CacheEntry::fixed(key(), ip(9), Source::Static);
        let later = Instant::now() + Duration::from_secs(10 * 365 * 86_400);

        assert_eq!(entry.freshness(later, Duration::ZERO), Freshness::Fresh);
        assert_eq!(entry.remaining_ttl(later), Duration::MAX);
        assert_eq!(entry.source(), Source::Static);
    }

    #[test]
    fn test_huge_ttl_still_expires() {
        let now = Instant::now();
        let entry = CacheEntry::resolved(
            key(),
            Resolution::addresses(vec![ip(4)], Duration::MAX),
            Duration::MAX,
            now,
            16,
        );

        assert!(entry.expires_at().is_some());
        assert_eq!(entry.ttl(), MAX_TTL);
        assert_eq!(entry.remaining_ttl(now), MAX_TTL);
        assert_eq!(entry.freshness(now + MAX_TTL, Duration::ZERO), Freshness::Expired);

        let negative = CacheEntry::negative(key(), NetError::NameNotResolved, Duration::MAX, now);
        assert!(negative.expires_at().is_some());
        assert_eq!(negative.freshness(now + MAX_TTL, Duration::ZERO), Freshness::Expired);
    }

    #[test]
    fn test_address_cap_and_socket_addrs() {
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        let entry = CacheEntry::resolved(
            key(),
            Resolution::addresses(vec![ip(1), ip(2), ip(3)], ttl),
            ttl,
            now,
            2,
        );

        assert_eq!(entry.addresses(), &[ip(1), ip(2)]);
        assert_eq!(
            entry.socket_addrs(443),
            vec![SocketAddr::new(ip(1), 443), SocketAddr::new(ip(2), 443)]
        );
        assert_eq!(entry.remaining_ttl(now + Duration::from_secs(20)), Duration::from_secs(40));
    }
}
