//! System DNS resolver using getaddrinfo.
//!
//! This resolver uses the operating system's native DNS resolution via
//! `getaddrinfo`, executed in a thread pool to avoid blocking the async runtime.
//!
//! # When to Use
//!
//! - When you need to respect system DNS configuration (/etc/resolv.conf, etc.)
//! - When DoH/DoT is not required
//! - As a fallback when hickory-dns is not available
//!
//! `getaddrinfo` reports no TTL, so every answer carries the fixed TTL the
//! resolver was built with. Reverse lookups are not supported.

use super::{Resolution, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::hostdb::key::{KeyTarget, RecordKind, ResolutionKey};
use std::{io, net::ToSocketAddrs, time::Duration};

/// TTL given to answers when none is configured.
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// System DNS resolver using `getaddrinfo` in a thread pool.
///
/// This resolver wraps the standard library's `ToSocketAddrs` trait and
/// executes resolution in `tokio::task::spawn_blocking` to avoid blocking
/// the async runtime.
#[derive(Clone, Debug)]
pub struct GaiResolver {
    ttl: Duration,
}

impl Default for GaiResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GaiResolver {
    /// Creates a new `GaiResolver` with a 60 second answer TTL.
    pub fn new() -> Self {
        Self { ttl: DEFAULT_TTL }
    }

    /// Set the TTL reported for every answer.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, key: ResolutionKey) -> Resolving {
        let ttl = self.ttl;
        Box::pin(async move {
            let host = match (key.target(), key.kind()) {
                (KeyTarget::Name(name), _) => name.to_string(),
                (KeyTarget::Literal(addr), RecordKind::Address) => {
                    return Ok(Resolution::addresses(vec![*addr], ttl));
                }
                (KeyTarget::Literal(addr), RecordKind::Pointer) => {
                    tracing::debug!(addr = %addr, "getaddrinfo cannot reverse resolve");
                    return Err(NetError::NameNotResolved);
                }
            };
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<_>>())
            })
            .await;

            // Handle task join error (cancellation, panic)
            let mut addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    NetError::NameNotResolved
                })?
                .dns_context(&domain)
                .inspect_err(|e| tracing::debug!(domain = %domain, error = %e, "DNS resolution failed"))?;

            // getaddrinfo repeats addresses once per socket type
            let mut seen = Vec::with_capacity(addrs.len());
            addrs.retain(|ip| {
                if seen.contains(ip) {
                    false
                } else {
                    seen.push(*ip);
                    true
                }
            });

            if addrs.is_empty() {
                return Err(NetError::dns_failed(
                    domain,
                    io::Error::new(io::ErrorKind::NotFound, "No addresses returned by getaddrinfo"),
                ));
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Resolution::addresses(addrs, ttl))
        })
    }
}
