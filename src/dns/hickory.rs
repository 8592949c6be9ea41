//! Async DNS resolver using hickory-dns.
//!
//! This resolver provides fully async DNS resolution with support for:
//! - DNS-over-HTTPS (DoH)
//! - DNS-over-TLS (DoT)
//! - System DNS configuration auto-detection
//! - Reverse (PTR) lookups
//!
//! # TTL
//!
//! The answer's TTL is taken from the lookup's `valid_until`, so the host
//! database can honor it (or override it, depending on its TTL mode).

use super::{Resolution, Resolve, Resolving};
use crate::base::neterror::NetError;
use crate::hostdb::key::{KeyTarget, RecordKind, ResolutionKey};
use hickory_resolver::{
    config::{LookupIpStrategy, ResolverConfig},
    name_server::TokioConnectionProvider,
    TokioResolver,
};
use std::{
    io,
    net::IpAddr,
    sync::LazyLock,
    time::{Duration, Instant},
};

/// Async DNS resolver backed by hickory-dns.
///
/// This resolver is lazily initialized on first use and shared across
/// all instances via a static `LazyLock`. It automatically configures
/// itself based on the system's DNS settings.
///
/// # Example
///
/// ```rust,ignore
/// use hostdb::dns::{HickoryResolver, Resolve};
/// use hostdb::hostdb::key::ResolutionKey;
///
/// let resolver = HickoryResolver::new();
/// let answer = resolver.resolve(ResolutionKey::for_name("example.com")?).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HickoryResolver {
    resolver: &'static LazyLock<TokioResolver>,
}

impl HickoryResolver {
    /// Creates a new `HickoryResolver`.
    ///
    /// The underlying resolver is lazily initialized on first DNS query.
    /// It will attempt to read system DNS configuration; if that fails,
    /// it falls back to sensible defaults.
    pub fn new() -> Self {
        static RESOLVER: LazyLock<TokioResolver> = LazyLock::new(|| {
            let mut builder = match TokioResolver::builder_tokio() {
                Ok(builder) => {
                    tracing::debug!("Using system DNS configuration");
                    builder
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to read system DNS config, using defaults"
                    );
                    TokioResolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            };

            // Enable dual-stack; the host database orders and rotates the answers
            builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

            builder.build()
        });

        Self {
            resolver: &RESOLVER,
        }
    }

    async fn forward(&self, domain: &str) -> Result<Resolution, NetError> {
        tracing::debug!(domain = %domain, "resolving via hickory-dns");

        let lookup = self
            .resolver
            .lookup_ip(domain)
            .await
            .map_err(|e| lookup_failed(domain, e))?;

        let ttl = remaining(lookup.valid_until());
        let addrs: Vec<IpAddr> = lookup.iter().collect();

        if addrs.is_empty() {
            return Err(NetError::dns_failed(
                domain,
                io::Error::new(io::ErrorKind::NotFound, "No addresses returned"),
            ));
        }

        tracing::debug!(domain = %domain, count = addrs.len(), ttl = ?ttl, "hickory-dns resolution complete");
        Ok(Resolution::addresses(addrs, ttl))
    }

    async fn reverse(&self, addr: IpAddr) -> Result<Resolution, NetError> {
        let domain = addr.to_string();
        tracing::debug!(addr = %addr, "reverse resolving via hickory-dns");

        let lookup = self
            .resolver
            .reverse_lookup(addr)
            .await
            .map_err(|e| lookup_failed(&domain, e))?;

        let ttl = remaining(lookup.valid_until());
        let hostname = lookup.iter().next().map(|ptr| {
            let name = ptr.to_string();
            name.strip_suffix('.').map(str::to_owned).unwrap_or(name)
        });

        match hostname {
            Some(hostname) => Ok(Resolution::pointer(addr, hostname, ttl)),
            None => Err(NetError::dns_failed(
                domain,
                io::Error::new(io::ErrorKind::NotFound, "No PTR records returned"),
            )),
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for HickoryResolver {
    fn resolve(&self, key: ResolutionKey) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            match (key.target(), key.kind()) {
                (KeyTarget::Name(name), _) => resolver.forward(name).await,
                (KeyTarget::Literal(addr), RecordKind::Pointer) => resolver.reverse(*addr).await,
                (KeyTarget::Literal(addr), RecordKind::Address) => {
                    Ok(Resolution::addresses(vec![*addr], Duration::MAX))
                }
            }
        })
    }
}

fn remaining(valid_until: Instant) -> Duration {
    valid_until.saturating_duration_since(Instant::now())
}

fn lookup_failed(domain: &str, e: impl std::fmt::Display) -> NetError {
    tracing::debug!(domain = %domain, error = %e, "hickory-dns lookup failed");
    NetError::dns_failed(domain, io::Error::new(io::ErrorKind::NotFound, e.to_string()))
}
