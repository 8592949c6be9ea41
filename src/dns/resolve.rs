//! Core DNS resolution types and traits.
//!
//! This module defines the `Resolve` trait and supporting types that form
//! the boundary between the host database and the wire-level resolver.

use crate::base::neterror::NetError;
use crate::hostdb::key::ResolutionKey;
use std::{future::Future, net::IpAddr, pin::Pin, sync::Arc, time::Duration};

/// Answer produced by a resolver for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Addresses in resolution order. For reverse lookups, the queried address.
    pub addrs: Vec<IpAddr>,
    /// Host name returned by a reverse (PTR) lookup.
    pub hostname: Option<Box<str>>,
    /// Time-to-live reported by the upstream answer.
    pub ttl: Duration,
}

impl Resolution {
    /// Forward answer.
    pub fn addresses(addrs: Vec<IpAddr>, ttl: Duration) -> Self {
        Self {
            addrs,
            hostname: None,
            ttl,
        }
    }

    /// Reverse answer for `addr`.
    pub fn pointer(addr: IpAddr, hostname: impl Into<Box<str>>, ttl: Duration) -> Self {
        Self {
            addrs: vec![addr],
            hostname: Some(hostname.into()),
            ttl,
        }
    }
}

/// Alias for the `Future` type returned by a DNS resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Resolution, NetError>> + Send>>;

/// Trait for DNS resolution.
///
/// This is the resolver collaborator of the host database, equivalent
/// to Chromium's `HostResolver`. Implementations must be thread-safe.
///
/// # Design Notes
///
/// - Uses `&self` for concurrent resolution without mutable access.
/// - Returns boxed futures for trait object compatibility.
/// - The host database drives the returned future on its own task, so the
///   future may complete on any worker thread.
/// - Each call must resolve exactly once; timeouts are applied by the caller.
pub trait Resolve: Send + Sync {
    /// Resolves a key to addresses (forward) or to a host name (reverse).
    fn resolve(&self, key: ResolutionKey) -> Resolving;
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, key: ResolutionKey) -> Resolving {
        (**self).resolve(key)
    }
}
