//! Host database configuration.
//!
//! Values are expressed in seconds, matching the proxy's records
//! configuration. Every field has a default, so a partial JSON document
//! is a valid configuration.

use crate::base::neterror::NetError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How the TTL reported by the resolver is combined with `ttl_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlMode {
    /// Use the resolver's TTL.
    #[default]
    Obey,
    /// Use the configured TTL, ignoring the resolver.
    Ignore,
    /// Use the smaller of the two.
    Min,
    /// Use the larger of the two.
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostDbConfig {
    pub ttl_mode: TtlMode,
    /// Configured TTL, combined with the resolver TTL per `ttl_mode`.
    pub ttl_secs: u64,
    /// Grace window after expiry during which a stale answer is served.
    pub serve_stale_secs: u64,
    /// Lifetime of a cached resolution failure.
    pub negative_ttl_secs: u64,
    /// Resolver calls running longer than this fail with `DnsTimedOut`.
    pub lookup_timeout_secs: u64,
    /// Static hosts file consulted before the cache.
    pub host_file: Option<PathBuf>,
    /// Minimum time between hosts file modification checks.
    pub host_file_interval_secs: u64,
    /// Store capacity; older entries are evicted beyond it.
    pub max_entries: usize,
    /// Addresses kept per resolved name.
    pub max_addresses: usize,
}

impl Default for HostDbConfig {
    fn default() -> Self {
        Self {
            ttl_mode: TtlMode::Obey,
            ttl_secs: 86_400,
            serve_stale_secs: 30,
            negative_ttl_secs: 5,
            lookup_timeout_secs: 30,
            host_file: None,
            host_file_interval_secs: 86_400,
            max_entries: 120_000,
            max_addresses: 16,
        }
    }
}

impl HostDbConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(|e| {
            tracing::warn!(error = %e, "invalid host database configuration");
            NetError::InvalidArgument
        })
    }

    pub fn with_ttl_mode(mut self, mode: TtlMode, ttl: Duration) -> Self {
        self.ttl_mode = mode;
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_serve_stale(mut self, grace: Duration) -> Self {
        self.serve_stale_secs = grace.as_secs();
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_host_file(mut self, path: impl Into<PathBuf>, interval: Duration) -> Self {
        self.host_file = Some(path.into());
        self.host_file_interval_secs = interval.as_secs();
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_addresses(mut self, max_addresses: usize) -> Self {
        self.max_addresses = max_addresses;
        self
    }

    pub fn serve_stale(&self) -> Duration {
        Duration::from_secs(self.serve_stale_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn host_file_interval(&self) -> Duration {
        Duration::from_secs(self.host_file_interval_secs)
    }

    /// TTL to cache an answer for, given the TTL the resolver reported.
    pub fn effective_ttl(&self, resolver_ttl: Duration) -> Duration {
        let configured = Duration::from_secs(self.ttl_secs);
        match self.ttl_mode {
            TtlMode::Obey => resolver_ttl,
            TtlMode::Ignore => configured,
            TtlMode::Min => resolver_ttl.min(configured),
            TtlMode::Max => resolver_ttl.max(configured),
        }
    }
}
