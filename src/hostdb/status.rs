//! Per-origin health state.
//!
//! The tracker is a passive store: an external health checker writes it,
//! and round-robin selection reads it on every pick. It never probes and
//! never resets a status on its own.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// Identity of an origin host. Exclusion is applied per address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(IpAddr);

impl HostId {
    pub fn new(addr: IpAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> IpAddr {
        self.0
    }
}

impl From<IpAddr> for HostId {
    fn from(addr: IpAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

/// Why a host was marked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownReason {
    /// Active health check failed.
    Active,
    /// Marked down locally by the proxy.
    Local,
    /// Operator action.
    Manual,
    /// The proxy detected it is talking to itself.
    SelfDetect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatusRecord {
    pub host: HostId,
    pub status: HostStatus,
    pub down_since: Option<OffsetDateTime>,
    pub reason: Option<DownReason>,
}

/// Thread-safe map of host status records.
#[derive(Clone, Default)]
pub struct HostStatusTracker {
    records: Arc<DashMap<HostId, HostStatusRecord>>,
    /// Number of records currently Down; zero lets selection skip lookups.
    down: Arc<AtomicUsize>,
}

impl HostStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status for `host`.
    ///
    /// `down_since` and `reason` are kept only for `Down`. Returns whether the
    /// stored record changed; repeating an identical call is a no-op.
    pub fn set_status(
        &self,
        host: impl Into<HostId>,
        status: HostStatus,
        down_since: Option<OffsetDateTime>,
        reason: Option<DownReason>,
    ) -> bool {
        let host = host.into();
        let (down_since, reason) = match status {
            HostStatus::Down => (down_since, reason),
            HostStatus::Up | HostStatus::Unknown => (None, None),
        };
        let record = HostStatusRecord {
            host,
            status,
            down_since,
            reason,
        };

        // Counter moves while the entry is locked so it never goes negative
        let previous = match self.records.entry(host) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == record {
                    return false;
                }
                let previous = entry.get().status;
                entry.insert(record);
                self.adjust_down_count(previous, status);
                previous
            }
            Entry::Vacant(entry) => {
                if status == HostStatus::Unknown {
                    return false;
                }
                entry.insert(record);
                self.adjust_down_count(HostStatus::Unknown, status);
                HostStatus::Unknown
            }
        };

        tracing::info!(host = %host, from = ?previous, to = ?status, reason = ?reason, "host status changed");
        true
    }

    fn adjust_down_count(&self, from: HostStatus, to: HostStatus) {
        match (from == HostStatus::Down, to == HostStatus::Down) {
            (false, true) => {
                self.down.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.down.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
    }

    /// Mark `host` down as of now.
    pub fn mark_down(&self, host: impl Into<HostId>, reason: DownReason) -> bool {
        self.set_status(
            host,
            HostStatus::Down,
            Some(OffsetDateTime::now_utc()),
            Some(reason),
        )
    }

    pub fn mark_up(&self, host: impl Into<HostId>) -> bool {
        self.set_status(host, HostStatus::Up, None, None)
    }

    pub fn get_status(&self, host: impl Into<HostId>) -> HostStatus {
        self.records
            .get(&host.into())
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn record(&self, host: impl Into<HostId>) -> Option<HostStatusRecord> {
        self.records.get(&host.into()).map(|r| r.clone())
    }

    /// Whether `addr` is excluded from selection.
    pub fn is_down(&self, addr: IpAddr) -> bool {
        self.any_down() && self.get_status(addr) == HostStatus::Down
    }

    /// Whether any host is currently marked down.
    pub fn any_down(&self) -> bool {
        self.down.load(Ordering::Acquire) > 0
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Debug for HostStatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostStatusTracker")
            .field("hosts", &self.records.len())
            .field("down", &self.down.load(Ordering::Relaxed))
            .finish()
    }
}
