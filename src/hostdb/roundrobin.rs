//! Health-aware round-robin address rotation.

use crate::hostdb::status::HostStatusTracker;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Addresses of one resolved key, in resolution order, plus a rotation cursor.
///
/// The active subset (addresses not marked Down) is recomputed on every pick,
/// so a status change applies to the very next selection. Down never removes
/// an address; it only skips it while the mark holds.
pub struct RoundRobinSet {
    addrs: Box<[IpAddr]>,
    cursor: AtomicUsize,
}

impl RoundRobinSet {
    pub fn new(addrs: Vec<IpAddr>) -> Self {
        Self {
            addrs: addrs.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Addresses currently eligible for selection.
    pub fn active(&self, status: &HostStatusTracker) -> Vec<IpAddr> {
        if !status.any_down() {
            return self.addrs.to_vec();
        }
        self.addrs
            .iter()
            .copied()
            .filter(|addr| !status.is_down(*addr))
            .collect()
    }

    /// Pick the next address.
    ///
    /// Rotates over the active subset. When every address is down, rotates
    /// over the full list instead: a possibly-down origin beats none.
    /// Returns `None` only for an empty set.
    pub fn select_next(&self, status: &HostStatusTracker) -> Option<IpAddr> {
        if self.addrs.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);

        if !status.any_down() {
            return Some(self.addrs[n % self.addrs.len()]);
        }

        let active = self.active(status);
        if active.is_empty() {
            tracing::trace!(count = self.addrs.len(), "all addresses down, failing open");
            return Some(self.addrs[n % self.addrs.len()]);
        }
        Some(active[n % active.len()])
    }
}

impl fmt::Debug for RoundRobinSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinSet")
            .field("addrs", &self.addrs)
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}
