//! Static hosts file overlay.
//!
//! The parsed file lives in an immutable, versioned [`HostFileSnapshot`]
//! behind an atomically swapped pointer. Readers borrow whichever snapshot
//! is current for the duration of one lookup; a reload builds a complete new
//! snapshot before swapping it in, so nobody observes a half-built map.
//!
//! # Format
//!
//! ```text
//! # comment
//! 10.0.0.1   origin.internal origin
//! ::1        localhost6
//! ```
//!
//! The first token of a line must be a literal address; the remaining tokens
//! are aliases. When an alias appears twice, the first line wins.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// A line dropped while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// 1-based line number.
    pub line: usize,
    pub text: String,
    pub reason: &'static str,
}

/// Immutable view of one parse of the hosts file.
#[derive(Debug, Default)]
pub struct HostFileSnapshot {
    generation: u64,
    modified: Option<SystemTime>,
    hosts: HashMap<Box<str>, IpAddr>,
}

impl HostFileSnapshot {
    /// Parse hosts file text. Malformed lines are skipped and reported.
    pub fn parse(
        text: &str,
        generation: u64,
        modified: Option<SystemTime>,
    ) -> (Self, Vec<MalformedLine>) {
        let mut hosts: HashMap<Box<str>, IpAddr> = HashMap::new();
        let mut malformed = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            let Ok(addr) = first.parse::<IpAddr>() else {
                malformed.push(MalformedLine {
                    line: idx + 1,
                    text: raw.to_string(),
                    reason: "first token is not a literal address",
                });
                continue;
            };

            let mut aliases = 0;
            for alias in tokens {
                if alias.starts_with('#') {
                    break;
                }
                aliases += 1;
                hosts
                    .entry(alias.to_ascii_lowercase().into_boxed_str())
                    .or_insert(addr);
            }

            if aliases == 0 {
                malformed.push(MalformedLine {
                    line: idx + 1,
                    text: raw.to_string(),
                    reason: "address without aliases",
                });
            }
        }

        let snapshot = Self {
            generation,
            modified,
            hosts,
        };
        (snapshot, malformed)
    }

    /// Address for a normalized (lower-case) name.
    pub fn lookup(&self, name: &str) -> Option<IpAddr> {
        self.hosts.get(name).copied()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Modification time of the file this snapshot was built from.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Result of [`HostFileOverlay::maybe_reload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot is active.
    Reloaded {
        generation: u64,
        entries: usize,
        malformed: Vec<MalformedLine>,
    },
    /// The file's modification time has not changed.
    Unchanged,
    /// The check interval has not elapsed since the last check.
    NotDue,
    /// Another reload is running; this call did nothing.
    Skipped,
    /// No hosts file is configured.
    Disabled,
}

/// Atomically swappable hosts file map with time-gated reloads.
pub struct HostFileOverlay {
    path: Option<PathBuf>,
    interval: Duration,
    current: ArcSwap<HostFileSnapshot>,
    reloading: AtomicBool,
    next_check: Mutex<Option<Instant>>,
}

/// Clears the reload flag however the reload ends.
struct ReloadGuard<'a>(&'a AtomicBool);

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HostFileOverlay {
    /// Overlay backed by the file at `path`, checked at most once per `interval`.
    ///
    /// Starts with an empty snapshot (generation 0) until the first reload.
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: Some(path.into()),
            interval,
            current: ArcSwap::from_pointee(HostFileSnapshot::default()),
            reloading: AtomicBool::new(false),
            next_check: Mutex::new(None),
        }
    }

    /// Overlay with no backing file; every lookup misses.
    pub fn disabled() -> Self {
        Self {
            path: None,
            interval: Duration::ZERO,
            current: ArcSwap::from_pointee(HostFileSnapshot::default()),
            reloading: AtomicBool::new(false),
            next_check: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Address for a normalized name in the current snapshot.
    pub fn lookup(&self, name: &str) -> Option<IpAddr> {
        self.current.load().lookup(name)
    }

    /// The current snapshot; stays valid after later swaps.
    pub fn snapshot(&self) -> Arc<HostFileSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Reload the file if the check interval has elapsed and its
    /// modification time changed.
    ///
    /// Blocks on file I/O. On error the previous snapshot stays active.
    pub fn maybe_reload(&self, now: Instant) -> Result<ReloadOutcome, NetError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(ReloadOutcome::Disabled);
        };

        if self
            .reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(path = %path.display(), "skipped host file reload, update already in progress");
            return Ok(ReloadOutcome::Skipped);
        }
        let _guard = ReloadGuard(&self.reloading);

        {
            let mut next_check = self.next_check.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*next_check, Some(at) if now < at) {
                return Ok(ReloadOutcome::NotDue);
            }
            *next_check = now.checked_add(self.interval);
        }

        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .hostfile_context(path)
            .inspect_err(|e| tracing::warn!(error = %e, "host file check failed"))?;

        let current = self.current.load();
        if current.generation() > 0 && current.modified() == Some(modified) {
            return Ok(ReloadOutcome::Unchanged);
        }

        let text = fs::read_to_string(path)
            .hostfile_context(path)
            .inspect_err(|e| tracing::warn!(error = %e, "host file read failed"))?;

        let generation = current.generation() + 1;
        let (snapshot, malformed) = HostFileSnapshot::parse(&text, generation, Some(modified));
        for bad in &malformed {
            tracing::warn!(
                path = %path.display(),
                line = bad.line,
                reason = bad.reason,
                "skipping malformed host file line"
            );
        }

        let entries = snapshot.len();
        self.current.store(Arc::new(snapshot));
        tracing::info!(path = %path.display(), generation, entries, "host file loaded");

        Ok(ReloadOutcome::Reloaded {
            generation,
            entries,
            malformed,
        })
    }
}

impl std::fmt::Debug for HostFileOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFileOverlay")
            .field("path", &self.path)
            .field("interval", &self.interval)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
