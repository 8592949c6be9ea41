//! Lookup coordination.
//!
//! [`HostDb`] is the entry point used by the request pipeline. A lookup is
//! answered from the hosts file, then from the store; a miss registers the
//! caller as a waiter on the key's pending lookup. Exactly one resolver call
//! runs per key at a time, and its result is published to the store before
//! being fanned out to every waiter in registration order.
//!
//! Locks are never held across a resolver call or a scheduler call: the
//! pending table decides who starts a resolution, and the resolution itself
//! is spawned after the shard guard is released.

use crate::base::neterror::NetError;
use crate::dns::{Resolution, Resolve};
use crate::hostdb::config::HostDbConfig;
use crate::hostdb::entry::{CacheEntry, Freshness, Source};
use crate::hostdb::hostfile::{HostFileOverlay, ReloadOutcome};
use crate::hostdb::key::{RecordKind, ResolutionKey};
use crate::hostdb::schedule::{Schedule, TokioScheduler};
use crate::hostdb::status::{DownReason, HostId, HostStatus, HostStatusTracker};
use crate::hostdb::store::{CacheStats, CacheStore, Classification};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::{Future, IntoFuture};
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Shortest delay between scheduled hosts file checks.
const MIN_RELOAD_DELAY: Duration = Duration::from_secs(1);

/// Period of the background sweep for entries past their grace window.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

type Delivery = Result<HostRecord, NetError>;

/// A successful lookup answer.
#[derive(Debug, Clone)]
pub struct HostRecord {
    entry: Arc<CacheEntry>,
    freshness: Freshness,
}

impl HostRecord {
    fn deliver(entry: Arc<CacheEntry>, freshness: Freshness) -> Delivery {
        match entry.failure() {
            Some(failure) => Err(failure.clone()),
            None => Ok(Self { entry, freshness }),
        }
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    pub fn addresses(&self) -> &[IpAddr] {
        self.entry.addresses()
    }

    pub fn socket_addrs(&self, port: u16) -> Vec<SocketAddr> {
        self.entry.socket_addrs(port)
    }

    /// Host name of a reverse lookup answer.
    pub fn hostname(&self) -> Option<&str> {
        self.entry.hostname()
    }

    /// TTL the answer was cached with.
    pub fn ttl(&self) -> Duration {
        self.entry.ttl()
    }

    pub fn source(&self) -> Source {
        self.entry.source()
    }

    /// Freshness when the answer was handed out.
    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Outcome of starting a lookup.
///
/// Cached answers are `Ready` without suspending. A miss is `Pending`; await
/// it (or the `Lookup` itself) for the resolver's answer.
#[derive(Debug)]
pub enum Lookup {
    Ready(Result<HostRecord, NetError>),
    Pending(Waiter),
}

impl Lookup {
    pub fn is_pending(&self) -> bool {
        matches!(self, Lookup::Pending(_))
    }

    /// The answer, if it was available without waiting.
    pub fn ready(self) -> Option<Result<HostRecord, NetError>> {
        match self {
            Lookup::Ready(result) => Some(result),
            Lookup::Pending(_) => None,
        }
    }
}

impl IntoFuture for Lookup {
    type Output = Result<HostRecord, NetError>;
    type IntoFuture = LookupFuture;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Lookup::Ready(result) => LookupFuture::Ready(Some(result)),
            Lookup::Pending(waiter) => LookupFuture::Pending(waiter),
        }
    }
}

/// Future returned by awaiting a [`Lookup`].
#[derive(Debug)]
pub enum LookupFuture {
    Ready(Option<Result<HostRecord, NetError>>),
    Pending(Waiter),
}

impl Future for LookupFuture {
    type Output = Result<HostRecord, NetError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            LookupFuture::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(NetError::Aborted)))
            }
            LookupFuture::Pending(waiter) => Pin::new(waiter).poll(cx),
        }
    }
}

/// A caller suspended on an in-flight resolution.
///
/// Dropping the waiter before it resolves withdraws only this caller; the
/// resolution keeps running for the other waiters and for the cache.
pub struct Waiter {
    key: ResolutionKey,
    id: u64,
    rx: oneshot::Receiver<Delivery>,
    inner: Arc<Inner>,
    done: bool,
}

impl Waiter {
    pub fn key(&self) -> &ResolutionKey {
        &self.key
    }

    /// Withdraw from the pending lookup.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Future for Waiter {
    type Output = Result<HostRecord, NetError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(delivery)) => delivery,
            // Sender dropped without delivering: the database shut down
            Poll::Ready(Err(_)) => Err(NetError::Aborted),
            Poll::Pending => return Poll::Pending,
        };
        self.done = true;
        Poll::Ready(result)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(mut pending) = self.inner.pending.get_mut(&self.key) {
            pending.waiters.retain(|(id, _)| *id != self.id);
            tracing::debug!(key = %self.key, remaining = pending.waiters.len(), "waiter withdrawn");
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

/// One in-flight resolution. Exists only while its resolver call runs.
struct PendingLookup {
    /// FIFO by registration.
    waiters: Vec<(u64, oneshot::Sender<Delivery>)>,
    started: Instant,
}

impl PendingLookup {
    fn new() -> Self {
        Self {
            waiters: Vec::new(),
            started: Instant::now(),
        }
    }
}

/// What a miss turned into once the pending slot was locked.
enum Miss {
    Wait { start: bool },
    Answered(Arc<CacheEntry>, Freshness),
}

struct Inner {
    config: HostDbConfig,
    resolver: Arc<dyn Resolve>,
    scheduler: Arc<dyn Schedule>,
    store: CacheStore,
    pending: DashMap<ResolutionKey, PendingLookup>,
    status: HostStatusTracker,
    hostfile: HostFileOverlay,
    next_waiter: AtomicU64,
    closed: AtomicBool,
}

/// Name resolution cache shared by every request of the proxy.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct HostDb {
    inner: Arc<Inner>,
}

impl HostDb {
    /// Host database driving `resolver`, with reloads on the tokio runtime.
    pub fn new(config: HostDbConfig, resolver: impl Resolve + 'static) -> Self {
        Self::with_scheduler(config, resolver, TokioScheduler::new())
    }

    pub fn with_scheduler(
        config: HostDbConfig,
        resolver: impl Resolve + 'static,
        scheduler: impl Schedule + 'static,
    ) -> Self {
        let hostfile = match &config.host_file {
            Some(path) => HostFileOverlay::new(path.clone(), config.host_file_interval()),
            None => HostFileOverlay::disabled(),
        };
        let store = CacheStore::new(config.serve_stale(), config.max_entries);

        Self {
            inner: Arc::new(Inner {
                config,
                resolver: Arc::new(resolver),
                scheduler: Arc::new(scheduler),
                store,
                pending: DashMap::new(),
                status: HostStatusTracker::new(),
                hostfile,
                next_waiter: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Load the hosts file, arm its periodic check and the expiry sweep.
    ///
    /// Blocks on the initial read. A failed initial load is returned but
    /// still arms the timer, so a file that appears later is picked up.
    pub fn start(&self) -> Result<ReloadOutcome, NetError> {
        let outcome = self.inner.hostfile.maybe_reload(Instant::now());
        if self.inner.hostfile.path().is_some() {
            Inner::schedule_reload(&self.inner);
        }
        Inner::schedule_purge(&self.inner);
        outcome
    }

    /// Stop reloads, fail every pending waiter with `Aborted` and empty the store.
    ///
    /// Resolutions already running finish but publish nothing. Later lookups
    /// fail with `Aborted`.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let waiters: usize = self.inner.pending.iter().map(|p| p.waiters.len()).sum();
        self.inner.pending.clear();
        self.inner.store.clear();
        tracing::info!(waiters, "host database shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Look up `key`.
    pub fn lookup(&self, key: ResolutionKey) -> Lookup {
        if self.is_closed() {
            return Lookup::Ready(Err(NetError::Aborted));
        }

        if let Some(entry) = self.inner.static_entry(&key) {
            return Lookup::Ready(HostRecord::deliver(entry, Freshness::Fresh));
        }

        match self.inner.store.classify(&key, Instant::now()) {
            Classification::Fresh(entry) => Lookup::Ready(HostRecord::deliver(entry, Freshness::Fresh)),
            Classification::Stale(entry) => {
                Inner::refresh(&self.inner, key);
                Lookup::Ready(HostRecord::deliver(entry, Freshness::Stale))
            }
            Classification::Miss => Inner::wait_for(&self.inner, key),
        }
    }

    /// Forward lookup of a host name or address literal.
    pub fn lookup_by_name(&self, name: &str) -> Lookup {
        match ResolutionKey::for_name(name) {
            Ok(key) => self.lookup(key),
            Err(e) => {
                tracing::debug!(name, "rejected invalid host name");
                Lookup::Ready(Err(e))
            }
        }
    }

    /// Reverse (PTR) lookup of `addr`.
    pub fn lookup_by_addr(&self, addr: IpAddr) -> Lookup {
        self.lookup(ResolutionKey::for_addr(addr))
    }

    /// Next address for `key` by health-aware rotation, without waiting.
    ///
    /// Fails with `DnsCacheMiss` when nothing usable is cached. A stale entry
    /// still answers and triggers a background refresh.
    pub fn select_address(&self, key: &ResolutionKey) -> Result<IpAddr, NetError> {
        if self.is_closed() {
            return Err(NetError::Aborted);
        }

        let (entry, stale) = match self.inner.static_entry(key) {
            Some(entry) => (entry, false),
            None => match self.inner.store.classify(key, Instant::now()) {
                Classification::Fresh(entry) => (entry, false),
                Classification::Stale(entry) => (entry, true),
                Classification::Miss => return Err(NetError::DnsCacheMiss),
            },
        };
        if stale {
            Inner::refresh(&self.inner, key.clone());
        }

        if let Some(failure) = entry.failure() {
            return Err(failure.clone());
        }
        entry
            .select_next(&self.inner.status)
            .ok_or(NetError::NameNotResolved)
    }

    /// Record a health status for `host`. Returns whether anything changed.
    pub fn set_host_status(
        &self,
        host: impl Into<HostId>,
        status: HostStatus,
        down_since: Option<OffsetDateTime>,
        reason: Option<DownReason>,
    ) -> bool {
        self.inner.status.set_status(host, status, down_since, reason)
    }

    pub fn host_status(&self, host: impl Into<HostId>) -> HostStatus {
        self.inner.status.get_status(host)
    }

    /// The tracker consulted during selection; clone it to hand to a health checker.
    pub fn status(&self) -> &HostStatusTracker {
        &self.inner.status
    }

    /// Drop the cached entry for `key`. An in-flight resolution still publishes.
    pub fn invalidate(&self, key: &ResolutionKey) -> bool {
        self.inner.store.invalidate(key)
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.store.purge_expired(Instant::now())
    }

    pub fn stats(&self) -> &CacheStats {
        self.inner.store.stats()
    }

    pub fn cached_entries(&self) -> usize {
        self.inner.store.len()
    }

    /// Number of keys with a resolution in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn hostfile(&self) -> &HostFileOverlay {
        &self.inner.hostfile
    }

    /// Check the hosts file now, subject to its interval gate.
    pub fn reload_hostfile(&self) -> Result<ReloadOutcome, NetError> {
        self.inner.hostfile.maybe_reload(Instant::now())
    }

    pub fn config(&self) -> &HostDbConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for HostDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDb")
            .field("store", &self.inner.store)
            .field("pending", &self.inner.pending.len())
            .field("hostfile", &self.inner.hostfile)
            .field("status", &self.inner.status)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Inner {
    /// Synthetic entry for a hosts file hit. Forward name keys only.
    fn static_entry(&self, key: &ResolutionKey) -> Option<Arc<CacheEntry>> {
        if key.kind() != RecordKind::Address {
            return None;
        }
        let addr = self.hostfile.lookup(key.name()?)?;
        tracing::trace!(key = %key, %addr, "host file hit");
        Some(Arc::new(CacheEntry::fixed(key.clone(), addr, Source::Static)))
    }

    /// Start a background refresh unless one is already running or another
    /// refresh already published a fresh entry.
    fn refresh(this: &Arc<Self>, key: ResolutionKey) {
        let start = match this.pending.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                // Checked under the slot lock so nothing is inserted after shutdown cleared the table
                if this.closed.load(Ordering::Acquire) {
                    false
                } else if this.current(&key).is_some_and(|(_, f)| f == Freshness::Fresh) {
                    false
                } else {
                    slot.insert(PendingLookup::new());
                    true
                }
            }
        };
        if start {
            tracing::debug!(key = %key, "refreshing stale entry");
            Self::start_resolution(this, key);
        }
    }

    /// Usable store entry for `key` with its freshness right now.
    fn current(&self, key: &ResolutionKey) -> Option<(Arc<CacheEntry>, Freshness)> {
        self.store
            .get(key)
            .map(|entry| {
                let freshness = entry.freshness(Instant::now(), self.store.grace());
                (entry, freshness)
            })
            .filter(|(_, freshness)| *freshness != Freshness::Expired)
    }

    fn wait_for(this: &Arc<Self>, key: ResolutionKey) -> Lookup {
        let id = this.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let miss = match this.pending.entry(key.clone()) {
            Entry::Occupied(mut pending) => {
                pending.get_mut().waiters.push((id, tx));
                Miss::Wait { start: false }
            }
            Entry::Vacant(slot) => {
                if this.closed.load(Ordering::Acquire) {
                    return Lookup::Ready(Err(NetError::Aborted));
                }

                // A resolution may have completed since the store was classified
                match this.current(&key) {
                    Some((entry, Freshness::Stale)) => {
                        slot.insert(PendingLookup::new());
                        Miss::Answered(entry, Freshness::Stale)
                    }
                    Some((entry, freshness)) => Miss::Answered(entry, freshness),
                    None => {
                        let mut pending = PendingLookup::new();
                        pending.waiters.push((id, tx));
                        slot.insert(pending);
                        Miss::Wait { start: true }
                    }
                }
            }
        };

        match miss {
            Miss::Answered(entry, freshness) => {
                if freshness == Freshness::Stale {
                    Self::start_resolution(this, key);
                }
                Lookup::Ready(HostRecord::deliver(entry, freshness))
            }
            Miss::Wait { start } => {
                if start {
                    tracing::debug!(key = %key, "cache miss, resolving");
                    Self::start_resolution(this, key.clone());
                } else {
                    tracing::trace!(key = %key, "joined in-flight resolution");
                }
                Lookup::Pending(Waiter {
                    key,
                    id,
                    rx,
                    inner: Arc::clone(this),
                    done: false,
                })
            }
        }
    }

    /// Spawn the resolver call for a key whose pending slot this caller created.
    fn start_resolution(this: &Arc<Self>, key: ResolutionKey) {
        this.store.stats().record_resolution();

        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(key = %key, "no tokio runtime, cannot resolve");
            this.fan_out(&key, Err(NetError::Aborted));
            return;
        };

        let inner = Arc::clone(this);
        let timeout = this.config.lookup_timeout();
        let resolving = this.resolver.resolve(key.clone());
        handle.spawn(async move {
            let result = match tokio::time::timeout(timeout, resolving).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(key = %key, ?timeout, "resolver timed out");
                    Err(NetError::DnsTimedOut)
                }
            };
            inner.complete(key, result);
        });
    }

    /// Publish a resolver result and fan it out to the key's waiters.
    ///
    /// Every error returned by the resolver is cached negatively. After
    /// shutdown nothing is published and the waiters observe `Aborted`.
    fn complete(&self, key: ResolutionKey, result: Result<Resolution, NetError>) {
        if self.closed.load(Ordering::Acquire) {
            self.fan_out(&key, Err(NetError::Aborted));
            return;
        }
        let now = Instant::now();

        let result = result.and_then(|resolution| {
            let empty = match key.kind() {
                RecordKind::Address => resolution.addrs.is_empty(),
                RecordKind::Pointer => resolution.hostname.is_none(),
            };
            if empty {
                Err(NetError::NameNotResolved)
            } else {
                Ok(resolution)
            }
        });

        let delivery = match result {
            Ok(resolution) => {
                let ttl = self.config.effective_ttl(resolution.ttl);
                let entry = Arc::new(CacheEntry::resolved(
                    key.clone(),
                    resolution,
                    ttl,
                    now,
                    self.config.max_addresses,
                ));
                self.store.publish(key.clone(), Arc::clone(&entry));
                tracing::debug!(key = %key, addrs = entry.addresses().len(), ttl = ?entry.ttl(), "resolved");
                HostRecord::deliver(entry, Freshness::Fresh)
            }
            Err(e) => {
                self.record_failure(&key, &e, now);
                Err(e)
            }
        };

        self.fan_out(&key, delivery);
    }

    /// End the key's pending lookup and hand `delivery` to its waiters in
    /// registration order.
    fn fan_out(&self, key: &ResolutionKey, delivery: Delivery) {
        let Some((_, pending)) = self.pending.remove(key) else {
            return;
        };
        tracing::trace!(
            key = %key,
            waiters = pending.waiters.len(),
            elapsed = ?pending.started.elapsed(),
            "delivering resolution"
        );
        for (_, tx) in pending.waiters {
            // A receiver gone since registration just misses the answer
            let _ = tx.send(delivery.clone());
        }
    }

    fn record_failure(&self, key: &ResolutionKey, error: &NetError, now: Instant) {
        let keep_stale = self.store.get(key).is_some_and(|current| {
            !current.is_negative() && current.freshness(now, self.store.grace()) == Freshness::Stale
        });
        if keep_stale {
            tracing::debug!(key = %key, error = %error, "refresh failed, keeping stale entry");
            return;
        }

        let ttl = self.config.negative_ttl();
        let entry = CacheEntry::negative(key.clone(), error.clone(), ttl, now);
        self.store.publish(key.clone(), Arc::new(entry));
        tracing::debug!(key = %key, error = %error, ?ttl, "caching resolution failure");
    }

    fn schedule_reload(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let delay = this.hostfile.interval().max(MIN_RELOAD_DELAY);

        this.scheduler.after(
            delay,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                // Failures are logged by the overlay; the old snapshot stays active
                let _ = inner.hostfile.maybe_reload(Instant::now());
                Self::schedule_reload(&inner);
            }),
        );
    }

    fn schedule_purge(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);

        this.scheduler.after(
            PURGE_INTERVAL,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                inner.store.purge_expired(Instant::now());
                Self::schedule_purge(&inner);
            }),
        );
    }
}
