//! Host database integration tests.
//!
//! Drives `HostDb` through its public API with a scripted resolver. Most
//! tests run on a paused clock so TTL and grace windows are exact.

use futures::future::join_all;
use hostdb::dns::{Resolution, Resolve, Resolving};
use hostdb::hostdb::{
    DownReason, Freshness, HostDb, HostDbConfig, HostStatus, Lookup, ReloadOutcome,
    ResolutionKey, Source,
};
use hostdb::NetError;

use std::collections::HashMap;
use std::future::IntoFuture;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(1, 2, 3, last))
}

#[derive(Default)]
struct MockState {
    calls: AtomicUsize,
    gated: AtomicBool,
    release: Notify,
    fail: AtomicBool,
    hang: AtomicBool,
    delay: Option<Duration>,
    addrs: Vec<IpAddr>,
}

/// Resolver answering every name with `addrs` and a 60s TTL.
#[derive(Clone)]
struct MockResolver {
    state: Arc<MockState>,
}

impl MockResolver {
    fn new(addrs: Vec<IpAddr>) -> Self {
        Self {
            state: Arc::new(MockState {
                addrs,
                ..Default::default()
            }),
        }
    }

    fn with_delay(addrs: Vec<IpAddr>, delay: Duration) -> Self {
        Self {
            state: Arc::new(MockState {
                addrs,
                delay: Some(delay),
                ..Default::default()
            }),
        }
    }

    fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Hold resolutions until `release` is called once per resolution.
    fn gate(&self) {
        self.state.gated.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.state.release.notify_one();
    }

    fn fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    fn hang(&self) {
        self.state.hang.store(true, Ordering::SeqCst);
    }
}

impl Resolve for MockResolver {
    fn resolve(&self, key: ResolutionKey) -> Resolving {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            if state.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = state.delay {
                tokio::time::sleep(delay).await;
            }
            if state.gated.load(Ordering::SeqCst) {
                state.release.notified().await;
            }
            if state.fail.load(Ordering::SeqCst) {
                return Err(NetError::NameNotResolved);
            }
            let ttl = Duration::from_secs(60);
            match key.addr() {
                Some(addr) => Ok(Resolution::pointer(addr, "host.example", ttl)),
                None => Ok(Resolution::addresses(state.addrs.clone(), ttl)),
            }
        })
    }
}

fn config() -> HostDbConfig {
    HostDbConfig::default()
        .with_serve_stale(Duration::from_secs(30))
        .with_negative_ttl(Duration::from_secs(5))
}

/// Let spawned resolutions run to completion.
async fn settle(db: &HostDb) {
    while db.pending_count() > 0 {
        tokio::task::yield_now().await;
    }
}

fn ready(lookup: Lookup) -> Result<hostdb::hostdb::HostRecord, NetError> {
    match lookup {
        Lookup::Ready(result) => result,
        Lookup::Pending(waiter) => panic!("expected a cached answer for {}", waiter.key()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_miss_then_fresh() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());

    let lookup = db.lookup_by_name("a.example");
    assert!(lookup.is_pending());
    let record = lookup.await.unwrap();
    assert_eq!(record.addresses(), &[ip(4)]);
    assert_eq!(record.freshness(), Freshness::Fresh);
    assert_eq!(record.source(), Source::Resolved);
    assert_eq!(record.ttl(), Duration::from_secs(60));

    tokio::time::advance(Duration::from_secs(59)).await;
    let again = ready(db.lookup_by_name("a.example")).unwrap();
    assert_eq!(again.addresses(), &[ip(4)]);
    assert_eq!(again.freshness(), Freshness::Fresh);
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_resolution() {
    let resolver = MockResolver::with_delay(vec![ip(1), ip(2)], Duration::from_millis(100));
    let db = HostDb::new(config(), resolver.clone());

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.lookup_by_name("shared.example").await })
        })
        .collect();

    for result in join_all(tasks).await {
        let record = result.unwrap().unwrap();
        assert_eq!(record.addresses(), &[ip(1), ip(2)]);
    }
    assert_eq!(resolver.calls(), 1);
    assert_eq!(db.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_resolve_independently() {
    let resolver = MockResolver::with_delay(vec![ip(1)], Duration::from_millis(50));
    let db = HostDb::new(config(), resolver.clone());

    let lookups: Vec<_> = (0..20)
        .map(|i| db.lookup_by_name(&format!("host{}.example", i)).into_future())
        .collect();
    let results = join_all(lookups).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(resolver.calls(), 20);
    assert_eq!(db.cached_entries(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_stale_reads_trigger_one_refresh() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());
    db.lookup_by_name("a.example").await.unwrap();

    resolver.gate();
    tokio::time::advance(Duration::from_secs(60)).await;

    // Every stale read answers immediately; only the first starts a refresh
    for _ in 0..10 {
        let record = ready(db.lookup_by_name("a.example")).unwrap();
        assert!(record.is_stale());
        assert_eq!(record.addresses(), &[ip(4)]);
    }
    assert_eq!(resolver.calls(), 2);
    assert_eq!(db.pending_count(), 1);

    resolver.release();
    settle(&db).await;

    let record = ready(db.lookup_by_name("a.example")).unwrap();
    assert_eq!(record.freshness(), Freshness::Fresh);
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_past_grace_is_a_miss() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());
    db.lookup_by_name("a.example").await.unwrap();

    tokio::time::advance(Duration::from_secs(90)).await;
    let lookup = db.lookup_by_name("a.example");
    assert!(lookup.is_pending());
    lookup.await.unwrap();
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_negative_entry_suppresses_resolver() {
    let resolver = MockResolver::new(vec![ip(4)]);
    resolver.fail(true);
    let db = HostDb::new(config(), resolver.clone());

    let err = db.lookup_by_name("nx.example").await.unwrap_err();
    assert_eq!(err, NetError::NameNotResolved);

    tokio::time::advance(Duration::from_secs(1)).await;
    let err = ready(db.lookup_by_name("nx.example")).unwrap_err();
    assert_eq!(err, NetError::NameNotResolved);
    assert_eq!(resolver.calls(), 1);
    assert_eq!(db.stats().negative_hits(), 1);

    // Negative TTL elapsed: no grace, straight back to the resolver
    tokio::time::advance(Duration::from_secs(5)).await;
    resolver.fail(false);
    let lookup = db.lookup_by_name("nx.example");
    assert!(lookup.is_pending());
    assert_eq!(lookup.await.unwrap().addresses(), &[ip(4)]);
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_stale_entry() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());
    db.lookup_by_name("a.example").await.unwrap();

    resolver.fail(true);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(ready(db.lookup_by_name("a.example")).unwrap().is_stale());
    settle(&db).await;

    let record = ready(db.lookup_by_name("a.example")).unwrap();
    assert!(record.is_stale());
    assert_eq!(record.addresses(), &[ip(4)]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_does_not_affect_others() {
    let resolver = MockResolver::new(vec![ip(7)]);
    resolver.gate();
    let db = HostDb::new(config(), resolver.clone());

    let Lookup::Pending(first) = db.lookup_by_name("k.example") else {
        panic!("expected a miss");
    };
    let second = db.lookup_by_name("k.example");
    assert!(second.is_pending());
    assert_eq!(resolver.calls(), 1);

    first.cancel();
    resolver.release();

    let record = second.await.unwrap();
    assert_eq!(record.addresses(), &[ip(7)]);

    let cached = ready(db.lookup_by_name("k.example")).unwrap();
    assert_eq!(cached.addresses(), &[ip(7)]);
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resolver_timeout_is_a_failure() {
    let resolver = MockResolver::new(vec![ip(4)]);
    resolver.hang();
    let db = HostDb::new(
        config().with_lookup_timeout(Duration::from_secs(5)),
        resolver.clone(),
    );

    let err = db.lookup_by_name("slow.example").await.unwrap_err();
    assert_eq!(err, NetError::DnsTimedOut);

    let err = ready(db.lookup_by_name("slow.example")).unwrap_err();
    assert_eq!(err, NetError::DnsTimedOut);
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reverse_lookup_is_cached() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());

    let record = db.lookup_by_addr(ip(9)).await.unwrap();
    assert_eq!(record.hostname(), Some("host.example"));

    let again = ready(db.lookup_by_addr(ip(9))).unwrap();
    assert_eq!(again.hostname(), Some("host.example"));
    assert_eq!(resolver.calls(), 1);

    // Forward and reverse keys never share a slot
    assert!(db.lookup_by_name("9.3.2.1.example").is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_select_address_skips_down_hosts() {
    let resolver = MockResolver::new(vec![ip(1), ip(2), ip(3)]);
    let db = HostDb::new(config(), resolver.clone());
    let key = ResolutionKey::for_name("rr.example").unwrap();
    db.lookup(key.clone()).await.unwrap();

    assert!(db.set_host_status(ip(2), HostStatus::Down, None, Some(DownReason::Active)));
    assert_eq!(db.host_status(ip(2)), HostStatus::Down);

    let mut counts: HashMap<IpAddr, usize> = HashMap::new();
    for _ in 0..12 {
        *counts.entry(db.select_address(&key).unwrap()).or_default() += 1;
    }
    assert_eq!(counts.get(&ip(2)), None);
    assert_eq!(counts.get(&ip(1)), Some(&6));
    assert_eq!(counts.get(&ip(3)), Some(&6));

    db.status().mark_up(ip(2));
    let picked: Vec<_> = (0..3).map(|_| db.select_address(&key).unwrap()).collect();
    assert!(picked.contains(&ip(2)));
}

#[tokio::test(start_paused = true)]
async fn test_select_address_all_down_fails_open() {
    let resolver = MockResolver::new(vec![ip(1), ip(2)]);
    let db = HostDb::new(config(), resolver.clone());
    let key = ResolutionKey::for_name("rr.example").unwrap();
    db.lookup(key.clone()).await.unwrap();

    db.status().mark_down(ip(1), DownReason::Manual);
    db.status().mark_down(ip(2), DownReason::Manual);

    let picked: Vec<_> = (0..4).map(|_| db.select_address(&key).unwrap()).collect();
    assert!(picked.contains(&ip(1)));
    assert!(picked.contains(&ip(2)));
}

#[tokio::test(start_paused = true)]
async fn test_hostfile_overrides_resolver() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# static origins").unwrap();
    writeln!(file, "10.1.1.1 static.example").unwrap();
    writeln!(file, "10.1.1.2 static.example other.example").unwrap();

    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(
        config().with_host_file(file.path(), Duration::from_secs(60)),
        resolver.clone(),
    );
    assert!(matches!(
        db.start(),
        Ok(ReloadOutcome::Reloaded { generation: 1, entries: 2, .. })
    ));

    let record = ready(db.lookup_by_name("STATIC.example")).unwrap();
    assert_eq!(record.addresses(), &["10.1.1.1".parse::<IpAddr>().unwrap()]);
    assert_eq!(record.source(), Source::Static);

    let key = ResolutionKey::for_name("other.example").unwrap();
    assert_eq!(db.select_address(&key), Ok("10.1.1.2".parse().unwrap()));
    assert_eq!(resolver.calls(), 0);

    // Reverse lookups never consult the hosts file
    assert!(db.lookup_by_addr("10.1.1.1".parse().unwrap()).is_pending());
    db.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_waiters() {
    let resolver = MockResolver::new(vec![ip(4)]);
    resolver.gate();
    let db = HostDb::new(config(), resolver.clone());

    let lookup = db.lookup_by_name("a.example");
    assert!(lookup.is_pending());

    db.shutdown();
    assert_eq!(lookup.await.unwrap_err(), NetError::Aborted);
    assert_eq!(db.pending_count(), 0);
    assert_eq!(db.cached_entries(), 0);

    resolver.release();
    tokio::task::yield_now().await;
    assert_eq!(db.cached_entries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_resolution() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());
    let key = ResolutionKey::for_name("a.example").unwrap();
    db.lookup(key.clone()).await.unwrap();

    assert!(db.invalidate(&key));
    assert_eq!(db.select_address(&key), Err(NetError::DnsCacheMiss));
    db.lookup(key).await.unwrap();
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiters_served_once_in_registration_order() {
    let resolver = MockResolver::new(vec![ip(4)]);
    resolver.gate();
    let db = HostDb::new(config(), resolver.clone());

    let mut waiters: Vec<_> = (0..5)
        .map(|i| {
            let lookup = db.lookup_by_name("a.example");
            assert!(lookup.is_pending());
            (i, lookup)
        })
        .collect();

    // Polled in reverse so the wake order alone decides who finishes first
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    while let Some((i, lookup)) = waiters.pop() {
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let result = lookup.await;
            order.lock().unwrap().push(i);
            result
        }));
    }
    tokio::task::yield_now().await;
    assert!(order.lock().unwrap().is_empty());

    resolver.release();
    let results = join_all(tasks).await;

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(results.len(), 5);
    for result in results {
        assert_eq!(result.unwrap().unwrap().addresses(), &[ip(4)]);
    }
    assert_eq!(resolver.calls(), 1);
    assert_eq!(db.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_racing_lookups_never_strands_waiters() {
    let resolver = MockResolver::new(vec![ip(4)]);
    let db = HostDb::new(config(), resolver.clone());

    let callers: Vec<_> = (0..4)
        .map(|t| {
            let db = db.clone();
            tokio::task::spawn_blocking(move || {
                (0..250)
                    .map(|i| db.lookup_by_name(&format!("h{}-{}.example", t, i)))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    // Shut down while the callers are still registering
    while db.stats().resolutions() < 100 {
        tokio::task::yield_now().await;
    }
    db.shutdown();

    for caller in join_all(callers).await {
        for lookup in caller.unwrap() {
            let result = tokio::time::timeout(Duration::from_secs(5), lookup.into_future())
                .await
                .expect("waiter left hanging after shutdown");
            match result {
                Ok(record) => assert_eq!(record.addresses(), &[ip(4)]),
                Err(e) => assert_eq!(e, NetError::Aborted),
            }
        }
    }

    assert_eq!(db.pending_count(), 0);
    assert!(db.is_closed());
    assert_eq!(ready(db.lookup_by_name("late.example")).unwrap_err(), NetError::Aborted);
}
