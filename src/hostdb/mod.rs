//! Host database: the proxy's name resolution cache.
//!
//! # Architecture
//!
//! - [`HostFileOverlay`] answers names listed in a static hosts file.
//! - [`CacheStore`] holds resolved and negative entries and classifies them
//!   as Fresh, Stale or Miss.
//! - [`HostDb`] coordinates: it dedups in-flight resolutions per key, drives
//!   the [`Resolve`](crate::dns::Resolve) collaborator and fans answers out to
//!   waiters.
//! - [`RoundRobinSet`] rotates over an entry's addresses, skipping hosts the
//!   [`HostStatusTracker`] has marked down.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostdb::dns::HickoryResolver;
//! use hostdb::hostdb::{HostDb, HostDbConfig};
//!
//! let db = HostDb::new(HostDbConfig::default(), HickoryResolver::new());
//! db.start()?;
//! let record = db.lookup_by_name("origin.example").await?;
//! println!("{:?} via {:?}", record.addresses(), record.source());
//! ```

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod hostfile;
pub mod key;
pub mod roundrobin;
pub mod schedule;
pub mod status;
pub mod store;

pub use config::{HostDbConfig, TtlMode};
pub use coordinator::{HostDb, HostRecord, Lookup, LookupFuture, Waiter};
pub use entry::{CacheEntry, Freshness, Source};
pub use hostfile::{HostFileOverlay, HostFileSnapshot, MalformedLine, ReloadOutcome};
pub use key::{KeyTarget, RecordKind, ResolutionKey};
pub use roundrobin::RoundRobinSet;
pub use schedule::{Action, Schedule, TokioScheduler};
pub use status::{DownReason, HostId, HostStatus, HostStatusRecord, HostStatusTracker};
pub use store::{CacheStats, CacheStore, Classification};
