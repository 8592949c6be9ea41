//! # hostdb
//!
//! A name resolution cache for a reverse proxy.
//!
//! `hostdb` sits between the proxy's request pipeline and the resolver. It
//! answers host name and address lookups from a static hosts file or from
//! its cache, and issues at most one upstream resolution per name at a time.
//!
//! ## Features
//!
//! - **Single-flight resolution**: concurrent misses on one name share one resolver call
//! - **Stale-while-revalidate**: expired answers keep serving during a grace window
//! - **Negative caching**: failures are cached briefly to avoid resolver storms
//! - **Health-aware round robin**: addresses of down origins are skipped, failing open
//! - **Hosts file overlay**: atomically swapped, reloaded on change
//! - **Reverse lookups**: PTR answers cached like forward ones
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hostdb::dns::HickoryResolver;
//! use hostdb::hostdb::{HostDb, HostDbConfig, ResolutionKey};
//!
//! #[tokio::main]
//! async fn main() {
//!     let db = HostDb::new(HostDbConfig::default(), HickoryResolver::new());
//!     let record = db.lookup_by_name("example.com").await.unwrap();
//!     println!("{:?} (ttl {:?})", record.addresses(), record.ttl());
//!
//!     let key = ResolutionKey::for_name("example.com").unwrap();
//!     let addr = db.select_address(&key).unwrap();
//!     println!("connect to {}", addr);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions
//! - [`dns`] - Resolver trait and implementations
//! - [`hostdb`] - Cache, lookup coordination, hosts file and host status

pub mod base;
pub mod dns;
pub mod hostdb;

pub use base::neterror::NetError;
pub use hostdb::{HostDb, HostDbConfig, Lookup, ResolutionKey};
