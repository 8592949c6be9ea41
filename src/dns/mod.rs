//! DNS Resolution Module
//!
//! Provides the resolver collaborator consumed by the host database:
//! - System resolver (getaddrinfo via thread pool)
//! - Async hickory-dns resolver (DoH/DoT capable, TTL aware, reverse lookups)
//!
//! # Architecture
//!
//! This module mirrors Chromium's `HostResolver` concept. The `Resolve` trait
//! is the core abstraction that allows different resolver implementations to
//! be plugged into [`HostDb`](crate::hostdb::HostDb) interchangeably.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostdb::dns::{HickoryResolver, Resolve};
//! use hostdb::hostdb::key::ResolutionKey;
//!
//! let resolver = HickoryResolver::new();
//! let answer = resolver.resolve(ResolutionKey::for_name("example.com")?).await?;
//! for addr in answer.addrs {
//!     println!("Resolved: {} (ttl {:?})", addr, answer.ttl);
//! }
//! ```

mod gai;
mod hickory;
mod resolve;

pub use gai::GaiResolver;
pub use hickory::HickoryResolver;
pub use resolve::{Resolution, Resolve, Resolving};
