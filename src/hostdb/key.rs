//! Normalized lookup identity.

use crate::base::neterror::NetError;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

/// Longest name accepted, in presentation format without the trailing dot.
const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Record kind discriminator for a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    /// Forward lookup (A/AAAA).
    Address,
    /// Reverse lookup (PTR).
    Pointer,
}

/// What a key resolves: a host name, or a literal address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyTarget {
    Name(Box<str>),
    Literal(IpAddr),
}

/// Immutable, normalized identity of one cached resolution.
///
/// Names are lower-cased with any trailing root dot removed, so `Example.COM.`
/// and `example.com` share a cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    target: KeyTarget,
    kind: RecordKind,
}

impl ResolutionKey {
    /// Builds a forward key from a host name.
    ///
    /// Strings that parse as an IP address (including bracketed IPv6) become
    /// literal keys, which never reach the resolver.
    pub fn for_name(name: &str) -> Result<Self, NetError> {
        let trimmed = name.trim();
        if let Some(addr) = parse_literal(trimmed) {
            return Ok(Self {
                target: KeyTarget::Literal(addr),
                kind: RecordKind::Address,
            });
        }

        let normalized = trimmed.strip_suffix('.').unwrap_or(trimmed).to_ascii_lowercase();
        validate_name(&normalized)?;

        Ok(Self {
            target: KeyTarget::Name(normalized.into_boxed_str()),
            kind: RecordKind::Address,
        })
    }

    /// Builds a reverse (PTR) key for an address.
    pub fn for_addr(addr: IpAddr) -> Self {
        Self {
            target: KeyTarget::Literal(addr),
            kind: RecordKind::Pointer,
        }
    }

    pub fn target(&self) -> &KeyTarget {
        &self.target
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// The normalized host name, if this is a name key.
    pub fn name(&self) -> Option<&str> {
        match &self.target {
            KeyTarget::Name(name) => Some(name),
            KeyTarget::Literal(_) => None,
        }
    }

    /// The address, for literal forward keys and reverse keys.
    pub fn addr(&self) -> Option<IpAddr> {
        match self.target {
            KeyTarget::Literal(addr) => Some(addr),
            KeyTarget::Name(_) => None,
        }
    }

    /// Forward lookup of a literal address: answered without the store or resolver.
    pub fn is_literal(&self) -> bool {
        self.kind == RecordKind::Address && matches!(self.target, KeyTarget::Literal(_))
    }
}

impl fmt::Display for ResolutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.target, self.kind) {
            (KeyTarget::Name(name), _) => f.write_str(name),
            (KeyTarget::Literal(addr), RecordKind::Address) => write!(f, "{}", addr),
            (KeyTarget::Literal(addr), RecordKind::Pointer) => write!(f, "ptr:{}", addr),
        }
    }
}

fn parse_literal(host: &str) -> Option<IpAddr> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Some(addr);
    }
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .and_then(|h| h.parse::<Ipv6Addr>().ok())
        .map(IpAddr::V6)
}

fn validate_name(name: &str) -> Result<(), NetError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(NetError::InvalidHostname);
    }
    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(NetError::InvalidHostname);
        }
        if label.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(NetError::InvalidHostname);
        }
    }
    Ok(())
}
