use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the host database and its resolvers.
///
/// Codes follow Chromium's `net_error_list.h` where a matching entry exists;
/// host-database specific errors use the custom range starting at -10000.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("Operation aborted")]
    Aborted,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("File not found")]
    FileNotFound,
    #[error("Operation timed out")]
    TimedOut,

    // Resolution Errors
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name not resolved: {domain}: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Host resolver queue too large")]
    HostResolverQueueTooLarge,
    #[error("Name resolution failed")]
    NameResolutionFailed,

    // DNS Errors
    #[error("DNS malformed response")]
    DnsMalformedResponse,
    #[error("DNS server requires TCP")]
    DnsServerRequiresTcp,
    #[error("DNS server failed")]
    DnsServerFailed,
    #[error("DNS timed out")]
    DnsTimedOut,
    #[error("DNS cache miss")]
    DnsCacheMiss,
    #[error("DNS search list empty")]
    DnsSearchEmpty,
    #[error("DNS sort error")]
    DnsSortError,

    // Host database errors (custom codes)
    #[error("Invalid hostname")]
    InvalidHostname,
    #[error("Host file failed")]
    HostFileFailed,
    #[error("Host file {path:?} unreadable: {source}")]
    HostFileUnreadable {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    /// Resolver failure for `domain` caused by an I/O level error.
    pub fn dns_failed(domain: impl Into<String>, source: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.into(),
            source: Arc::new(source),
        }
    }

    /// The host file at `path` could not be opened or read.
    pub fn hostfile_failed(path: impl Into<PathBuf>, source: io::Error) -> Self {
        NetError::HostFileUnreadable {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::InvalidArgument => -4,
            NetError::FileNotFound => -6,
            NetError::TimedOut => -7,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::AddressInvalid => -108,
            NetError::HostResolverQueueTooLarge => -119,
            NetError::NameResolutionFailed => -137,
            NetError::DnsMalformedResponse => -800,
            NetError::DnsServerRequiresTcp => -801,
            NetError::DnsServerFailed => -802,
            NetError::DnsTimedOut => -803,
            NetError::DnsCacheMiss => -804,
            NetError::DnsSearchEmpty => -805,
            NetError::DnsSortError => -806,
            NetError::InvalidHostname => -10000,
            NetError::HostFileFailed => -10001,
            NetError::HostFileUnreadable { .. } => -10001,
            NetError::Unknown(code) => *code,
        }
    }
}

impl PartialEq for NetError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                NetError::NameNotResolvedFor { domain: a, .. },
                NetError::NameNotResolvedFor { domain: b, .. },
            ) => a == b,
            (
                NetError::HostFileUnreadable { path: a, .. },
                NetError::HostFileUnreadable { path: b, .. },
            ) => a == b,
            (NetError::Unknown(a), NetError::Unknown(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for NetError {}

/// Context-carrying variants decode to their plain counterpart.
impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -4 => NetError::InvalidArgument,
            -6 => NetError::FileNotFound,
            -7 => NetError::TimedOut,
            -105 => NetError::NameNotResolved,
            -108 => NetError::AddressInvalid,
            -119 => NetError::HostResolverQueueTooLarge,
            -137 => NetError::NameResolutionFailed,
            -800 => NetError::DnsMalformedResponse,
            -801 => NetError::DnsServerRequiresTcp,
            -802 => NetError::DnsServerFailed,
            -803 => NetError::DnsTimedOut,
            -804 => NetError::DnsCacheMiss,
            -805 => NetError::DnsSearchEmpty,
            -806 => NetError::DnsSortError,
            -10000 => NetError::InvalidHostname,
            -10001 => NetError::HostFileFailed,
            _ => NetError::Unknown(code),
        }
    }
}
