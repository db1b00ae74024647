use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Errors resolving a peer's probe address.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("empty probe address")]
    Empty,

    #[error("resolving {address}: {source}")]
    Lookup {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} resolved to no addresses")]
    NoAddress(String),
}

/// Resolve a probe address to an IP, accepting literals and host names.
pub fn resolve_probe_address(address: &str) -> Result<IpAddr, ResolveError> {
    if address.is_empty() {
        return Err(ResolveError::Empty);
    }

    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = (address, 0u16)
        .to_socket_addrs()
        .map_err(|source| ResolveError::Lookup {
            address: address.to_string(),
            source,
        })?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ResolveError::NoAddress(address.to_string()))
}

/// Uniform random start delay in `[0, max)`.
#[derive(Debug, Clone, Copy)]
pub struct Jitter {
    max: Duration,
}

impl Jitter {
    pub fn new(max: Duration) -> Self {
        Self { max }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw a delay. A zero ceiling disables jitter.
    pub fn sample(&self) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }

        let ceiling = u64::try_from(self.max.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::thread_rng().gen_range(0..ceiling))
    }
}
