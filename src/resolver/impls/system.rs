use core::time::Duration;
use std::{io, net::IpAddr};

use super::super::HostResolver;

/// A [`HostResolver`] backed by the operating system resolver, the same one
/// [`ToSocketAddrs`](std::net::ToSocketAddrs) uses, run on tokio's blocking pool.
///
/// If you want to send DNS queries yourself, you may want to use
/// [`DnsResolver`](crate::resolver::dns::DnsResolver).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver {
  timeout: Option<Duration>,
}

impl SystemResolver {
  /// Create a new [`SystemResolver`] without a lookup timeout.
  #[inline]
  pub const fn new() -> Self {
    Self { timeout: None }
  }

  /// Set the lookup timeout in builder pattern
  #[inline]
  pub const fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Returns the lookup timeout
  #[inline]
  pub const fn timeout(&self) -> Option<Duration> {
    self.timeout
  }
}

impl HostResolver for SystemResolver {
  type Error = io::Error;

  async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error> {
    let lookup = tokio::net::lookup_host((host, 0));
    let addrs = match self.timeout {
      Some(timeout) => tokio::time::timeout(timeout, lookup).await.map_err(|_| {
        io::Error::new(
          io::ErrorKind::TimedOut,
          format!("lookup of {host} timed out after {timeout:?}"),
        )
      })??,
      None => lookup.await?,
    };

    Ok(addrs.map(|addr| addr.ip()).collect())
  }
}
