use core::time::Duration;
use std::net::IpAddr;

pub use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use super::super::HostResolver;

/// The error returned when a DNS query fails.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ResolveError(#[from] hickory_resolver::error::ResolveError);

impl ResolveError {
  /// Returns `true` if the name exists but has no A or AAAA record, or does
  /// not exist at all.
  #[inline]
  pub fn is_no_records(&self) -> bool {
    matches!(
      self.0.kind(),
      hickory_resolver::error::ResolveErrorKind::NoRecordsFound { .. }
    )
  }
}

/// The options used to construct a [`DnsResolver`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DnsResolverOptions {
  resolver_opts: ResolverOpts,
  resolver_config: ResolverConfig,
}

impl DnsResolverOptions {
  /// Create a new [`DnsResolverOptions`] with the default DNS configurations.
  pub fn new() -> Self {
    Self {
      resolver_opts: ResolverOpts::default(),
      resolver_config: ResolverConfig::default(),
    }
  }

  /// Set the default dns configuration in builder pattern
  pub fn with_resolver_config(mut self, c: ResolverConfig) -> Self {
    self.resolver_config = c;
    self
  }

  /// Set the default dns configuration
  pub fn set_resolver_config(&mut self, c: ResolverConfig) {
    self.resolver_config = c;
  }

  /// Returns the resolver configuration
  pub fn resolver_config(&self) -> &ResolverConfig {
    &self.resolver_config
  }

  /// Set the default resolver options in builder pattern
  pub fn with_resolver_opts(mut self, o: ResolverOpts) -> Self {
    self.resolver_opts = o;
    self
  }

  /// Set the default resolver options
  pub fn set_resolver_opts(&mut self, o: ResolverOpts) {
    self.resolver_opts = o;
  }

  /// Returns the resolver options
  pub fn resolver_opts(&self) -> &ResolverOpts {
    &self.resolver_opts
  }

  /// Set the per-query timeout of the resolver in builder pattern
  pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
    self.resolver_opts.timeout = timeout;
    self
  }

  /// Returns the per-query timeout of the resolver
  pub fn query_timeout(&self) -> Duration {
    self.resolver_opts.timeout
  }
}

impl Default for DnsResolverOptions {
  fn default() -> Self {
    Self::new()
  }
}

/// A [`HostResolver`] which sends DNS queries itself through hickory, instead of
/// going through the operating system.
///
/// - If you do not want to send DNS queries, you may want to use [`SystemResolver`](crate::resolver::system::SystemResolver).
pub struct DnsResolver {
  dns: TokioAsyncResolver,
}

impl DnsResolver {
  /// Create a new [`DnsResolver`] with the given options.
  pub fn new(opts: DnsResolverOptions) -> Self {
    Self {
      dns: TokioAsyncResolver::tokio(opts.resolver_config, opts.resolver_opts),
    }
  }
}

impl Default for DnsResolver {
  fn default() -> Self {
    Self::new(DnsResolverOptions::default())
  }
}

impl core::fmt::Debug for DnsResolver {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("DnsResolver").finish_non_exhaustive()
  }
}

impl HostResolver for DnsResolver {
  type Error = ResolveError;

  async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error> {
    let lookup = self.dns.lookup_ip(host).await?;
    Ok(lookup.iter().collect())
  }
}
