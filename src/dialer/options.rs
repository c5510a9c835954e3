use core::time::Duration;
use std::net::IpAddr;

use smol_str::SmolStr;

use crate::IpPreference;

/// The options used to construct a [`Dialer`](super::Dialer).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DialerOptions {
  #[cfg_attr(
    feature = "serde",
    serde(with = "humantime_serde", default = "default_connect_timeout")
  )]
  connect_timeout: Duration,
  #[cfg_attr(feature = "serde", serde(with = "humantime_serde", default))]
  lookup_timeout: Option<Duration>,
  #[cfg_attr(
    feature = "serde",
    serde(with = "humantime_serde", default = "default_keepalive")
  )]
  keepalive: Duration,
  #[cfg_attr(
    feature = "serde",
    serde(with = "humantime_serde", default = "default_record_ttl")
  )]
  record_ttl: Duration,
  #[cfg_attr(feature = "serde", serde(default))]
  ip_preference: IpPreference,
  #[cfg_attr(feature = "serde", serde(default))]
  local_addrs: Vec<IpAddr>,
  #[cfg_attr(feature = "serde", serde(default))]
  proxy: SmolStr,
}

impl Default for DialerOptions {
  fn default() -> Self {
    Self::new()
  }
}

const fn default_connect_timeout() -> Duration {
  Duration::from_secs(30)
}

const fn default_keepalive() -> Duration {
  Duration::from_secs(30)
}

const fn default_record_ttl() -> Duration {
  Duration::from_secs(10 * 60)
}

impl DialerOptions {
  /// Create a new [`DialerOptions`] with the default settings.
  #[inline]
  pub fn new() -> Self {
    Self {
      connect_timeout: default_connect_timeout(),
      lookup_timeout: None,
      keepalive: default_keepalive(),
      record_ttl: default_record_ttl(),
      ip_preference: IpPreference::Any,
      local_addrs: Vec::new(),
      proxy: SmolStr::default(),
    }
  }

  /// Set the connect timeout in builder pattern
  #[inline]
  pub const fn with_connect_timeout(mut self, val: Duration) -> Self {
    self.connect_timeout = val;
    self
  }

  /// Set the connect timeout
  #[inline]
  pub fn set_connect_timeout(&mut self, val: Duration) {
    self.connect_timeout = val;
  }

  /// Returns the connect timeout
  #[inline]
  pub const fn connect_timeout(&self) -> Duration {
    self.connect_timeout
  }

  /// Set the deadline of a host lookup in builder pattern
  #[inline]
  pub const fn with_lookup_timeout(mut self, val: Duration) -> Self {
    self.lookup_timeout = Some(val);
    self
  }

  /// Set the deadline of a host lookup
  #[inline]
  pub fn set_lookup_timeout(&mut self, val: Duration) {
    self.lookup_timeout = Some(val);
  }

  /// Returns the deadline of a host lookup, the connect timeout unless set
  #[inline]
  pub const fn lookup_timeout(&self) -> Duration {
    match self.lookup_timeout {
      Some(val) => val,
      None => self.connect_timeout,
    }
  }

  /// Set the TCP keep-alive idle time in builder pattern, zero disables keep-alive
  #[inline]
  pub const fn with_keepalive(mut self, val: Duration) -> Self {
    self.keepalive = val;
    self
  }

  /// Set the TCP keep-alive idle time, zero disables keep-alive
  #[inline]
  pub fn set_keepalive(&mut self, val: Duration) {
    self.keepalive = val;
  }

  /// Returns the TCP keep-alive idle time
  #[inline]
  pub const fn keepalive(&self) -> Duration {
    self.keepalive
  }

  /// Set how long a resolved address is cached in builder pattern
  #[inline]
  pub const fn with_record_ttl(mut self, val: Duration) -> Self {
    self.record_ttl = val;
    self
  }

  /// Set how long a resolved address is cached
  #[inline]
  pub fn set_record_ttl(&mut self, val: Duration) {
    self.record_ttl = val;
  }

  /// Returns how long a resolved address is cached
  #[inline]
  pub const fn record_ttl(&self) -> Duration {
    self.record_ttl
  }

  /// Set the initial ip preference in builder pattern
  #[inline]
  pub const fn with_ip_preference(mut self, val: IpPreference) -> Self {
    self.ip_preference = val;
    self
  }

  /// Set the initial ip preference
  #[inline]
  pub fn set_ip_preference(&mut self, val: IpPreference) {
    self.ip_preference = val;
  }

  /// Returns the initial ip preference
  #[inline]
  pub const fn ip_preference(&self) -> IpPreference {
    self.ip_preference
  }

  /// Set the initial local addresses in builder pattern
  #[inline]
  pub fn with_local_addrs(mut self, val: impl IntoIterator<Item = IpAddr>) -> Self {
    self.local_addrs = val.into_iter().collect();
    self
  }

  /// Set the initial local addresses
  #[inline]
  pub fn set_local_addrs(&mut self, val: impl IntoIterator<Item = IpAddr>) {
    self.local_addrs = val.into_iter().collect();
  }

  /// Returns the initial local addresses
  #[inline]
  pub fn local_addrs(&self) -> &[IpAddr] {
    &self.local_addrs
  }

  /// Set the initial proxy address in builder pattern
  #[inline]
  pub fn with_proxy(mut self, val: impl Into<SmolStr>) -> Self {
    self.proxy = val.into();
    self
  }

  /// Set the initial proxy address
  #[inline]
  pub fn set_proxy(&mut self, val: impl Into<SmolStr>) {
    self.proxy = val.into();
  }

  /// Returns the initial proxy address
  #[inline]
  pub fn proxy(&self) -> &str {
    &self.proxy
  }
}
