use core::future::Future;
use std::net::IpAddr;

use smol_str::SmolStr;

mod impls;
pub use impls::*;

/// Used to look up the ip addresses of a host name in async style.
pub trait HostResolver: Send + Sync + 'static {
  /// The error type returned by the resolver.
  type Error: core::error::Error + Send + Sync + 'static;

  /// Returns every address the host resolves to, in the order the resolver
  /// returned them.
  fn lookup(&self, host: &str) -> impl Future<Output = Result<Vec<IpAddr>, Self::Error>> + Send;
}

/// Returned when a lookup succeeds but yields no address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot resolve an ip address for {0}")]
pub struct NoAddresses(pub SmolStr);

/// Which address family to pick when a host resolves to several addresses.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IpPreference {
  /// Use the first address returned by the resolver.
  #[default]
  #[cfg_attr(feature = "serde", serde(rename = "any"))]
  Any,
  /// Use the first IPv4 address if there is one.
  #[cfg_attr(feature = "serde", serde(rename = "ipv4"))]
  V4,
  /// Use the first IPv6 address if there is one.
  #[cfg_attr(feature = "serde", serde(rename = "ipv6"))]
  V6,
}

impl IpPreference {
  /// Returns the string form of the preference.
  #[inline]
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Any => "any",
      Self::V4 => "ipv4",
      Self::V6 => "ipv6",
    }
  }

  /// Picks an address out of `addrs`.
  ///
  /// The first address of the preferred family wins; without a match, or
  /// with [`IpPreference::Any`], the first address is used.
  pub fn select(&self, addrs: &[IpAddr]) -> Option<IpAddr> {
    let preferred = match self {
      Self::Any => None,
      Self::V4 => addrs.iter().find(|ip| ip.to_canonical().is_ipv4()),
      Self::V6 => addrs.iter().find(|ip| ip.to_canonical().is_ipv6()),
    };
    preferred.or(addrs.first()).copied()
  }
}

impl core::fmt::Display for IpPreference {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An error which can be returned when parsing an [`IpPreference`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ip preference {0:?}, expected one of `any`, `ipv4`, `ipv6`")]
pub struct ParseIpPreferenceError(SmolStr);

impl core::str::FromStr for IpPreference {
  type Err = ParseIpPreferenceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      s if s.eq_ignore_ascii_case("any") || s.is_empty() => Ok(Self::Any),
      s if s.eq_ignore_ascii_case("ipv4") => Ok(Self::V4),
      s if s.eq_ignore_ascii_case("ipv6") => Ok(Self::V6),
      _ => Err(ParseIpPreferenceError(s.into())),
    }
  }
}
