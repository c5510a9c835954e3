use core::{
  fmt,
  ops::Deref,
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

use tokio::time::Instant;

/// A point in time after which a cached value is considered stale.
///
/// Besides the clock, an [`Expires`] carries an override flag. Once the flag is
/// set, the value reports itself as expired no matter what the clock says:
///
/// ```text
/// is_expired() == aborted || now > expires_at
/// ```
///
/// A ttl which cannot be added to the current instant (e.g. [`Duration::MAX`])
/// saturates to "never expires" instead of overflowing.
#[derive(Debug)]
pub struct Expires {
  expires_at: Option<Instant>,
  abort: AtomicBool,
}

impl Clone for Expires {
  fn clone(&self) -> Self {
    Self {
      expires_at: self.expires_at,
      abort: AtomicBool::new(self.is_aborted()),
    }
  }
}

impl Expires {
  /// Creates a new [`Expires`] which expires after `ttl` from now.
  #[inline]
  pub fn new(ttl: Duration) -> Self {
    Self {
      expires_at: Instant::now().checked_add(ttl),
      abort: AtomicBool::new(false),
    }
  }

  /// Creates a new [`Expires`] which expires at the given instant.
  ///
  /// Instants in the past are accepted, the value is expired right away.
  #[inline]
  pub const fn at(instant: Instant) -> Self {
    Self {
      expires_at: Some(instant),
      abort: AtomicBool::new(false),
    }
  }

  /// Creates a new [`Expires`] which only expires when forced.
  #[inline]
  pub const fn never() -> Self {
    Self {
      expires_at: None,
      abort: AtomicBool::new(false),
    }
  }

  /// Returns the instant at which the value expires, `None` if it never does.
  #[inline]
  pub const fn expires_at(&self) -> Option<Instant> {
    self.expires_at
  }

  /// Sets or clears the override flag.
  ///
  /// Clearing the flag only removes the override, it does not bring back a
  /// value whose expiry instant has already passed.
  #[inline]
  pub fn force_expire(&self, abort: bool) {
    self.abort.store(abort, Ordering::Release);
  }

  /// Returns `true` if the override flag is set.
  #[inline]
  pub fn is_aborted(&self) -> bool {
    self.abort.load(Ordering::Acquire)
  }

  /// Returns `true` if the value is stale.
  #[inline]
  pub fn is_expired(&self) -> bool {
    self.is_aborted() || self.expires_at.is_some_and(|at| Instant::now() > at)
  }

  /// Returns how long the value stays fresh, `None` if it never expires.
  pub fn remaining(&self) -> Option<Duration> {
    if self.is_aborted() {
      return Some(Duration::ZERO);
    }

    self
      .expires_at
      .map(|at| at.saturating_duration_since(Instant::now()))
  }
}

impl fmt::Display for Expires {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let now = Instant::now();
    match self.expires_at {
      None => write!(f, "never expires")?,
      Some(at) if at >= now => write!(
        f,
        "expires in {}",
        humantime::format_duration(truncate(at - now))
      )?,
      Some(at) => write!(
        f,
        "expired {} ago",
        humantime::format_duration(truncate(now - at))
      )?,
    }
    write!(f, ", abort: {}", self.is_aborted())
  }
}

#[inline]
const fn truncate(d: Duration) -> Duration {
  Duration::from_secs(d.as_secs())
}

/// An [`Expires`] which carries a payload.
///
/// The payload is never mutated after creation, refreshing a cached value
/// means replacing the whole [`DataExpires`].
#[derive(Debug, Clone)]
pub struct DataExpires<T> {
  data: T,
  expires: Expires,
}

impl<T> DataExpires<T> {
  /// Creates a new [`DataExpires`] which expires after `ttl` from now.
  #[inline]
  pub fn new(data: T, ttl: Duration) -> Self {
    Self {
      data,
      expires: Expires::new(ttl),
    }
  }

  /// Creates a new [`DataExpires`] which expires at the given instant.
  #[inline]
  pub const fn at(data: T, instant: Instant) -> Self {
    Self {
      data,
      expires: Expires::at(instant),
    }
  }

  /// Creates a new [`DataExpires`] which only expires when forced.
  #[inline]
  pub const fn never(data: T) -> Self {
    Self {
      data,
      expires: Expires::never(),
    }
  }

  /// Returns the payload.
  #[inline]
  pub const fn data(&self) -> &T {
    &self.data
  }

  /// Returns the expiry part.
  #[inline]
  pub const fn expires(&self) -> &Expires {
    &self.expires
  }

  /// Consumes the value and returns the payload.
  #[inline]
  pub fn into_data(self) -> T {
    self.data
  }
}

impl<T> Deref for DataExpires<T> {
  type Target = Expires;

  #[inline]
  fn deref(&self) -> &Self::Target {
    &self.expires
  }
}

impl<T: fmt::Display> fmt::Display for DataExpires<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.data, self.expires)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn test_expires_after_ttl() {
    let ep = Expires::new(Duration::from_secs(10));
    assert!(!ep.is_expired());
    assert_eq!(ep.remaining(), Some(Duration::from_secs(10)));

    tokio::time::advance(Duration::from_secs(10)).await;
    // exactly at the deadline is still fresh
    assert!(!ep.is_expired());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(ep.is_expired());
    assert_eq!(ep.remaining(), Some(Duration::ZERO));
  }

  #[test]
  fn test_max_ttl_never_expires() {
    let ep = Expires::new(Duration::MAX);
    assert!(ep.expires_at().is_none());
    assert!(!ep.is_expired());
    assert!(ep.remaining().is_none());
    assert!(ep.to_string().starts_with("never expires"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_expires_at_past_instant() {
    let past = Instant::now();
    tokio::time::advance(Duration::from_millis(1)).await;

    let ep = Expires::at(past);
    assert!(ep.is_expired());
    assert_eq!(ep.expires_at(), Some(past));
  }

  #[tokio::test(start_paused = true)]
  async fn test_force_expire_is_sticky() {
    let ep = Expires::new(Duration::from_secs(60));
    ep.force_expire(true);
    assert!(ep.is_expired());
    assert!(ep.is_aborted());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(ep.is_expired());
    assert_eq!(ep.remaining(), Some(Duration::ZERO));

    // clearing the override before the deadline makes the value fresh again
    ep.force_expire(false);
    assert!(!ep.is_expired());

    // but never revives a value past its deadline
    tokio::time::advance(Duration::from_secs(31)).await;
    ep.force_expire(true);
    ep.force_expire(false);
    assert!(ep.is_expired());
  }

  #[test]
  fn test_force_expire_on_never() {
    let ep = Expires::never();
    assert!(!ep.is_expired());
    ep.force_expire(true);
    assert!(ep.is_expired());

    let cloned = ep.clone();
    assert!(cloned.is_aborted());
  }

  #[tokio::test(start_paused = true)]
  async fn test_display() {
    let ep = Expires::new(Duration::from_secs(90));
    assert_eq!(ep.to_string(), "expires in 1m 30s, abort: false");

    tokio::time::advance(Duration::from_secs(120)).await;
    ep.force_expire(true);
    assert_eq!(ep.to_string(), "expired 30s ago, abort: true");
  }

  #[tokio::test(start_paused = true)]
  async fn test_data_expires() {
    let de = DataExpires::new("10.0.0.1", Duration::from_secs(5));
    assert_eq!(*de.data(), "10.0.0.1");
    assert!(!de.is_expired());
    assert_eq!(de.to_string(), "10.0.0.1 (expires in 5s, abort: false)");

    de.force_expire(true);
    assert!(de.expires().is_expired());
    assert_eq!(de.into_data(), "10.0.0.1");

    let pinned = DataExpires::never(1u8);
    tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
    assert!(!pinned.is_expired());
  }
}
