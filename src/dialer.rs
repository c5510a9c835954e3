use core::{future::Future, str::FromStr, time::Duration};
use std::{
  io,
  net::{AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
  num::ParseIntError,
  sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};
use smol_str::SmolStr;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use url::Url;

use crate::{
  BoxError, CachePool, CacheRegistry, DataExpires, PoolError, SplitHostPortError,
  resolver::{HostResolver, IpPreference, NoAddresses, system::SystemResolver},
  split_host_port,
};

mod options;
pub use options::*;

mod proxy;
pub use proxy::*;

#[cfg(feature = "tls")]
mod tls;

/// The name of the pool which caches resolved TCP hosts.
pub const TCP_POOL: &str = "tcp";

/// The network types understood by [`Dialer::dial`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Network {
  /// TCP over IPv4 or IPv6.
  Tcp,
  /// TCP over IPv4 only.
  Tcp4,
  /// TCP over IPv6 only.
  Tcp6,
  /// UDP over IPv4 or IPv6.
  Udp,
  /// UDP over IPv4 only.
  Udp4,
  /// UDP over IPv6 only.
  Udp6,
  /// Unix domain stream socket.
  Unix,
}

impl Network {
  /// Returns the string form of the network.
  #[inline]
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Tcp => "tcp",
      Self::Tcp4 => "tcp4",
      Self::Tcp6 => "tcp6",
      Self::Udp => "udp",
      Self::Udp4 => "udp4",
      Self::Udp6 => "udp6",
      Self::Unix => "unix",
    }
  }

  /// Returns `true` for the TCP family, whose resolutions are cached.
  #[inline]
  pub const fn is_tcp(&self) -> bool {
    matches!(self, Self::Tcp | Self::Tcp4 | Self::Tcp6)
  }

  /// Returns `true` if the network can reach `ip`.
  #[inline]
  pub fn accepts(&self, ip: IpAddr) -> bool {
    match self {
      Self::Tcp4 | Self::Udp4 => ip.to_canonical().is_ipv4(),
      Self::Tcp6 | Self::Udp6 => ip.is_ipv6(),
      Self::Tcp | Self::Udp | Self::Unix => true,
    }
  }
}

impl core::fmt::Display for Network {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An error which can be returned when parsing a [`Network`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network {0:?}")]
pub struct UnknownNetwork(SmolStr);

impl FromStr for Network {
  type Err = UnknownNetwork;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "tcp" => Self::Tcp,
      "tcp4" => Self::Tcp4,
      "tcp6" => Self::Tcp6,
      "udp" => Self::Udp,
      "udp4" => Self::Udp4,
      "udp6" => Self::Udp6,
      "unix" => Self::Unix,
      other => return Err(UnknownNetwork(other.into())),
    })
  }
}

/// Errors that can occur when dialing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Returned when the network type is not supported.
  #[error(transparent)]
  UnknownNetwork(#[from] UnknownNetwork),
  /// Returned when a TLS dial is requested over a non-TCP network.
  #[error("cannot dial TLS over {0}")]
  UnsupportedNetwork(Network),
  /// Returned when the address cannot be split into host and port.
  #[error(transparent)]
  InvalidAddress(#[from] SplitHostPortError),
  /// Returned when the port is not a number.
  #[error("invalid port {port:?}: {error}")]
  InvalidPort {
    /// The port as it was given.
    port: SmolStr,
    /// Why it failed to parse.
    error: ParseIntError,
  },
  /// Returned when the host cannot be resolved.
  #[error("failed to resolve {host}: {error}")]
  Resolve {
    /// The host being resolved.
    host: SmolStr,
    /// The error shared by every caller waiting on the same lookup.
    error: PoolError,
  },
  /// Returned when no resolved address can be used on the network.
  #[error("no suitable address for {address} on {network}")]
  NoSuitableAddress {
    /// The network being dialed.
    network: Network,
    /// The address being dialed.
    address: SmolStr,
  },
  /// Returned when the resolved address does not belong to the network's family.
  #[error("resolved address {ip} cannot be dialed on {network}")]
  AddressFamily {
    /// The network being dialed.
    network: Network,
    /// The resolved address.
    ip: IpAddr,
  },
  /// Returned when the host is not a valid TLS server name.
  #[cfg(feature = "tls")]
  #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
  #[error("invalid TLS server name: {0}")]
  InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),
  /// Returned when the TLS client configuration cannot be built.
  #[cfg(feature = "tls")]
  #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
  #[error(transparent)]
  Tls(#[from] rustls::Error),
  /// Returned when there is an io error, including connect failures and timeouts.
  #[error(transparent)]
  IO(#[from] io::Error),
}

/// A connection returned by [`Dialer::dial`].
#[derive(Debug)]
pub enum Connection {
  /// A TCP stream.
  Tcp(TcpStream),
  /// A connected UDP socket.
  Udp(UdpSocket),
  /// A Unix domain stream.
  #[cfg(unix)]
  #[cfg_attr(docsrs, doc(cfg(unix)))]
  Unix(tokio::net::UnixStream),
}

impl Connection {
  /// Returns the TCP stream, if this is a TCP connection.
  #[inline]
  pub fn into_tcp(self) -> Option<TcpStream> {
    match self {
      Self::Tcp(stream) => Some(stream),
      _ => None,
    }
  }

  /// Returns the UDP socket, if this is a UDP connection.
  #[inline]
  pub fn into_udp(self) -> Option<UdpSocket> {
    match self {
      Self::Udp(socket) => Some(socket),
      _ => None,
    }
  }
}

struct Settings {
  local_addrs: Vec<IpAddr>,
  ip_preference: IpPreference,
  proxy: SmolStr,
}

/// Opens outbound connections, caching the DNS resolution of TCP hosts.
///
/// Resolved addresses live in the [`TCP_POOL`] pool of the dialer's
/// [`CacheRegistry`] for [`DialerOptions::record_ttl`]. Concurrent dials to a
/// host which is not cached yet share one lookup, a failed lookup is never
/// cached.
///
/// Local addresses, ip preference and proxy can be changed at any time; a dial
/// already in progress sees either the old or the new value.
pub struct Dialer<R = SystemResolver> {
  resolver: Arc<R>,
  registry: Arc<CacheRegistry<IpAddr>>,
  tcp: CachePool<IpAddr>,
  settings: RwLock<Settings>,
  rng: Mutex<Box<dyn RngCore + Send>>,
  env_proxy: EnvProxy,
  connect_timeout: Duration,
  lookup_timeout: Duration,
  keepalive: Duration,
  record_ttl: Duration,
  #[cfg(feature = "tls")]
  tls: tls::TlsConfigs,
}

impl<R> core::fmt::Debug for Dialer<R> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let settings = self.settings.read();
    f.debug_struct("Dialer")
      .field("tcp", &self.tcp)
      .field("local_addrs", &settings.local_addrs)
      .field("ip_preference", &settings.ip_preference)
      .field("proxy", &settings.proxy)
      .field("connect_timeout", &self.connect_timeout)
      .field("lookup_timeout", &self.lookup_timeout)
      .field("keepalive", &self.keepalive)
      .field("record_ttl", &self.record_ttl)
      .finish_non_exhaustive()
  }
}

impl Default for Dialer<SystemResolver> {
  fn default() -> Self {
    Self::new(SystemResolver::new(), DialerOptions::default())
  }
}

impl<R: HostResolver> Dialer<R> {
  /// Create a new [`Dialer`] with its own [`CacheRegistry`].
  pub fn new(resolver: R, opts: DialerOptions) -> Self {
    Self::with_registry(resolver, opts, Arc::new(CacheRegistry::new()))
  }

  /// Create a new [`Dialer`] which keeps its cache in `registry`.
  ///
  /// Dialers sharing a registry share their resolved hosts and pins.
  pub fn with_registry(
    resolver: R,
    opts: DialerOptions,
    registry: Arc<CacheRegistry<IpAddr>>,
  ) -> Self {
    Self {
      resolver: Arc::new(resolver),
      tcp: registry.pool(TCP_POOL),
      registry,
      settings: RwLock::new(Settings {
        local_addrs: opts.local_addrs().to_vec(),
        ip_preference: opts.ip_preference(),
        proxy: opts.proxy().into(),
      }),
      rng: Mutex::new(Box::new(StdRng::from_os_rng())),
      env_proxy: EnvProxy::from_env(),
      connect_timeout: opts.connect_timeout(),
      lookup_timeout: opts.lookup_timeout(),
      keepalive: opts.keepalive(),
      record_ttl: opts.record_ttl(),
      #[cfg(feature = "tls")]
      tls: tls::TlsConfigs::default(),
    }
  }

  /// Set the random source used to pick a local address in builder pattern
  pub fn with_rng(self, rng: impl RngCore + Send + 'static) -> Self {
    self.set_rng(rng);
    self
  }

  /// Set the random source used to pick a local address
  pub fn set_rng(&self, rng: impl RngCore + Send + 'static) {
    *self.rng.lock() = Box::new(rng);
  }

  /// Set the environment proxy settings in builder pattern, they are read from
  /// the process environment on construction by default.
  pub fn with_env_proxy(mut self, env_proxy: EnvProxy) -> Self {
    self.env_proxy = env_proxy;
    self
  }

  /// Returns the registry holding the dialer's cache.
  #[inline]
  pub fn registry(&self) -> &Arc<CacheRegistry<IpAddr>> {
    &self.registry
  }

  /// Returns the pool caching resolved TCP hosts.
  #[inline]
  pub fn tcp_pool(&self) -> &CachePool<IpAddr> {
    &self.tcp
  }

  /// Replaces the local addresses to bind outgoing connections to.
  ///
  /// Strings which are not exact ip literals, surrounding whitespace
  /// included, are skipped. Returns how many addresses were kept.
  pub fn set_local_addrs<I, S>(&self, ips: I) -> usize
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let addrs = ips
      .into_iter()
      .filter_map(|ip| {
        let ip = ip.as_ref();
        match ip.parse::<IpAddr>() {
          Ok(addr) => Some(addr),
          Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(target: "dialcache.dialer", addr = %ip, err = %_e, "skip invalid local address");
            None
          }
        }
      })
      .collect::<Vec<_>>();

    let kept = addrs.len();
    self.settings.write().local_addrs = addrs;
    kept
  }

  /// Returns the local addresses outgoing connections are bound to.
  pub fn local_addrs(&self) -> Vec<IpAddr> {
    self.settings.read().local_addrs.clone()
  }

  /// Set which address family wins when a host resolves to several addresses.
  pub fn set_ip_preference(&self, preference: IpPreference) {
    self.settings.write().ip_preference = preference;
  }

  /// Returns the ip preference.
  pub fn ip_preference(&self) -> IpPreference {
    self.settings.read().ip_preference
  }

  /// Set the proxy address, an empty string clears it.
  pub fn set_proxy(&self, addr: impl Into<SmolStr>) {
    self.settings.write().proxy = addr.into();
  }

  /// Returns the configured proxy address.
  pub fn proxy(&self) -> SmolStr {
    self.settings.read().proxy.clone()
  }

  /// Returns the proxy to use for requests to `target`.
  ///
  /// The configured proxy wins when it parses, either as a bare `host:port`
  /// or as a url. Otherwise the environment decides.
  pub fn proxy_for(&self, target: &Url) -> Option<Url> {
    let configured = self.proxy();
    if let Some(proxy) = parse_proxy(&configured) {
      return Some(proxy);
    }

    #[cfg(feature = "tracing")]
    if !configured.is_empty() {
      tracing::warn!(target: "dialcache.dialer", proxy = %configured, "invalid proxy address, fall back to environment");
    }

    self.env_proxy.proxy_for(target)
  }

  /// Binds `host` to `ip` until the process exits, the host is unpinned, or
  /// pinned again. The resolver is never asked for a pinned host.
  pub fn pin_host(&self, host: &str, ip: &str) -> Result<(), AddrParseError> {
    let ip = ip.parse::<IpAddr>()?;
    self.tcp.store(host, DataExpires::never(ip));

    #[cfg(feature = "tracing")]
    tracing::debug!(target: "dialcache.dialer", host = %host, ip = %ip, "pin host");
    Ok(())
  }

  /// Marks the cached address of `host` as expired so the next dial
  /// resolves it again. Returns `false` if nothing was cached.
  pub fn unpin_host(&self, host: &str) -> bool {
    match self.tcp.get(host) {
      Some(ent) => {
        ent.force_expire(true);
        true
      }
      None => false,
    }
  }

  /// Resolves `host` through the cache.
  ///
  /// Ip literals are returned as they are, without touching the cache. A
  /// lookup which takes longer than [`DialerOptions::lookup_timeout`] fails
  /// every caller waiting on it with a [`io::ErrorKind::TimedOut`] error,
  /// which is not cached.
  pub async fn resolve(&self, host: &str) -> Result<IpAddr, Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
      return Ok(ip);
    }

    let resolver = self.resolver.clone();
    let preference = self.ip_preference();
    let ttl = self.record_ttl;
    let timeout = self.lookup_timeout;
    let name = SmolStr::from(host);

    let ent = self
      .tcp
      .get_or_compute(host, move || async move {
        let addrs = match tokio::time::timeout(timeout, resolver.lookup(&name)).await {
          Ok(res) => res.map_err(BoxError::from)?,
          Err(_) => {
            return Err(BoxError::from(io::Error::new(
              io::ErrorKind::TimedOut,
              format!("lookup of {name} timed out after {timeout:?}"),
            )));
          }
        };
        let Some(ip) = preference.select(&addrs) else {
          return Err(BoxError::from(NoAddresses(name)));
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(target: "dialcache.dialer", host = %name, ip = %ip, preference = %preference, "resolved host");
        Ok(DataExpires::new(ip, ttl))
      })
      .await
      .map_err(|error| Error::Resolve {
        host: host.into(),
        error,
      })?;

    Ok(*ent.data())
  }

  /// Connects to `address` on `network`.
  ///
  /// - `tcp`, `tcp4`, `tcp6`: the host is resolved through the cache, the
  ///   connection is bound to one of the local addresses picked at random.
  /// - `udp`, `udp4`, `udp6`: the address is resolved by the operating system
  ///   on every call, the socket is bound the same way as for TCP.
  /// - `unix`: `address` is a socket path.
  pub async fn dial(&self, network: &str, address: &str) -> Result<Connection, Error> {
    let network = network.parse::<Network>()?;
    match network {
      Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
        self.dial_tcp(network, address).await.map(Connection::Tcp)
      }
      Network::Udp | Network::Udp4 | Network::Udp6 => {
        self.dial_udp(network, address).await.map(Connection::Udp)
      }
      Network::Unix => self.dial_unix(address).await,
    }
  }

  /// Connects to `address` like [`Dialer::dial`], then runs a TLS handshake
  /// using the host part of `address` as server name.
  ///
  /// With `skip_verify` the server certificate is not checked.
  #[cfg(feature = "tls")]
  #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
  pub async fn dial_tls(
    &self,
    network: &str,
    address: &str,
    skip_verify: bool,
  ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, Error> {
    let network = network.parse::<Network>()?;
    if !network.is_tcp() {
      return Err(Error::UnsupportedNetwork(network));
    }

    let (host, _) = split_host_port(address)?;
    let stream = self.dial_tcp(network, address).await?;
    self.tls.handshake(host, stream, skip_verify).await
  }

  async fn dial_tcp(&self, network: Network, address: &str) -> Result<TcpStream, Error> {
    let (host, port) = split_host_port(address)?;
    let port = parse_port(port)?;
    let ip = self.resolve(host).await?;
    if !network.accepts(ip) {
      return Err(Error::AddressFamily { network, ip });
    }

    let remote = SocketAddr::new(ip, port);
    let socket = match remote {
      SocketAddr::V4(_) => TcpSocket::new_v4()?,
      SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(local) = self.local_addr() {
      socket.bind(SocketAddr::new(local, 0))?;
    }

    let stream = self.timeout(address, socket.connect(remote)).await?;
    if !self.keepalive.is_zero() {
      SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(self.keepalive))?;
    }
    Ok(stream)
  }

  async fn dial_udp(&self, network: Network, address: &str) -> Result<UdpSocket, Error> {
    let (_, port) = split_host_port(address)?;
    parse_port(port)?;

    let addrs = self.timeout(address, tokio::net::lookup_host(address)).await?;
    let remote = addrs
      .into_iter()
      .find(|addr| network.accepts(addr.ip()))
      .ok_or_else(|| Error::NoSuitableAddress {
        network,
        address: address.into(),
      })?;

    let local = self.local_addr().unwrap_or(match remote {
      SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
      SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    });
    let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
    socket.connect(remote).await?;
    Ok(socket)
  }

  #[cfg(unix)]
  async fn dial_unix(&self, path: &str) -> Result<Connection, Error> {
    let stream = self
      .timeout(path, tokio::net::UnixStream::connect(path))
      .await?;
    Ok(Connection::Unix(stream))
  }

  #[cfg(not(unix))]
  async fn dial_unix(&self, _path: &str) -> Result<Connection, Error> {
    Err(Error::IO(io::Error::new(
      io::ErrorKind::Unsupported,
      "unix sockets are not supported on this platform",
    )))
  }

  /// Picks one of the local addresses uniformly at random.
  fn local_addr(&self) -> Option<IpAddr> {
    let settings = self.settings.read();
    match settings.local_addrs.len() {
      0 => None,
      n => {
        let idx = self.rng.lock().random_range(0..n);
        Some(settings.local_addrs[idx])
      }
    }
  }

  async fn timeout<T>(
    &self,
    address: &str,
    fut: impl Future<Output = io::Result<T>>,
  ) -> Result<T, Error> {
    match tokio::time::timeout(self.connect_timeout, fut).await {
      Ok(res) => res.map_err(Error::IO),
      Err(_) => Err(Error::IO(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("dial {address}: timed out after {:?}", self.connect_timeout),
      ))),
    }
  }
}

fn parse_port(port: &str) -> Result<u16, Error> {
  port.parse::<u16>().map_err(|error| Error::InvalidPort {
    port: port.into(),
    error,
  })
}
