#![doc = include_str!("../README.md")]
#![deny(missing_docs, warnings)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

mod addr;
mod expires;
mod pool;
mod registry;

pub use addr::*;
pub use expires::*;
pub use pool::*;
pub use registry::*;

/// Host name resolvers used by the [`Dialer`].
pub mod resolver;
pub use resolver::{HostResolver, IpPreference, NoAddresses};

/// A dialer which caches the resolution of TCP hosts.
pub mod dialer;
pub use dialer::{Connection, Dialer, DialerOptions, Network};

pub use futures;
pub use url;

#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
pub use tokio_rustls;
