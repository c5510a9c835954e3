/// Async DNS resolver
#[cfg(feature = "dns")]
#[cfg_attr(docsrs, doc(cfg(feature = "dns")))]
pub mod dns;

/// Operating system resolver
pub mod system;
