use crossbeam_skiplist::SkipMap;
use smol_str::SmolStr;

use crate::CachePool;

/// A lazily populated set of named [`CachePool`]s.
///
/// Every name maps to exactly one pool for the lifetime of the registry: the
/// first request for a name creates the pool, every later request, from any
/// thread, gets a handle to that same pool. Pools are never dropped from the
/// registry.
pub struct CacheRegistry<T> {
  pools: SkipMap<SmolStr, CachePool<T>>,
}

impl<T> Default for CacheRegistry<T> {
  fn default() -> Self {
    Self {
      pools: SkipMap::new(),
    }
  }
}

impl<T> core::fmt::Debug for CacheRegistry<T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_list()
      .entries(self.pools.iter().map(|ent| ent.key().clone()))
      .finish()
  }
}

impl<T: Send + Sync + 'static> CacheRegistry<T> {
  /// Creates an empty registry.
  #[inline]
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the pool registered under `name`, creating it on first use.
  pub fn pool(&self, name: &str) -> CachePool<T> {
    if let Some(ent) = self.pools.get(name) {
      return ent.value().clone();
    }

    // `get_or_insert_with` keeps the first inserted pool when several threads
    // race on the same name.
    let ent = self.pools.get_or_insert_with(SmolStr::from(name), || {
      #[cfg(feature = "tracing")]
      tracing::debug!(target: "dialcache.registry", pool = %name, "create cache pool");
      CachePool::new(name)
    });
    ent.value().clone()
  }

  /// Returns the pool registered under `name` without creating it.
  #[inline]
  pub fn get(&self, name: &str) -> Option<CachePool<T>> {
    self.pools.get(name).map(|ent| ent.value().clone())
  }

  /// Returns the names of all registered pools, in lexical order.
  pub fn names(&self) -> Vec<SmolStr> {
    self.pools.iter().map(|ent| ent.key().clone()).collect()
  }

  /// Returns the number of registered pools.
  #[inline]
  pub fn len(&self) -> usize {
    self.pools.len()
  }

  /// Returns `true` if no pool has been registered yet.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.pools.is_empty()
  }
}
