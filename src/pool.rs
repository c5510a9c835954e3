use core::future::Future;
use std::{collections::HashMap, sync::Arc};

use crossbeam_skiplist::SkipMap;
use futures::{
  FutureExt,
  future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::DataExpires;

/// A boxed error returned by a compute function.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Errors returned by [`CachePool::get_or_compute`].
///
/// The error is shared by every caller which waited on the same computation,
/// so it is cheap to clone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
  /// Returned when the compute function fails.
  #[error(transparent)]
  Compute(Arc<dyn core::error::Error + Send + Sync + 'static>),
  /// Returned when the computation task panicked or was cancelled by the runtime.
  #[error("computation for `{0}` was interrupted")]
  Interrupted(SmolStr),
}

impl PoolError {
  /// Returns the error of the compute function, if any.
  #[inline]
  pub fn compute_error(&self) -> Option<&(dyn core::error::Error + Send + Sync + 'static)> {
    match self {
      Self::Compute(e) => Some(e.as_ref()),
      Self::Interrupted(_) => None,
    }
  }

  /// Attempts to downcast the error of the compute function to a concrete type.
  #[inline]
  pub fn downcast_ref<E: core::error::Error + 'static>(&self) -> Option<&E> {
    self.compute_error().and_then(|e| e.downcast_ref::<E>())
  }
}

type Computation<T> = Shared<BoxFuture<'static, Result<Arc<DataExpires<T>>, PoolError>>>;

struct Inner<T> {
  name: SmolStr,
  entries: SkipMap<SmolStr, Arc<DataExpires<T>>>,
  in_flight: Mutex<HashMap<SmolStr, Computation<T>>>,
}

/// A named, concurrent map from string keys to [`DataExpires`] values.
///
/// The pool does not decide how long a value lives, whoever produces the
/// value does. Expired entries stay in the pool until they are replaced by a
/// new computation, removed, or purged with [`CachePool::purge_expired`].
///
/// Cloning a [`CachePool`] is cheap, every clone shares the same entries.
pub struct CachePool<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for CachePool<T> {
  #[inline]
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T> core::fmt::Debug for CachePool<T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("CachePool")
      .field("name", &self.inner.name)
      .field("entries", &self.inner.entries.len())
      .field("in_flight", &self.inner.in_flight.lock().len())
      .finish()
  }
}

impl<T: Send + Sync + 'static> CachePool<T> {
  /// Creates an empty pool with the given name.
  pub fn new(name: impl Into<SmolStr>) -> Self {
    Self {
      inner: Arc::new(Inner {
        name: name.into(),
        entries: SkipMap::new(),
        in_flight: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Returns the name of the pool.
  #[inline]
  pub fn name(&self) -> &str {
    self.inner.name.as_str()
  }

  /// Returns `true` if both handles point to the same pool.
  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Stores `value` under `key`, replacing whatever was there.
  ///
  /// A computation for `key` which is running while `value` is stored does
  /// not overwrite it when it finishes.
  pub fn store(&self, key: impl Into<SmolStr>, value: DataExpires<T>) -> Arc<DataExpires<T>> {
    let value = Arc::new(value);
    let _in_flight = self.inner.in_flight.lock();
    self.inner.entries.insert(key.into(), value.clone());
    value
  }

  /// Returns the entry stored under `key`.
  ///
  /// The entry is returned even if it has expired, check
  /// [`Expires::is_expired`](crate::Expires::is_expired) when freshness matters.
  #[inline]
  pub fn get(&self, key: &str) -> Option<Arc<DataExpires<T>>> {
    self.inner.entries.get(key).map(|ent| ent.value().clone())
  }

  /// Removes the entry stored under `key`.
  #[inline]
  pub fn remove(&self, key: &str) -> Option<Arc<DataExpires<T>>> {
    self.inner.entries.remove(key).map(|ent| ent.value().clone())
  }

  /// Removes every expired entry, returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let mut removed = 0;
    for ent in self.inner.entries.iter() {
      if ent.value().is_expired() && ent.remove() {
        removed += 1;
      }
    }
    removed
  }

  /// Returns the number of entries, expired ones included.
  #[inline]
  pub fn len(&self) -> usize {
    self.inner.entries.len()
  }

  /// Returns `true` if the pool has no entries.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.inner.entries.is_empty()
  }

  /// Returns the number of computations currently running.
  #[inline]
  pub fn in_flight(&self) -> usize {
    self.inner.in_flight.lock().len()
  }

  /// Returns the live entry under `key`, or computes a new one.
  ///
  /// At most one computation runs per key. Callers arriving while it runs
  /// wait for it and get the same value, or the same error, instead of
  /// calling `compute` themselves. A successful result replaces the entry
  /// under `key`, unless [`CachePool::store`] put a newer entry there while
  /// the computation ran; a failure is handed to the waiters and nothing is
  /// stored, so the next call computes again.
  ///
  /// The computation is spawned onto the tokio runtime, so it completes and
  /// stores its value even if the caller which started it goes away.
  /// `compute` is invoked while an internal lock is held and must not touch
  /// this pool itself, the future it returns may.
  pub async fn get_or_compute<F, Fut, E>(
    &self,
    key: &str,
    compute: F,
  ) -> Result<Arc<DataExpires<T>>, PoolError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<DataExpires<T>, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
  {
    if let Some(live) = self.live(key) {
      return Ok(live);
    }

    let computation = {
      let mut in_flight = self.inner.in_flight.lock();
      // A finished computation stores its value before leaving the in-flight
      // map, so under the lock we either see the value or the computation.
      if let Some(live) = self.live(key) {
        return Ok(live);
      }

      match in_flight.get(key) {
        Some(computation) => computation.clone(),
        None => {
          let key = SmolStr::from(key);
          let prev = self.get(&key);
          let computation = self.spawn(key.clone(), prev, compute());
          in_flight.insert(key, computation.clone());
          computation
        }
      }
    };

    computation.await
  }

  fn live(&self, key: &str) -> Option<Arc<DataExpires<T>>> {
    self
      .inner
      .entries
      .get(key)
      .map(|ent| ent.value().clone())
      .filter(|val| !val.is_expired())
  }

  /// `prev` is the entry under `key` when the computation starts, the result
  /// only replaces that one.
  fn spawn<Fut, E>(
    &self,
    key: SmolStr,
    prev: Option<Arc<DataExpires<T>>>,
    fut: Fut,
  ) -> Computation<T>
  where
    Fut: Future<Output = Result<DataExpires<T>, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
  {
    #[cfg(feature = "tracing")]
    tracing::debug!(target: "dialcache.pool", pool = %self.inner.name, key = %key, "start computation");

    let guard = InFlightGuard {
      inner: self.inner.clone(),
      key: key.clone(),
    };

    let handle = tokio::spawn(async move {
      let res = fut.await;
      let inner = &guard.inner;
      match res {
        Ok(val) => {
          let val = Arc::new(val);
          let _in_flight = inner.in_flight.lock();
          let current = inner
            .entries
            .get(guard.key.as_str())
            .map(|ent| ent.value().clone());
          match current {
            Some(current) if !prev.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, &current)) => {
              #[cfg(feature = "tracing")]
              tracing::debug!(target: "dialcache.pool", pool = %inner.name, key = %guard.key, "entry replaced during computation, keep it");
              if current.is_expired() {
                Ok(val)
              } else {
                Ok(current)
              }
            }
            _ => {
              inner.entries.insert(guard.key.clone(), val.clone());
              Ok(val)
            }
          }
        }
        Err(e) => {
          let e: BoxError = e.into();
          #[cfg(feature = "tracing")]
          tracing::debug!(target: "dialcache.pool", pool = %inner.name, key = %guard.key, err = %e, "computation failed");
          Err(PoolError::Compute(Arc::from(e)))
        }
      }
      // `guard` drops here and clears the in-flight record, after the value
      // has been stored.
    });

    async move {
      match handle.await {
        Ok(res) => res,
        Err(_) => Err(PoolError::Interrupted(key)),
      }
    }
    .boxed()
    .shared()
  }
}

/// Clears the in-flight record of a key when the computation task ends,
/// including when it panics or is cancelled.
struct InFlightGuard<T> {
  inner: Arc<Inner<T>>,
  key: SmolStr,
}

impl<T> Drop for InFlightGuard<T> {
  fn drop(&mut self) {
    self.inner.in_flight.lock().remove(&self.key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  #[derive(Debug, thiserror::Error)]
  #[error("lookup failed")]
  struct LookupFailed;

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_single_flight() {
    let pool = CachePool::<u64>::new("test/single-flight");
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks = (0..64)
      .map(|_| {
        let pool = pool.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
          pool
            .get_or_compute("host", move || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(Duration::from_millis(50)).await;
              Ok::<_, LookupFailed>(DataExpires::new(42, Duration::from_secs(60)))
            })
            .await
        })
      })
      .collect::<Vec<_>>();

    let mut values = Vec::new();
    for res in futures::future::join_all(tasks).await {
      values.push(res.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(*values[0].data(), 42);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.in_flight(), 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_failure_is_shared_and_not_cached() {
    let pool = CachePool::<u64>::new("test/failure");
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks = (0..16)
      .map(|_| {
        let pool = pool.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
          pool
            .get_or_compute("host", move || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(Duration::from_millis(50)).await;
              Err::<DataExpires<u64>, _>(LookupFailed)
            })
            .await
        })
      })
      .collect::<Vec<_>>();

    let mut errors = Vec::new();
    for res in futures::future::join_all(tasks).await {
      errors.push(res.unwrap().unwrap_err());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = match &errors[0] {
      PoolError::Compute(e) => e.clone(),
      other => panic!("unexpected error: {other}"),
    };
    for err in &errors {
      match err {
        PoolError::Compute(e) => assert!(Arc::ptr_eq(e, &first)),
        other => panic!("unexpected error: {other}"),
      }
      assert!(err.downcast_ref::<LookupFailed>().is_some());
      assert_eq!(err.to_string(), "lookup failed");
    }
    assert!(pool.get("host").is_none());
    assert!(pool.is_empty());

    // the next call computes again
    let calls2 = calls.clone();
    let val = pool
      .get_or_compute("host", move || async move {
        calls2.fetch_add(1, Ordering::SeqCst);
        Ok::<_, LookupFailed>(DataExpires::new(7, Duration::from_secs(60)))
      })
      .await
      .unwrap();
    assert_eq!(*val.data(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_live_entry_skips_compute() {
    let pool = CachePool::<&'static str>::new("test/live");
    pool.store("host", DataExpires::new("cached", Duration::from_secs(60)));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let val = pool
      .get_or_compute("host", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, LookupFailed>(DataExpires::new("fresh", Duration::from_secs(60)))
      })
      .await
      .unwrap();
    assert_eq!(*val.data(), "cached");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entry_is_recomputed() {
    let pool = CachePool::<u32>::new("test/expired");
    let old = pool.store("host", DataExpires::new(1, Duration::from_secs(60)));

    tokio::time::advance(Duration::from_secs(61)).await;
    // `get` hands out expired entries untouched
    assert!(pool.get("host").unwrap().is_expired());

    let val = pool
      .get_or_compute("host", || async {
        Ok::<_, LookupFailed>(DataExpires::new(2, Duration::from_secs(60)))
      })
      .await
      .unwrap();
    assert_eq!(*val.data(), 2);
    assert!(!Arc::ptr_eq(&val, &old));
    assert!(Arc::ptr_eq(&pool.get("host").unwrap(), &val));
    assert_eq!(pool.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_forced_expiry_triggers_compute() {
    let pool = CachePool::<u32>::new("test/forced");
    let pinned = pool.store("host", DataExpires::never(1));
    pinned.force_expire(true);

    let val = pool
      .get_or_compute("host", || async {
        Ok::<_, LookupFailed>(DataExpires::new(2, Duration::from_secs(60)))
      })
      .await
      .unwrap();
    assert_eq!(*val.data(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_abandoned_caller_does_not_cancel() {
    let pool = CachePool::<u32>::new("test/abandoned");

    let caller = {
      let pool = pool.clone();
      tokio::spawn(async move {
        pool
          .get_or_compute("host", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, LookupFailed>(DataExpires::new(9, Duration::from_secs(60)))
          })
          .await
      })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pool.in_flight(), 1);
    caller.abort();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(*pool.get("host").unwrap().data(), 9);
  }

  #[tokio::test]
  async fn test_panicking_compute_is_not_stuck() {
    let pool = CachePool::<u32>::new("test/panic");

    let err = pool
      .get_or_compute("host", || async {
        if true {
          panic!("boom");
        }
        Ok::<_, LookupFailed>(DataExpires::new(0, Duration::from_secs(60)))
      })
      .await
      .unwrap_err();
    assert!(matches!(err, PoolError::Interrupted(ref key) if key == "host"));
    assert!(err.compute_error().is_none());
    assert_eq!(pool.in_flight(), 0);

    let val = pool
      .get_or_compute("host", || async {
        Ok::<_, LookupFailed>(DataExpires::new(3, Duration::from_secs(60)))
      })
      .await
      .unwrap();
    assert_eq!(*val.data(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_store_during_computation_wins() {
    let pool = CachePool::<u32>::new("test/store-during-computation");

    let caller = {
      let pool = pool.clone();
      tokio::spawn(async move {
        pool
          .get_or_compute("host", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, LookupFailed>(DataExpires::new(1, Duration::from_secs(60)))
          })
          .await
      })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pool.in_flight(), 1);
    pool.store("host", DataExpires::never(2));

    let val = caller.await.unwrap().unwrap();
    assert_eq!(*val.data(), 2);
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(*pool.get("host").unwrap().data(), 2);
    assert!(pool.get("host").unwrap().expires_at().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_purge_and_remove() {
    let pool = CachePool::<u32>::new("test/purge");
    pool.store("a", DataExpires::new(1, Duration::from_secs(10)));
    pool.store("b", DataExpires::new(2, Duration::from_secs(100)));
    pool.store("c", DataExpires::never(3));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(pool.purge_expired(), 1);
    assert_eq!(pool.len(), 2);
    assert!(pool.get("a").is_none());

    assert_eq!(*pool.remove("b").unwrap().data(), 2);
    assert!(pool.remove("b").is_none());
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.name(), "test/purge");
  }
}
