use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Values held by the cache. Callers downcast to the concrete type
/// they stored, which is always known from the operation name.
pub type Value = Arc<dyn Any + Send + Sync>;

/// A boxed error produced by a loader.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// SharedError is a cloneable wrapper over a loader's error, letting
/// every waiter of a single-flight evaluation observe the same failure.
#[derive(Clone, Debug)]
pub struct SharedError(Arc<dyn std::error::Error + Send + Sync>);

impl SharedError {
    /// Attempts to view the underlying error as an `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.as_ref().downcast_ref::<E>()
    }
}

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Load(SharedError),
    /// The task evaluating the loader was cancelled before it produced
    /// a result. Nothing was recorded in the cache.
    #[error("cached operation was cancelled before it produced a result")]
    Cancelled,
}

/// TTL used when a caller passes Duration::ZERO.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

type Outcome = Option<Result<Value, SharedError>>;

enum Lookup {
    Cached(Value),
    Pending(watch::Receiver<Outcome>),
    Start(watch::Sender<Outcome>),
}

enum Slot {
    Cached { value: Value, expires_at: Instant },
    // A loader is in flight on the first caller's task. Waiters
    // subscribe to the receiver and observe its outcome.
    Pending(watch::Receiver<Outcome>),
}

/// MemCache is an in-memory keyed store with per-key TTLs and
/// single-flight coalescing: for any key, concurrent calls to
/// `get_or_update` evaluate the loader exactly once, and every caller
/// observes the same outcome. Failed loaders are never cached.
pub struct MemCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches the value at `key`, or evaluates `load` to produce it.
    /// A `ttl` of zero maps to [DEFAULT_TTL]. If the future returned by
    /// this call is dropped while its loader is in flight, pending
    /// waiters are woken with [Error::Cancelled] and nothing is cached.
    pub async fn get_or_update<F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<Value, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, LoadError>>,
    {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };

        let sender = match self.lookup_or_start(key) {
            Lookup::Cached(value) => return Ok(value),
            Lookup::Pending(mut rx) => return wait_for_outcome(&mut rx).await,
            Lookup::Start(tx) => tx,
        };

        // We're the loading caller. The guard removes the pending slot
        // (waking waiters with a closed channel) if we're dropped before
        // the loader resolves.
        let guard = PendingGuard {
            cache: self,
            key,
            armed: true,
        };
        let outcome = load().await;
        let outcome = match outcome {
            Ok(value) => {
                let mut slots = self.slots.lock().unwrap();
                slots.insert(
                    key.to_string(),
                    Slot::Cached {
                        value: value.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(value)
            }
            Err(err) => {
                let err = SharedError(Arc::from(err));
                let mut slots = self.slots.lock().unwrap();
                slots.remove(key);
                Err(err)
            }
        };
        let mut guard = guard;
        guard.armed = false;
        let _ = sender.send(Some(outcome.clone()));
        outcome.map_err(Error::Load)
    }

    /// Locks `slots`, decides the outcome for `key`, and releases the
    /// lock before returning. Kept fully synchronous so the returned
    /// future of `get_or_update` never holds the lock guard across an
    /// await point.
    fn lookup_or_start(&self, key: &str) -> Lookup {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(key) {
            Some(Slot::Cached { value, expires_at }) if *expires_at > Instant::now() => {
                Lookup::Cached(value.clone())
            }
            Some(Slot::Pending(rx)) => Lookup::Pending(rx.clone()),
            _ => {
                let (tx, rx) = watch::channel(None);
                slots.insert(key.to_string(), Slot::Pending(rx));
                Lookup::Start(tx)
            }
        }
    }

    /// Removes every key matching `pattern` and returns them, sorted.
    pub fn delete(&self, pattern: &regex::Regex) -> Vec<String> {
        let mut slots = self.slots.lock().unwrap();
        let mut deleted: Vec<String> = slots
            .keys()
            .filter(|k| pattern.is_match(k))
            .cloned()
            .collect();
        for key in &deleted {
            slots.remove(key);
        }
        deleted.sort();
        deleted
    }

    /// Drops every cached value and pending slot.
    pub fn flush(&self) {
        self.slots.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().unwrap().is_empty()
    }
}

async fn wait_for_outcome(rx: &mut watch::Receiver<Outcome>) -> Result<Value, Error> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => match outcome.as_ref().expect("guarded by wait_for") {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(Error::Load(err.clone())),
        },
        // Sender dropped without an outcome: the loading task was cancelled.
        Err(_) => Err(Error::Cancelled),
    }
}

struct PendingGuard<'c> {
    cache: &'c MemCache,
    key: &'c str,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(key = self.key, "loader cancelled; dropping pending cache slot");
        let mut slots = self.cache.slots.lock().unwrap();
        if let Some(Slot::Pending(_)) = slots.get(self.key) {
            slots.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unpack(v: Value) -> u64 {
        *v.downcast::<u64>().unwrap()
    }

    #[tokio::test]
    async fn fetches_and_caches_a_value() {
        let cache = MemCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_update("List::/docker", Duration::ZERO, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(42u64) as Value)
                })
                .await
                .unwrap();
            assert_eq!(unpack(value), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expires_values_after_their_ttl() {
        let cache = MemCache::new();
        let calls = AtomicUsize::new(0);
        let load = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(7u64) as Value)
        };

        cache
            .get_or_update("List::/a", Duration::from_secs(5), load)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache
            .get_or_update("List::/a", Duration::from_secs(5), load)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache
            .get_or_update("List::/a", Duration::from_secs(5), load)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn coalesces_concurrent_loads() {
        let cache = Arc::new(MemCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let loading = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_update("List::/slow", Duration::ZERO, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release_rx.await.unwrap();
                        Ok(Arc::new(9u64) as Value)
                    })
                    .await
            })
        };
        // Let the loader start before racing the second caller against it.
        tokio::task::yield_now().await;

        let waiting = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_update("List::/slow", Duration::ZERO, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(10u64) as Value)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        release_tx.send(()).unwrap();

        let first = unpack(loading.await.unwrap().unwrap());
        let second = unpack(waiting.await.unwrap().unwrap());
        assert_eq!((first, second), (9, 9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_cache_loader_errors() {
        let cache = MemCache::new();
        let calls = AtomicUsize::new(0);

        let result = cache
            .get_or_update("Metadata::/x", Duration::ZERO, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("backend unavailable".into())
            })
            .await;
        match result {
            Err(Error::Load(err)) => assert_eq!(err.to_string(), "backend unavailable"),
            other => panic!("expected a load error, got {other:?}"),
        }

        cache
            .get_or_update("Metadata::/x", Duration::ZERO, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(1u64) as Value)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn waiters_observe_the_loaders_error() {
        let cache = Arc::new(MemCache::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let loading = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_update("Open::/f", Duration::ZERO, || async move {
                        release_rx.await.unwrap();
                        Err("boom".into())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let waiting = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_update("Open::/f", Duration::ZERO, || async {
                        Ok(Arc::new(0u64) as Value)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        release_tx.send(()).unwrap();

        assert!(matches!(loading.await.unwrap(), Err(Error::Load(_))));
        assert!(matches!(waiting.await.unwrap(), Err(Error::Load(_))));
    }

    #[tokio::test]
    async fn cancelling_the_loader_wakes_waiters() {
        let cache = Arc::new(MemCache::new());

        let loading = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_update("List::/hang", Duration::ZERO, || async {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let waiting = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_update("List::/hang", Duration::ZERO, || async {
                        Ok(Arc::new(0u64) as Value)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        loading.abort();
        assert!(matches!(waiting.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn deletes_keys_matching_a_pattern() {
        let cache = MemCache::new();
        for key in [
            "List::/docker",
            "List::/docker/containers",
            "Metadata::/docker/containers/web",
            "List::/aws",
        ] {
            cache
                .get_or_update(key, Duration::ZERO, || async { Ok(Arc::new(0u64) as Value) })
                .await
                .unwrap();
        }

        let deleted = cache.delete(&regex::Regex::new("^[A-Za-z]+::/docker($|/.*)").unwrap());
        assert_eq!(
            deleted,
            vec![
                "List::/docker",
                "List::/docker/containers",
                "Metadata::/docker/containers/web",
            ]
        );
        assert_eq!(cache.len(), 1);
    }
}
