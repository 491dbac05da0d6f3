use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::task::AbortHandle;

use crate::{
    db::{StateStore, StoreKey},
    error::{AppError, AppResult},
    services::clock::Clock,
};

/// What the cache writes to the store for one key
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: String,
    /// JSON of the cached value
    payload: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a store-wide compute claim lives; other instances take over
    /// once it lapses
    pub claim_lease: Duration,
    /// How often an instance waiting on another instance's claim re-reads the store
    pub poll_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            claim_lease: Duration::from_secs(45),
            poll_interval: Duration::from_millis(100),
        }
    }
}

type FlightResult = Result<String, Arc<AppError>>;

/// A computation running in its own task, shared by every local caller of its key
struct Flight {
    id: u64,
    result: Shared<BoxFuture<'static, FlightResult>>,
    task: AbortHandle,
    callers: usize,
    claim: Claim,
}

#[derive(Debug, Clone)]
struct Claim {
    key: String,
    token: String,
}

/// TTL cache of complete computed responses with single-flight computation
///
/// Expiry is checked lazily on read. A miss starts the computation in a
/// spawned task, so a caller going away does not take the work with it; the
/// task is only abandoned when no caller is left. Instances sharing a store
/// coordinate through a claim key: one computes, the others wait for its
/// payload until the claim lapses. Failed computations are never written.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    flights: Mutex<HashMap<String, Flight>>,
    next_flight: AtomicU64,
}

/// One caller's interest in a flight. Dropping the last one aborts the task.
struct CallerGuard<'a> {
    cache: &'a CacheInner,
    key: String,
    id: u64,
}

impl Drop for CallerGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut flights) = self.cache.flights.lock() else {
            return;
        };
        let Some(flight) = flights.get_mut(&self.key).filter(|f| f.id == self.id) else {
            return;
        };
        flight.callers = flight.callers.saturating_sub(1);
        if flight.callers > 0 {
            return;
        }
        if let Some(flight) = flights.remove(&self.key) {
            flight.task.abort();
            tracing::debug!(key = %self.key, "All callers gone, abandoning computation");
            self.cache.abandon(flight.claim);
        }
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(store, clock, CacheSettings::default())
    }

    pub fn with_settings(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                clock,
                settings,
                flights: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Retrieves a cached value, treating expired entries as misses
    pub async fn get<T: DeserializeOwned>(&self, key: &StoreKey) -> AppResult<Option<T>> {
        match self.inner.read_payload(&key.to_string()).await? {
            Some(payload) => Ok(Some(decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Stores a value under `key` for `ttl`
    pub async fn put<T: Serialize>(&self, key: &StoreKey, value: &T, ttl: Duration) -> AppResult<()> {
        let payload = encode(value)?;
        self.inner.write_payload(&key.to_string(), &payload, ttl).await
    }

    pub async fn invalidate(&self, key: &StoreKey) -> AppResult<()> {
        self.inner.store.delete(&key.to_string()).await
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.inner.store.ping().await
    }

    /// Returns the cached value for `key`, or runs `compute` once for all
    /// concurrent callers and caches its successful result.
    ///
    /// `compute` is only called by the caller that starts the flight; joiners
    /// drop theirs unused.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &StoreKey,
        ttl: Duration,
        compute: F,
    ) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let key_str = key.to_string();

        if let Some(payload) = self.inner.read_payload(&key_str).await? {
            tracing::debug!(key = %key_str, "Cache hit");
            return decode(&payload);
        }

        let (id, result) = {
            let mut flights = self.inner.lock_flights()?;
            let joined = flights.get_mut(&key_str).map(|flight| {
                flight.callers += 1;
                (flight.id, flight.result.clone())
            });
            match joined {
                Some(joined) => {
                    tracing::debug!(key = %key_str, "Joining in-flight computation");
                    joined
                }
                None => {
                    let flight = self.launch(key, ttl, compute);
                    let started = (flight.id, flight.result.clone());
                    flights.insert(key_str.clone(), flight);
                    started
                }
            }
        };
        let _caller = CallerGuard {
            cache: &self.inner,
            key: key_str,
            id,
        };

        match result.await {
            Ok(payload) => decode(&payload),
            Err(e) => Err(e.replicate()),
        }
    }

    /// Spawns the computation. Called with the flight map locked, so the task
    /// cannot remove its entry before it is inserted.
    fn launch<T, F, Fut>(&self, key: &StoreKey, ttl: Duration, compute: F) -> Flight
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let claim = Claim {
            key: StoreKey::ComputeClaim(Box::new(key.clone())).to_string(),
            token: uuid::Uuid::new_v4().to_string(),
        };

        let inner = self.inner.clone();
        let key_str = key.to_string();
        let task_claim = claim.clone();
        let handle = tokio::spawn(async move {
            let outcome = inner.fly(&key_str, &task_claim, ttl, compute).await;
            inner.land(&key_str, id);
            outcome.map_err(Arc::new)
        });
        let task = handle.abort_handle();

        let result = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(Arc::new(AppError::Internal(format!(
                        "Cache computation task failed: {}",
                        e
                    ))))
                })
            })
            .boxed()
            .shared();

        Flight {
            id,
            result,
            task,
            callers: 1,
            claim,
        }
    }
}

impl CacheInner {
    fn lock_flights(&self) -> AppResult<MutexGuard<'_, HashMap<String, Flight>>> {
        self.flights
            .lock()
            .map_err(|_| AppError::Internal("cache flight lock poisoned".to_string()))
    }

    /// Body of a flight task: wait out any other instance's claim, then compute,
    /// store, and release.
    async fn fly<T, F, Fut>(
        &self,
        key: &str,
        claim: &Claim,
        ttl: Duration,
        compute: F,
    ) -> AppResult<String>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        loop {
            // Another request, here or elsewhere, may have finished since the miss
            if let Some(payload) = self.read_payload(key).await? {
                return Ok(payload);
            }
            if self
                .store
                .claim(&claim.key, &claim.token, self.settings.claim_lease)
                .await?
            {
                break;
            }
            tracing::debug!(key = %key, "Another instance is computing, waiting for its result");
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        tracing::debug!(key = %key, "Cache miss, computing");
        let outcome = compute().await.and_then(|value| encode(&value));

        if let Ok(payload) = &outcome {
            if let Err(e) = self.write_payload(key, payload, ttl).await {
                tracing::error!(error = %e, key = %key, "Failed to store computed response");
            }
        }
        if let Err(e) = self.store.release_claim(&claim.key, &claim.token).await {
            tracing::warn!(error = %e, key = %key, "Failed to release compute claim");
        }

        outcome
    }

    /// Removes a finished flight so later misses start afresh
    fn land(&self, key: &str, id: u64) {
        if let Ok(mut flights) = self.flights.lock() {
            if flights.get(key).is_some_and(|flight| flight.id == id) {
                flights.remove(key);
            }
        }
    }

    /// Frees the store claim of an aborted flight instead of letting it lapse
    fn abandon(&self, claim: Claim) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            if let Err(e) = store.release_claim(&claim.key, &claim.token).await {
                tracing::warn!(error = %e, claim = %claim.key, "Failed to release abandoned claim");
            }
        });
    }

    async fn read_payload(&self, key: &str) -> AppResult<Option<String>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Discarding unreadable cache entry");
                self.store.delete(key).await?;
                return Ok(None);
            }
        };

        if entry.expires_at <= self.clock.now() {
            tracing::debug!(key = %key, "Cache entry expired");
            self.store.delete(key).await?;
            return Ok(None);
        }

        Ok(Some(entry.payload))
    }

    async fn write_payload(&self, key: &str, payload: &str, ttl: Duration) -> AppResult<()> {
        let expires_at = self.clock.now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| AppError::Internal(format!("Invalid cache TTL: {}", e)))?;
        let entry = CacheEntry {
            fingerprint: key.to_string(),
            payload: payload.to_string(),
            expires_at,
        };
        let raw = serde_json::to_string(&entry)
            .map_err(|e| AppError::Internal(format!("Cache serialization error: {}", e)))?;
        self.store.set(key, &raw, Some(ttl)).await
    }
}

fn encode<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Internal(format!("Cache serialization error: {}", e)))
}

fn decode<T: DeserializeOwned>(payload: &str) -> AppResult<T> {
    serde_json::from_str(payload)
        .map_err(|e| AppError::Internal(format!("Cache deserialization error: {}", e)))
}
