use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    db::store::{MonthlyUsage, StateStore, WindowSlot, WindowState},
    error::{AppError, AppResult},
};

/// Process-local store for single-instance deployments and tests
///
/// Each operation holds the one mutex for its whole read-modify-write.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, StoredValue>,
    windows: HashMap<String, WindowState>,
    usage: HashMap<String, MonthlyUsage>,
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut inner = self.lock()?;
        let expired = match inner.values.get(key) {
            Some(stored) => stored.expires_at.is_some_and(|at| at <= Instant::now()),
            None => return Ok(None),
        };
        if expired {
            inner.values.remove(key);
            return Ok(None);
        }
        Ok(inner.values.get(key).map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.values.remove(key);
        inner.windows.remove(key);
        inner.usage.remove(key);
        Ok(())
    }

    async fn reserve_window(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowSlot> {
        let mut inner = self.lock()?;
        let state = inner
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState::fresh(now));
        *state = state.rolled(now, window);
        let granted = state.count < limit;
        if granted {
            state.count += 1;
        }
        Ok(WindowSlot {
            state: *state,
            granted,
        })
    }

    async fn release_window(&self, key: &str, window_start: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.lock()?;
        if let Some(state) = inner.windows.get_mut(key) {
            if state.window_start == window_start {
                state.count = state.count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn read_usage(&self, key: &str) -> AppResult<MonthlyUsage> {
        let inner = self.lock()?;
        Ok(inner.usage.get(key).copied().unwrap_or_default())
    }

    async fn add_usage(
        &self,
        key: &str,
        cost_usd: f64,
        tokens: u64,
        _ttl: Duration,
    ) -> AppResult<MonthlyUsage> {
        let mut inner = self.lock()?;
        let usage = inner.usage.entry(key.to_string()).or_default();
        usage.accumulated_cost_usd += cost_usd;
        usage.token_count += tokens;
        usage.request_count += 1;
        Ok(*usage)
    }

    async fn claim(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        let held = inner
            .values
            .get(key)
            .is_some_and(|stored| stored.expires_at.map_or(true, |at| at > now));
        if held {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            StoredValue {
                value: token.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn release_claim(&self, key: &str, token: &str) -> AppResult<()> {
        let mut inner = self.lock()?;
        if inner.values.get(key).is_some_and(|stored| stored.value == token) {
            inner.values.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        self.lock().map(|_| ())
    }
}
