use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppResult;

/// A fixed-window counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub count: u64,
    pub window_start: DateTime<Utc>,
}

impl WindowState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// A window is over once `now - window_start >= window`. Clock skew that puts
    /// `now` before the start never expires it.
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        (now - self.window_start)
            .to_std()
            .map(|elapsed| elapsed >= window)
            .unwrap_or(false)
    }

    /// The state as seen at `now`: reset to an empty window if the old one is over.
    pub fn rolled(self, now: DateTime<Utc>, window: Duration) -> Self {
        if self.is_expired(now, window) {
            Self::fresh(now)
        } else {
            self
        }
    }

    /// Whole seconds until the window resets, at least 1
    pub fn seconds_until_reset(&self, now: DateTime<Utc>, window: Duration) -> u64 {
        let elapsed = (now - self.window_start).to_std().unwrap_or(Duration::ZERO);
        let remaining = window.saturating_sub(elapsed);
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        secs.max(1)
    }
}

/// Result of [`StateStore::reserve_window`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlot {
    /// Window after the call, including the slot when one was granted
    pub state: WindowState,
    pub granted: bool,
}

/// Accumulated AI spend for one calendar month
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub accumulated_cost_usd: f64,
    pub token_count: u64,
    pub request_count: u64,
}

/// Shared state behind the governor and the response cache
///
/// Every method is a single atomic unit against the backing store, so a
/// multi-instance deployment stays coherent when the store is shared.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Stores `value`; `ttl` lets the backend evict it eventually.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Rolls the window over if it has ended, then takes one slot if the
    /// count is still below `limit`. Check and increment are one step.
    async fn reserve_window(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowSlot>;

    /// Hands back a slot taken by [`StateStore::reserve_window`]. Ignored once
    /// the window that granted it has rolled over.
    async fn release_window(&self, key: &str, window_start: DateTime<Utc>) -> AppResult<()>;

    async fn read_usage(&self, key: &str) -> AppResult<MonthlyUsage>;

    /// Adds one request's cost and tokens to the monthly accumulator.
    async fn add_usage(
        &self,
        key: &str,
        cost_usd: f64,
        tokens: u64,
        ttl: Duration,
    ) -> AppResult<MonthlyUsage>;

    /// Sets `key` to `token` for `ttl` unless a live value is already there.
    /// Returns whether this call now holds the claim.
    async fn claim(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool>;

    /// Drops the claim, but only while it is still held by `token`.
    async fn release_claim(&self, key: &str, token: &str) -> AppResult<()>;

    /// Round trip to the backing store
    async fn ping(&self) -> AppResult<()>;
}
