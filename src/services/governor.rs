use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, sync::Arc, time::Duration};

use crate::{
    db::{StateStore, StoreKey},
    error::AppResult,
    services::clock::Clock,
};

/// Monthly usage hashes outlive their month by a few days
const USAGE_RETENTION: Duration = Duration::from_secs(60 * 60 * 24 * 32);

/// Who a set of rate counters belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Client(String),
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Client(id) => write!(f, "client:{}", id),
        }
    }
}

/// Deployment policy for turning a caller into a [`Scope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopePolicy {
    #[default]
    Client,
    Global,
}

impl ScopePolicy {
    pub fn scope_for(&self, client_id: &str) -> Scope {
        match self {
            ScopePolicy::Client => Scope::Client(client_id.to_string()),
            ScopePolicy::Global => Scope::Global,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Disables the minute/day ceilings; emergency stop and the monthly ceiling still apply
    pub rate_limits_enabled: bool,
    pub per_minute_limit: u64,
    pub per_day_limit: u64,
    pub monthly_limit_usd: f64,
    /// Process-wide stop from configuration, OR-ed with the stored flag
    pub emergency_stop: bool,
    pub minute_window: Duration,
    pub day_window: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            rate_limits_enabled: true,
            per_minute_limit: 3,
            per_day_limit: 100,
            monthly_limit_usd: 7.0,
            emergency_stop: false,
            minute_window: Duration::from_secs(60),
            day_window: Duration::from_secs(60 * 60 * 24),
        }
    }
}

/// Why a request was refused, in the order the checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    EmergencyStopped,
    MonthlyQuotaExceeded,
    MinuteRateExceeded,
    DayRateExceeded,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::EmergencyStopped => "emergency_stopped",
            DenialReason::MonthlyQuotaExceeded => "monthly_quota_exceeded",
            DenialReason::MinuteRateExceeded => "minute_rate_exceeded",
            DenialReason::DayRateExceeded => "day_rate_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Denial {
    pub reason: DenialReason,
    /// Counter value (requests or USD) that tripped the check
    pub current: f64,
    pub limit: f64,
    pub retry_after_secs: Option<u64>,
}

impl Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            DenialReason::EmergencyStopped => {
                write!(f, "The service is temporarily unavailable for maintenance")
            }
            DenialReason::MonthlyQuotaExceeded => {
                write!(f, "Monthly spending limit of ${:.2} exceeded", self.limit)
            }
            DenialReason::MinuteRateExceeded => {
                write!(f, "Too many requests. Limit: {} per minute", self.limit)
            }
            DenialReason::DayRateExceeded => {
                write!(f, "Daily request limit exceeded. Limit: {} per day", self.limit)
            }
        }
    }
}

/// Window slots taken by an admitted request
///
/// The slots count against the scope from the moment of admission. A request
/// that never reaches the collaborators (cache hit, joined computation) hands
/// them back with [`RequestGovernor::release`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reservation {
    slots: Vec<(String, DateTime<Utc>)>,
}

impl Reservation {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed(Reservation),
    Denied(Denial),
}

/// Snapshot reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorStatus {
    pub emergency_stop: bool,
    pub rate_limiting: bool,
    pub per_minute_limit: u64,
    pub per_day_limit: u64,
    pub month: String,
    pub monthly_cost: f64,
    pub monthly_limit: f64,
    pub within_limit: bool,
    pub tokens_this_month: u64,
    pub requests_this_month: u64,
}

/// Enforces the emergency stop, the monthly cost ceiling, and per-scope
/// minute/day request ceilings against the shared store.
///
/// Windows are fixed, not sliding: a counter resets once
/// `now - window_start >= window`, so a burst straddling a boundary can see up
/// to twice the limit. Window slots are taken atomically at admission, so
/// concurrent requests never overrun a window. The monthly ceiling is checked
/// against recorded spend, which lags by the requests still in flight.
pub struct RequestGovernor {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: GovernorConfig,
}

impl RequestGovernor {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, config: GovernorConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Checks every ceiling in fixed order; the first one hit wins.
    pub async fn allow(&self, scope: &Scope) -> AppResult<Decision> {
        let now = self.clock.now();

        if self.is_emergency_stopped().await? {
            tracing::warn!(scope = %scope, "Request denied: emergency stop active");
            return Ok(Decision::Denied(Denial {
                reason: DenialReason::EmergencyStopped,
                current: 0.0,
                limit: 0.0,
                retry_after_secs: None,
            }));
        }

        let usage = self.store.read_usage(&month_key(now).to_string()).await?;
        if usage.accumulated_cost_usd >= self.config.monthly_limit_usd {
            tracing::warn!(
                current = usage.accumulated_cost_usd,
                limit = self.config.monthly_limit_usd,
                "Request denied: monthly AI spending limit reached"
            );
            return Ok(Decision::Denied(Denial {
                reason: DenialReason::MonthlyQuotaExceeded,
                current: usage.accumulated_cost_usd,
                limit: self.config.monthly_limit_usd,
                retry_after_secs: Some(seconds_until_next_month(now)),
            }));
        }

        if !self.config.rate_limits_enabled {
            return Ok(Decision::Allowed(Reservation::default()));
        }

        let windows = [
            (
                StoreKey::MinuteWindow(scope.clone()),
                self.config.minute_window,
                self.config.per_minute_limit,
                DenialReason::MinuteRateExceeded,
            ),
            (
                StoreKey::DayWindow(scope.clone()),
                self.config.day_window,
                self.config.per_day_limit,
                DenialReason::DayRateExceeded,
            ),
        ];

        let mut reservation = Reservation::default();
        for (key, window, limit, reason) in windows {
            let key = key.to_string();
            let slot = self.store.reserve_window(&key, window, limit, now).await?;
            if !slot.granted {
                // A full day window gives back the minute slot already taken
                self.release(&reservation).await?;

                let retry_after = slot.state.seconds_until_reset(now, window);
                tracing::warn!(
                    scope = %scope,
                    reason = reason.as_str(),
                    current = slot.state.count,
                    limit,
                    retry_after,
                    "Request denied: rate limit reached"
                );
                return Ok(Decision::Denied(Denial {
                    reason,
                    current: slot.state.count as f64,
                    limit: limit as f64,
                    retry_after_secs: Some(retry_after),
                }));
            }
            reservation.slots.push((key, slot.state.window_start));
        }

        Ok(Decision::Allowed(reservation))
    }

    /// Returns a reservation's slots to their windows, unless they have rolled over since.
    pub async fn release(&self, reservation: &Reservation) -> AppResult<()> {
        for (key, window_start) in &reservation.slots {
            self.store.release_window(key, *window_start).await?;
        }
        if !reservation.is_empty() {
            tracing::debug!(slots = reservation.slots.len(), "Rate window slots released");
        }
        Ok(())
    }

    /// Adds an executed request's AI cost to the monthly accumulator.
    ///
    /// Only called when collaborators actually ran; cache hits never get here.
    /// Window slots were already taken by [`RequestGovernor::allow`].
    pub async fn record_usage(&self, scope: &Scope, cost_usd: f64, tokens: u64) -> AppResult<()> {
        let now = self.clock.now();

        let usage = self
            .store
            .add_usage(
                &month_key(now).to_string(),
                cost_usd.max(0.0),
                tokens,
                USAGE_RETENTION,
            )
            .await?;

        tracing::debug!(
            scope = %scope,
            monthly_cost = usage.accumulated_cost_usd,
            monthly_tokens = usage.token_count,
            "Usage recorded"
        );

        if usage.accumulated_cost_usd > self.config.monthly_limit_usd * 0.8 {
            tracing::warn!(
                current = usage.accumulated_cost_usd,
                limit = self.config.monthly_limit_usd,
                "Monthly AI spending at 80%"
            );
        }

        Ok(())
    }

    pub async fn is_emergency_stopped(&self) -> AppResult<bool> {
        if self.config.emergency_stop {
            return Ok(true);
        }
        let flag = self.store.get(&StoreKey::EmergencyStop.to_string()).await?;
        Ok(flag.as_deref() == Some("1"))
    }

    /// Sets the cluster-wide stop flag. A stop set in configuration cannot be cleared here.
    pub async fn set_emergency_stop(&self, stopped: bool) -> AppResult<()> {
        let key = StoreKey::EmergencyStop.to_string();
        if stopped {
            self.store.set(&key, "1", None).await?;
        } else {
            self.store.delete(&key).await?;
        }
        tracing::warn!(stopped, "Emergency stop flag changed");
        Ok(())
    }

    pub async fn status(&self) -> AppResult<GovernorStatus> {
        let now = self.clock.now();
        let month = month_key(now);
        let usage = self.store.read_usage(&month.to_string()).await?;

        Ok(GovernorStatus {
            emergency_stop: self.is_emergency_stopped().await?,
            rate_limiting: self.config.rate_limits_enabled,
            per_minute_limit: self.config.per_minute_limit,
            per_day_limit: self.config.per_day_limit,
            month: now.format("%Y-%m").to_string(),
            monthly_cost: usage.accumulated_cost_usd,
            monthly_limit: self.config.monthly_limit_usd,
            within_limit: usage.accumulated_cost_usd < self.config.monthly_limit_usd,
            tokens_this_month: usage.token_count,
            requests_this_month: usage.request_count,
        })
    }
}

fn month_key(now: DateTime<Utc>) -> StoreKey {
    StoreKey::MonthlyUsage(now.format("%Y-%m").to_string())
}

fn seconds_until_next_month(now: DateTime<Utc>) -> u64 {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|start| (start.and_utc() - now).num_seconds().max(1) as u64)
        .unwrap_or(1)
}
