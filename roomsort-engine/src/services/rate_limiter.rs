//! Fallback-tier request budget
//!
//! Two fixed windows (minute and day) per logical budget key. Each window is
//! a counter in a shared [`BudgetStore`]; the store performs the increment as
//! a single conditional update, so concurrent executions cannot over-commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomsort_common::config::RateLimitConfig;
use roomsort_common::{time, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reported as `remaining` when a reservation is rejected
pub const REJECTED_REMAINING: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Minute,
    Day,
}

impl WindowKind {
    pub fn seconds(&self) -> i64 {
        match self {
            WindowKind::Minute => 60,
            WindowKind::Day => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Minute => "minute",
            WindowKind::Day => "day",
        }
    }

    /// Deterministic identifier of the window containing `now`
    pub fn window_key(&self, budget_key: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}:{}_{}",
            budget_key,
            self.as_str(),
            time::window_start(now, self.seconds())
        )
    }
}

/// Shared counter store backing the budget windows
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Add `requested` to the counter at `window_key` if the new total stays
    /// within `limit`, creating the counter on first use.
    ///
    /// Returns the counter value after the increment, or `None` when the
    /// increment was refused. Refusal leaves the counter unchanged.
    async fn try_consume(
        &self,
        window_key: &str,
        requested: u32,
        limit: u32,
        expires_at: i64,
    ) -> Result<Option<u32>>;

    /// Drop counters whose window closed before `now` (unix seconds)
    async fn purge_expired(&self, now: i64) -> Result<u64>;
}

/// Outcome of one window reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub granted: bool,
    /// Budget left in the window after a grant; [`REJECTED_REMAINING`] otherwise
    pub remaining: i64,
}

/// Combined minute+day verdict for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDecision {
    pub granted: bool,
    /// Granted by the escape valve rather than by available budget
    pub forced: bool,
    pub remaining_rate_limit: i64,
    /// Seconds to wait before re-checking (0 when granted)
    pub wait_duration: u64,
    pub minute_remaining: i64,
    pub day_remaining: i64,
}

pub struct RateLimiter {
    store: Arc<dyn BudgetStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BudgetStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn limit_for(&self, kind: WindowKind) -> u32 {
        match kind {
            WindowKind::Minute => self.config.requests_per_minute,
            WindowKind::Day => self.config.requests_per_day,
        }
    }

    /// Reserve `requested` units in the current `kind` window of `key`
    pub async fn reserve(&self, key: &str, kind: WindowKind, requested: u32) -> Result<Reservation> {
        self.reserve_at(key, kind, requested, time::now()).await
    }

    pub async fn reserve_at(
        &self,
        key: &str,
        kind: WindowKind,
        requested: u32,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let limit = self.limit_for(kind);
        let window_key = kind.window_key(key, now);

        if requested > limit {
            debug!(window = %window_key, requested, limit, "Request exceeds window limit");
            return Ok(Reservation {
                granted: false,
                remaining: REJECTED_REMAINING,
            });
        }

        let expires_at = time::window_start(now, kind.seconds()) + kind.seconds();
        let reservation = match self
            .store
            .try_consume(&window_key, requested, limit, expires_at)
            .await?
        {
            Some(used) => Reservation {
                granted: true,
                remaining: i64::from(limit) - i64::from(used),
            },
            None => Reservation {
                granted: false,
                remaining: REJECTED_REMAINING,
            },
        };

        debug!(
            window = %window_key,
            requested,
            granted = reservation.granted,
            remaining = reservation.remaining,
            "Budget reservation"
        );
        Ok(reservation)
    }

    /// Reserve a fallback batch against both windows of the configured budget
    pub async fn check_budget(&self, requested: u32, retry_count: u32) -> Result<BudgetDecision> {
        self.check_budget_at(requested, retry_count, time::now()).await
    }

    /// Both windows are always consulted, so a day reservation may be consumed
    /// even though the minute window rejects the batch.
    pub async fn check_budget_at(
        &self,
        requested: u32,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<BudgetDecision> {
        let key = &self.config.budget_key;
        let minute = self.reserve_at(key, WindowKind::Minute, requested, now).await?;
        let day = self.reserve_at(key, WindowKind::Day, requested, now).await?;

        if minute.granted && day.granted {
            return Ok(BudgetDecision {
                granted: true,
                forced: false,
                remaining_rate_limit: minute.remaining.min(day.remaining),
                wait_duration: 0,
                minute_remaining: minute.remaining,
                day_remaining: day.remaining,
            });
        }

        if retry_count >= self.config.escape_valve_after {
            warn!(
                requested,
                retry_count,
                "Budget still exhausted after repeated re-checks, forcing minimal allowance"
            );
            return Ok(BudgetDecision {
                granted: true,
                forced: true,
                remaining_rate_limit: 1,
                wait_duration: 0,
                minute_remaining: minute.remaining,
                day_remaining: day.remaining,
            });
        }

        let wait_duration = if day.granted {
            self.config.minute_wait_seconds
        } else {
            self.config.day_wait_seconds
        };

        info!(
            requested,
            retry_count,
            minute_granted = minute.granted,
            day_granted = day.granted,
            wait_duration,
            "Fallback budget exhausted"
        );

        Ok(BudgetDecision {
            granted: false,
            forced: false,
            remaining_rate_limit: 0,
            wait_duration,
            minute_remaining: minute.remaining,
            day_remaining: day.remaining,
        })
    }

    /// Garbage-collect closed windows
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store.purge_expired(now.timestamp()).await
    }
}
