//! Read-only usage rollups over the ledger.
//!
//! Every query is bounded by a trailing window so stores scan only recent
//! rows. Nothing here writes, and failures are logged and returned to the
//! caller without touching the meter or limiter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use creditgate_core::analytics::{
    daily_series, project_burn, rank_principals, summarize, window_start, PROJECTION_WINDOW_DAYS,
};
use creditgate_core::{
    BurnProjection, Clock, DailyUsage, PrincipalId, PrincipalUsage, Result, Transaction,
    UsageSummary,
};
use creditgate_store::Store;

/// Longest window any query may ask for.
pub const MAX_WINDOW_DAYS: i64 = 366;

/// A principal's usage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Window length in days.
    pub days: i64,
    /// Totals and breakdowns.
    pub summary: UsageSummary,
    /// One row per day, zero-filled.
    pub daily: Vec<DailyUsage>,
    /// Burn-rate estimate over the trailing 30 days.
    pub projection: BurnProjection,
}

/// Cross-principal report for administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalReport {
    /// Window length in days.
    pub days: i64,
    /// Totals and breakdowns across every principal.
    pub summary: UsageSummary,
    /// Heaviest consumers.
    pub top_consumers: Vec<PrincipalUsage>,
}

/// Analytics aggregator.
pub struct Analytics {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Analytics {
    /// Create an aggregator reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Totals and breakdowns for one principal.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn usage_summary(&self, principal: &PrincipalId, days: i64) -> Result<UsageSummary> {
        let rows = self.window(Some(principal), days).await?;
        Ok(summarize(&rows))
    }

    /// Daily used/earned series for one principal.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn daily_series(&self, principal: &PrincipalId, days: i64) -> Result<Vec<DailyUsage>> {
        let now = self.clock.now();
        let rows = self.window(Some(principal), days).await?;
        Ok(daily_series(&rows, window_start(now, clamp_days(days)), now))
    }

    /// Linear burn projection from the trailing 30 days.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn projection(&self, principal: &PrincipalId) -> Result<BurnProjection> {
        let rows = self.window(Some(principal), PROJECTION_WINDOW_DAYS).await?;
        let balance = match self.store.get_account(principal).await {
            Ok(account) => account.map_or(0, |a| a.balance),
            Err(err) => {
                tracing::warn!(principal = %principal, error = %err, "Analytics account read failed");
                return Err(err.into());
            }
        };
        Ok(project_burn(
            summarize(&rows).total_used,
            PROJECTION_WINDOW_DAYS,
            balance,
        ))
    }

    /// Summary, series, and projection in one pass over the window.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn report(&self, principal: &PrincipalId, days: i64) -> Result<UsageReport> {
        let days = clamp_days(days);
        let now = self.clock.now();
        let rows = self.window(Some(principal), days).await?;

        Ok(UsageReport {
            days,
            summary: summarize(&rows),
            daily: daily_series(&rows, window_start(now, days), now),
            projection: self.projection(principal).await?,
        })
    }

    /// The `limit` heaviest consumers in the window.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn top_consumers(&self, days: i64, limit: usize) -> Result<Vec<PrincipalUsage>> {
        let rows = self.window(None, days).await?;
        Ok(rank_principals(&rows, limit))
    }

    /// Breakdown across every principal.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn global_breakdown(&self, days: i64) -> Result<UsageSummary> {
        let rows = self.window(None, days).await?;
        Ok(summarize(&rows))
    }

    /// Rankings and breakdown for administrators.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn global_report(&self, days: i64, limit: usize) -> Result<GlobalReport> {
        let days = clamp_days(days);
        let rows = self.window(None, days).await?;
        Ok(GlobalReport {
            days,
            summary: summarize(&rows),
            top_consumers: rank_principals(&rows, limit),
        })
    }

    async fn window(&self, principal: Option<&PrincipalId>, days: i64) -> Result<Vec<Transaction>> {
        let since = window_start(self.clock.now(), clamp_days(days));
        match self.store.transactions_since(principal, since).await {
            Ok(rows) => {
                tracing::debug!(rows = rows.len(), days, "Analytics window loaded");
                Ok(rows)
            }
            Err(err) => {
                tracing::warn!(error = %err, days, "Analytics query failed");
                Err(err.into())
            }
        }
    }
}

fn clamp_days(days: i64) -> i64 {
    days.clamp(1, MAX_WINDOW_DAYS)
}
