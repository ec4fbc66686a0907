//! Read-only rollups over ledger transactions.
//!
//! These are pure functions over already-fetched rows; callers bound the
//! rows by time before handing them over.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{PrincipalId, Transaction, TransactionKind};

/// Trailing window used for burn-rate projection.
pub const PROJECTION_WINDOW_DAYS: i64 = 30;

/// Days in a projected month.
pub const DAYS_PER_MONTH: f64 = 30.0;

/// Count and net amount for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Number of transactions.
    pub count: u64,
    /// Sum of absolute amounts.
    pub credits: i64,
}

impl Bucket {
    fn add(&mut self, amount: i64) {
        self.count += 1;
        self.credits += amount.abs();
    }
}

/// Totals and breakdowns over a set of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Credits consumed by usage.
    pub total_used: i64,
    /// Credits added by every other kind.
    pub total_earned: i64,
    /// Rows considered.
    pub transaction_count: u64,
    /// Breakdown by kind.
    pub by_kind: BTreeMap<TransactionKind, Bucket>,
    /// Usage breakdown by action.
    pub by_action: BTreeMap<String, Bucket>,
}

/// Summarize `transactions`.
#[must_use]
pub fn summarize<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> UsageSummary {
    let mut summary = UsageSummary::default();

    for tx in transactions {
        summary.transaction_count += 1;
        summary.by_kind.entry(tx.kind).or_default().add(tx.amount);

        if tx.kind.is_debit() {
            summary.total_used += tx.amount.abs();
            let action = tx.action.clone().unwrap_or_else(|| "unknown".to_string());
            summary.by_action.entry(action).or_default().add(tx.amount);
        } else {
            summary.total_earned += tx.amount;
        }
    }

    summary
}

/// Usage and earnings for one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// The day.
    pub date: NaiveDate,
    /// Credits consumed.
    pub used: i64,
    /// Credits added.
    pub earned: i64,
    /// Rows on that day.
    pub count: u64,
}

/// One entry per day from `since`'s day through `until`'s day, zero-filled.
#[must_use]
pub fn daily_series<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<DailyUsage> {
    let first = since.date_naive();
    let last = until.date_naive();

    let mut days: BTreeMap<NaiveDate, DailyUsage> = first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|date| {
            (
                date,
                DailyUsage {
                    date,
                    used: 0,
                    earned: 0,
                    count: 0,
                },
            )
        })
        .collect();

    for tx in transactions {
        if let Some(day) = days.get_mut(&tx.created_at.date_naive()) {
            day.count += 1;
            if tx.kind.is_debit() {
                day.used += tx.amount.abs();
            } else {
                day.earned += tx.amount;
            }
        }
    }

    days.into_values().collect()
}

/// One principal's consumption, for administrative rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalUsage {
    /// The principal.
    pub principal: PrincipalId,
    /// Credits consumed.
    pub used: i64,
    /// Usage rows.
    pub count: u64,
}

/// The `limit` heaviest consumers, most credits first.
#[must_use]
pub fn rank_principals<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    limit: usize,
) -> Vec<PrincipalUsage> {
    let mut totals: HashMap<PrincipalId, PrincipalUsage> = HashMap::new();

    for tx in transactions.into_iter().filter(|tx| tx.kind.is_debit()) {
        let entry = totals.entry(tx.principal).or_insert(PrincipalUsage {
            principal: tx.principal,
            used: 0,
            count: 0,
        });
        entry.used += tx.amount.abs();
        entry.count += 1;
    }

    let mut ranked: Vec<_> = totals.into_values().collect();
    ranked.sort_by(|a, b| b.used.cmp(&a.used).then(a.principal.cmp(&b.principal)));
    ranked.truncate(limit);
    ranked
}

/// A linear burn-rate estimate. Not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurnProjection {
    /// Days the estimate is based on.
    pub window_days: i64,
    /// Credits consumed in the window.
    pub used_in_window: i64,
    /// Mean credits per day.
    pub average_daily_usage: f64,
    /// Mean daily usage extrapolated to a month.
    pub estimated_monthly_usage: i64,
    /// Days until the balance runs out at the current rate; `None` when
    /// nothing is being consumed.
    pub days_until_empty: Option<i64>,
    /// Balance the projection starts from.
    pub current_balance: i64,
}

/// Project burn from `used_in_window` credits over `window_days`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn project_burn(used_in_window: i64, window_days: i64, current_balance: i64) -> BurnProjection {
    let window_days = window_days.max(1);
    let average = used_in_window.max(0) as f64 / window_days as f64;
    let days_until_empty = (average > 0.0).then(|| (current_balance.max(0) as f64 / average).floor() as i64);

    BurnProjection {
        window_days,
        used_in_window,
        average_daily_usage: average,
        estimated_monthly_usage: (average * DAYS_PER_MONTH).round() as i64,
        days_until_empty,
        current_balance,
    }
}

/// Start of the trailing `days`-day window ending at `now`.
#[must_use]
pub fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerEntry;
    use chrono::TimeZone;

    fn tx(
        principal: PrincipalId,
        kind: TransactionKind,
        action: Option<&str>,
        before: i64,
        after: i64,
        at: DateTime<Utc>,
    ) -> Transaction {
        let mut entry = LedgerEntry::new(principal, kind, "test", at);
        entry.action = action.map(String::from);
        Transaction::record(entry, before, after)
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, d, 10, 0, 0).unwrap()
    }

    #[test]
    fn summary_splits_usage_and_earnings() {
        let p = PrincipalId::generate();
        let txs = vec![
            tx(p, TransactionKind::Bonus, None, 0, 100, day(1)),
            tx(p, TransactionKind::Usage, Some("ai_analysis"), 100, 75, day(2)),
            tx(p, TransactionKind::Usage, Some("stock_search"), 75, 73, day(2)),
            tx(p, TransactionKind::Refund, None, 73, 83, day(3)),
        ];

        let summary = summarize(&txs);
        assert_eq!(summary.total_used, 27);
        assert_eq!(summary.total_earned, 110);
        assert_eq!(summary.transaction_count, 4);
        assert_eq!(summary.by_kind[&TransactionKind::Usage].count, 2);
        assert_eq!(summary.by_action["ai_analysis"].credits, 25);
    }

    #[test]
    fn daily_series_is_zero_filled() {
        let p = PrincipalId::generate();
        let txs = vec![tx(p, TransactionKind::Usage, Some("ai_chat"), 50, 45, day(3))];

        let series = daily_series(&txs, day(1), day(4));
        assert_eq!(series.len(), 4);
        assert_eq!(series[0].used, 0);
        assert_eq!(series[2].used, 5);
        assert_eq!(series[2].count, 1);
    }

    #[test]
    fn ranking_orders_by_consumption() {
        let heavy = PrincipalId::generate();
        let light = PrincipalId::generate();
        let txs = vec![
            tx(light, TransactionKind::Usage, Some("stock_quote"), 10, 9, day(1)),
            tx(heavy, TransactionKind::Usage, Some("portfolio_analysis"), 100, 50, day(1)),
            tx(heavy, TransactionKind::Bonus, None, 50, 150, day(2)),
        ];

        let ranked = rank_principals(&txs, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].principal, heavy);
        assert_eq!(ranked[0].used, 50);
        assert_eq!(rank_principals(&txs, 1).len(), 1);
    }

    #[test]
    fn projection_is_linear() {
        let projection = project_burn(300, 30, 55);
        assert!((projection.average_daily_usage - 10.0).abs() < f64::EPSILON);
        assert_eq!(projection.estimated_monthly_usage, 300);
        assert_eq!(projection.days_until_empty, Some(5));

        let idle = project_burn(0, 30, 55);
        assert_eq!(idle.days_until_empty, None);
        assert_eq!(idle.estimated_monthly_usage, 0);
    }
}
