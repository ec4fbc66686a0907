//! Credit account types.
//!
//! One account exists per principal. It is created lazily with an initial
//! grant, mutated only through the credit meter, and never deleted.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::PrincipalId;

// ============================================================================
// Constants
// ============================================================================

/// Credits granted when an account is first referenced.
pub const DEFAULT_INITIAL_CREDITS: i64 = 100;

/// Free credits granted once per calendar month.
pub const DEFAULT_MONTHLY_CREDITS: i64 = 100;

/// Balance ceiling; credits above it are dropped on `add`.
pub const DEFAULT_BALANCE_CEILING: i64 = 100_000;

/// A principal's credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    /// Owner of the account.
    pub principal: PrincipalId,

    /// Current balance. Never negative.
    pub balance: i64,

    /// Total credits ever added. Never decreases.
    pub lifetime_earned: i64,

    /// Total credits consumed by usage deductions.
    pub free_credits_used: i64,

    /// When the monthly allotment was last granted.
    pub last_monthly_reset: Option<DateTime<Utc>>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// A fresh account holding `initial_balance`.
    ///
    /// The creation instant counts as this month's reset: the initial grant
    /// stands in for the first monthly allotment.
    #[must_use]
    pub fn opened(principal: PrincipalId, initial_balance: i64, now: DateTime<Utc>) -> Self {
        let initial_balance = initial_balance.max(0);
        Self {
            principal,
            balance: initial_balance,
            lifetime_earned: initial_balance,
            free_credits_used: 0,
            last_monthly_reset: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the balance covers `cost`.
    #[must_use]
    pub fn has_sufficient_credits(&self, cost: i64) -> bool {
        self.balance >= cost
    }

    /// Whether the monthly allotment is due at `now`.
    #[must_use]
    pub fn monthly_reset_due(&self, now: DateTime<Utc>) -> bool {
        self.last_monthly_reset
            .map_or(true, |last| last < start_of_month(now))
    }
}

/// Balance-affecting policy shared by the meter and the monthly scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPolicy {
    /// Credits granted when an account is lazily created.
    pub initial_credits: i64,
    /// Credits granted once per calendar month.
    pub monthly_credits: i64,
    /// Upper bound on the balance; excess credit is dropped.
    pub balance_ceiling: i64,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            initial_credits: DEFAULT_INITIAL_CREDITS,
            monthly_credits: DEFAULT_MONTHLY_CREDITS,
            balance_ceiling: DEFAULT_BALANCE_CEILING,
        }
    }
}

/// Midnight UTC on the first day of `now`'s calendar month.
#[must_use]
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Whether two instants fall in the same calendar month (UTC).
#[must_use]
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}
