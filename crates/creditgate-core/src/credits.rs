//! Ledger transaction types.
//!
//! Every balance change appends one immutable [`Transaction`]. Replaying a
//! principal's transactions in order reproduces the stored balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PrincipalId, TransactionId};

/// Opaque caller-supplied key-value data attached to ledger and usage rows.
///
/// Never interpreted by the meter.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Time-ordered identifier.
    pub id: TransactionId,

    /// Principal whose balance changed.
    pub principal: PrincipalId,

    /// Signed change. Negative for usage.
    pub amount: i64,

    /// What caused the change.
    pub kind: TransactionKind,

    /// The billable action, for usage rows.
    pub action: Option<String>,

    /// Balance immediately before this row.
    pub balance_before: i64,

    /// Balance immediately after this row.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Caller-supplied metadata.
    pub metadata: Option<Metadata>,

    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the ledger row for `entry` from the balances the store observed.
    #[must_use]
    pub fn record(entry: LedgerEntry, balance_before: i64, balance_after: i64) -> Self {
        Self {
            id: entry.id,
            principal: entry.principal,
            amount: balance_after - balance_before,
            kind: entry.kind,
            action: entry.action,
            balance_before,
            balance_after,
            description: entry.description,
            metadata: entry.metadata,
            created_at: entry.created_at,
        }
    }

    /// Whether the row satisfies `balance_after = balance_before + amount`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.balance_after == self.balance_before + self.amount
    }
}

/// The caller-determined half of a ledger row.
///
/// The store fills in `amount`, `balance_before` and `balance_after` from the
/// result of its atomic update, so no value from an earlier read is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Identifier for the row to be written.
    pub id: TransactionId,
    /// Principal whose balance will change.
    pub principal: PrincipalId,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Billable action, for usage.
    pub action: Option<String>,
    /// Human-readable description.
    pub description: String,
    /// Caller-supplied metadata.
    pub metadata: Option<Metadata>,
    /// When the change happens.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Start an entry for `principal` at `now`.
    #[must_use]
    pub fn new(
        principal: PrincipalId,
        kind: TransactionKind,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::at(now),
            principal,
            kind,
            action: None,
            description: description.into(),
            metadata: None,
            created_at: now,
        }
    }

    /// Attach the billable action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attach caller metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Kind of ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits consumed by a billable action.
    Usage,
    /// Credits bought through the external payment flow.
    Purchase,
    /// Promotional or signup credits.
    Bonus,
    /// Credits returned to the principal.
    Refund,
    /// The monthly free allotment.
    MonthlyReset,
    /// Manual operator adjustment.
    AdminAdjust,
    /// Credits from a redeemed promo code.
    Promo,
}

impl TransactionKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Usage,
        Self::Purchase,
        Self::Bonus,
        Self::Refund,
        Self::MonthlyReset,
        Self::AdminAdjust,
        Self::Promo,
    ];

    /// Whether this kind adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        !self.is_debit()
    }

    /// Whether this kind removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage)
    }

    /// The `snake_case` wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Purchase => "purchase",
            Self::Bonus => "bonus",
            Self::Refund => "refund",
            Self::MonthlyReset => "monthly_reset",
            Self::AdminAdjust => "admin_adjust",
            Self::Promo => "promo",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown transaction kind: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_amount_follows_observed_balances() {
        let entry = LedgerEntry::new(
            PrincipalId::generate(),
            TransactionKind::Usage,
            "AI analysis",
            Utc::now(),
        )
        .with_action("ai_analysis");

        let tx = Transaction::record(entry, 30, 5);
        assert_eq!(tx.amount, -25);
        assert_eq!(tx.action.as_deref(), Some("ai_analysis"));
        assert!(tx.is_consistent());
    }

    #[test]
    fn only_usage_is_a_debit() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.is_debit(), kind == TransactionKind::Usage);
            assert_eq!(kind.is_credit(), !kind.is_debit());
        }
    }

    #[test]
    fn kind_names_match_serde() {
        for kind in TransactionKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert!("gift".parse::<TransactionKind>().is_err());
    }
}
