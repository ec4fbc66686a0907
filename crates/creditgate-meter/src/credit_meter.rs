//! The credit meter: the only writer of account balances.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use creditgate_core::{
    ActionCostTable, Clock, CreditAccount, CreditPolicy, LedgerEntry, MeterError, Metadata,
    PrincipalId, Result, Transaction, TransactionId, TransactionKind,
};
use creditgate_store::{DebitOutcome, Store};

/// Answer to a sufficiency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sufficiency {
    /// Whether the balance covers the action right now.
    pub sufficient: bool,
    /// Current balance.
    pub balance: i64,
    /// Cost of the action.
    pub cost: i64,
    /// The action checked.
    pub action: String,
}

/// Result of a successful deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    /// Balance after the deduction.
    pub new_balance: i64,
    /// The usage row.
    pub transaction_id: TransactionId,
    /// Credits deducted.
    pub cost: i64,
    /// The action charged.
    pub action: String,
}

/// Result of a credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    /// Balance after the credit.
    pub new_balance: i64,
    /// The ledger row.
    pub transaction_id: TransactionId,
    /// Credits actually added.
    pub amount_applied: i64,
    /// Credits dropped at the ceiling.
    pub excess_dropped: i64,
}

/// Deducts and adds credits through the store's atomic conditional updates.
pub struct CreditMeter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    costs: ActionCostTable,
    policy: CreditPolicy,
}

impl CreditMeter {
    /// Create a meter over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        costs: ActionCostTable,
        policy: CreditPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            costs,
            policy,
        }
    }

    /// The action cost table.
    #[must_use]
    pub fn costs(&self) -> &ActionCostTable {
        &self.costs
    }

    /// The credit policy.
    #[must_use]
    pub fn policy(&self) -> &CreditPolicy {
        &self.policy
    }

    /// Cost of `action`.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Validation` for an unknown action.
    pub fn cost_of(&self, action: &str) -> Result<i64> {
        self.costs
            .cost(action)
            .ok_or_else(|| MeterError::Validation(format!("unknown action: {action}")))
    }

    /// The principal's account, opened with the initial grant if absent.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn account(&self, principal: &PrincipalId) -> Result<CreditAccount> {
        if let Some(account) = self.store.get_account(principal).await? {
            return Ok(account);
        }

        let now = self.clock.now();
        let fresh = CreditAccount::opened(*principal, self.policy.initial_credits, now);
        let opening = LedgerEntry::new(*principal, TransactionKind::Bonus, "Welcome credits", now);
        let account = self.store.open_account(&fresh, opening).await?;

        tracing::info!(
            principal = %principal,
            balance = account.balance,
            "Credit account opened"
        );
        Ok(account)
    }

    /// Current balance without opening an account. A principal with no
    /// account reports the initial grant it would receive.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn peek_balance(&self, principal: &PrincipalId) -> Result<i64> {
        Ok(self
            .store
            .get_account(principal)
            .await?
            .map_or(self.policy.initial_credits, |a| a.balance))
    }

    /// Whether the balance covers `action`. Read-only; a passing check does
    /// not reserve anything.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Validation` for an unknown action.
    pub async fn check_sufficiency(&self, principal: &PrincipalId, action: &str) -> Result<Sufficiency> {
        let cost = self.cost_of(action)?;
        let balance = self.peek_balance(principal).await?;

        tracing::debug!(principal = %principal, action, cost, balance, "Sufficiency checked");

        Ok(Sufficiency {
            sufficient: balance >= cost,
            balance,
            cost,
            action: action.to_string(),
        })
    }

    /// Charge `action` to the principal.
    ///
    /// # Errors
    ///
    /// - `MeterError::Validation` for an unknown action.
    /// - `MeterError::InsufficientCredits` with the balance observed by the
    ///   failed conditional update.
    pub async fn deduct(
        &self,
        principal: &PrincipalId,
        action: &str,
        metadata: Option<Metadata>,
    ) -> Result<Deduction> {
        let cost = self.cost_of(action)?;
        self.account(principal).await?;

        let entry = LedgerEntry::new(
            *principal,
            TransactionKind::Usage,
            format!("Usage: {action}"),
            self.clock.now(),
        )
        .with_action(action)
        .with_metadata(metadata);

        match self.store.debit(principal, cost, entry).await? {
            DebitOutcome::Applied(tx) => {
                tracing::info!(
                    principal = %principal,
                    action,
                    cost,
                    new_balance = tx.balance_after,
                    "Credits deducted"
                );
                Ok(Deduction {
                    new_balance: tx.balance_after,
                    transaction_id: tx.id,
                    cost,
                    action: action.to_string(),
                })
            }
            DebitOutcome::Insufficient { balance } => {
                tracing::warn!(
                    principal = %principal,
                    action,
                    cost,
                    balance,
                    "Insufficient credits"
                );
                Err(MeterError::InsufficientCredits {
                    balance,
                    required: cost,
                    action: action.to_string(),
                })
            }
        }
    }

    /// Add credits, clamped to the balance ceiling.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Validation` for a non-positive amount or a debit
    /// kind.
    pub async fn add(
        &self,
        principal: &PrincipalId,
        amount: i64,
        kind: TransactionKind,
        description: &str,
        metadata: Option<Metadata>,
    ) -> Result<Credit> {
        if amount <= 0 {
            return Err(MeterError::Validation("amount must be positive".into()));
        }
        if !kind.is_credit() {
            return Err(MeterError::Validation(format!("{kind} is not a credit kind")));
        }
        self.account(principal).await?;

        let entry = LedgerEntry::new(*principal, kind, description, self.clock.now())
            .with_metadata(metadata);
        let outcome = self
            .store
            .credit(principal, amount, self.policy.balance_ceiling, entry)
            .await?;
        let tx = outcome.transaction;

        if outcome.excess_dropped > 0 {
            tracing::warn!(
                principal = %principal,
                requested = amount,
                dropped = outcome.excess_dropped,
                ceiling = self.policy.balance_ceiling,
                "Credit clamped at ceiling"
            );
        }
        tracing::info!(
            principal = %principal,
            kind = %kind,
            amount = tx.amount,
            new_balance = tx.balance_after,
            "Credits added"
        );

        Ok(Credit {
            new_balance: tx.balance_after,
            transaction_id: tx.id,
            amount_applied: tx.amount,
            excess_dropped: outcome.excess_dropped,
        })
    }

    /// Return credits to the principal.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Validation` for a non-positive amount.
    pub async fn refund(&self, principal: &PrincipalId, amount: i64, reason: &str) -> Result<Credit> {
        self.add(principal, amount, TransactionKind::Refund, reason, None)
            .await
    }

    /// A page of the principal's ledger, newest first.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn transactions(
        &self,
        principal: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        Ok(self.store.list_transactions(principal, limit, offset).await?)
    }
}
