//! Monthly free-credit allotment.

use std::sync::Arc;

use creditgate_core::{start_of_month, Clock, LedgerEntry, PrincipalId, Result, TransactionKind};
use creditgate_store::Store;

use crate::credit_meter::CreditMeter;

/// Grants the monthly allotment at most once per calendar month.
///
/// The grant is guarded by a test-and-set on `last_monthly_reset`. The store
/// applies the mark and the credit together, so a failed grant leaves the
/// month unmarked and the next call retries it.
pub struct MonthlyReset {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    meter: Arc<CreditMeter>,
}

impl MonthlyReset {
    /// Create a scheduler that grants through `meter`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, meter: Arc<CreditMeter>) -> Self {
        Self { store, clock, meter }
    }

    /// Grant this month's allotment if it has not been granted yet.
    /// Returns whether this call granted it.
    ///
    /// A zero allotment disables the grant.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn check_and_reset(&self, principal: &PrincipalId) -> Result<bool> {
        let now = self.clock.now();
        let account = self.meter.account(principal).await?;
        let policy = self.meter.policy();

        if policy.monthly_credits <= 0 || !account.monthly_reset_due(now) {
            return Ok(false);
        }

        let entry = LedgerEntry::new(
            *principal,
            TransactionKind::MonthlyReset,
            "Monthly free credits",
            now,
        );
        let granted = self
            .store
            .grant_monthly(
                principal,
                start_of_month(now),
                policy.monthly_credits,
                policy.balance_ceiling,
                entry,
            )
            .await;

        let outcome = match granted {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                tracing::debug!(principal = %principal, "Monthly reset already claimed");
                return Ok(false);
            }
            Err(err) => {
                tracing::error!(principal = %principal, error = %err, "Monthly grant failed");
                return Err(err.into());
            }
        };

        tracing::info!(
            principal = %principal,
            amount = outcome.transaction.amount,
            dropped = outcome.excess_dropped,
            new_balance = outcome.transaction.balance_after,
            "Monthly credits granted"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use creditgate_core::{ActionCostTable, CreditPolicy, ManualClock};
    use creditgate_store::MemoryStore;

    fn setup() -> (MonthlyReset, Arc<CreditMeter>, Arc<ManualClock>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap()));
        let meter = Arc::new(CreditMeter::new(
            store.clone(),
            clock.clone(),
            ActionCostTable::default(),
            CreditPolicy::default(),
        ));
        let monthly = MonthlyReset::new(store, clock.clone(), meter.clone());
        (monthly, meter, clock)
    }

    #[tokio::test]
    async fn new_account_is_not_due_in_its_first_month() {
        let (monthly, meter, _) = setup();
        let principal = PrincipalId::generate();

        assert!(!monthly.check_and_reset(&principal).await.unwrap());
        assert_eq!(meter.account(&principal).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn grants_once_per_month() {
        let (monthly, meter, clock) = setup();
        let principal = PrincipalId::generate();
        meter.account(&principal).await.unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 2, 1, 0, 5, 0).unwrap());
        assert!(monthly.check_and_reset(&principal).await.unwrap());
        assert!(!monthly.check_and_reset(&principal).await.unwrap());

        clock.advance(Duration::days(20));
        assert!(!monthly.check_and_reset(&principal).await.unwrap());
        assert_eq!(meter.account(&principal).await.unwrap().balance, 200);

        clock.set(Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap());
        assert!(monthly.check_and_reset(&principal).await.unwrap());
        assert_eq!(meter.account(&principal).await.unwrap().balance, 300);
    }
}
