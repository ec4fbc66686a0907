//! In-memory storage implementation.
//!
//! Each table sits behind its own mutex and every trait method holds that
//! mutex for its whole body, so each method is one atomic step.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use creditgate_core::rate_limit::evaluate;
use creditgate_core::{
    CreditAccount, Evaluation, LedgerEntry, PrincipalId, PromoCode, PromoUsage, PromoUsageId,
    RateLimitRecord, Transaction, TransactionId, TransactionKind, WindowLimit,
};

use crate::error::{Result, StoreError};
use crate::{lookback_start, ClaimOutcome, CreditOutcome, DebitOutcome, Store};

#[derive(Default)]
struct Ledger {
    accounts: HashMap<PrincipalId, CreditAccount>,
    /// Append order is commit order.
    transactions: Vec<Transaction>,
    by_id: HashMap<TransactionId, usize>,
    by_principal: HashMap<PrincipalId, Vec<usize>>,
    /// `(created_at, index)`; concurrent writers may commit out of clock order.
    by_time: BTreeSet<(DateTime<Utc>, usize)>,
}

impl Ledger {
    fn append(&mut self, tx: Transaction) -> Transaction {
        let index = self.transactions.len();
        self.by_id.insert(tx.id, index);
        self.by_principal.entry(tx.principal).or_default().push(index);
        self.by_time.insert((tx.created_at, index));
        self.transactions.push(tx.clone());
        tx
    }
}

#[derive(Default)]
struct Promos {
    codes: HashMap<String, PromoCode>,
    usage: Vec<PromoUsage>,
}

impl Promos {
    fn slots_used(&self, code: &str, principal: &PrincipalId) -> Vec<u32> {
        self.usage
            .iter()
            .filter(|u| u.promo_code == code && u.principal == *principal)
            .map(|u| u.slot)
            .collect()
    }
}

type RateKey = (String, String);

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
    rate_limits: Mutex<HashMap<RateKey, Vec<RateLimitRecord>>>,
    promos: Mutex<Promos>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn window_records(
    records: Option<&Vec<RateLimitRecord>>,
    limits: &[WindowLimit],
    now: DateTime<Utc>,
) -> Vec<RateLimitRecord> {
    let since = lookback_start(limits, now);
    records
        .map(|recs| {
            recs.iter()
                .filter(|r| r.window_start > since)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, principal: &PrincipalId) -> Result<Option<CreditAccount>> {
        Ok(lock(&self.ledger)?.accounts.get(principal).cloned())
    }

    async fn open_account(
        &self,
        account: &CreditAccount,
        opening: LedgerEntry,
    ) -> Result<CreditAccount> {
        let mut ledger = lock(&self.ledger)?;

        if let Some(existing) = ledger.accounts.get(&account.principal) {
            return Ok(existing.clone());
        }

        ledger.accounts.insert(account.principal, account.clone());
        if account.balance > 0 {
            ledger.append(Transaction::record(opening, 0, account.balance));
        }
        Ok(account.clone())
    }

    async fn debit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        entry: LedgerEntry,
    ) -> Result<DebitOutcome> {
        let mut ledger = lock(&self.ledger)?;

        let account = ledger
            .accounts
            .get_mut(principal)
            .ok_or_else(|| not_found("account", principal))?;

        if account.balance < amount {
            return Ok(DebitOutcome::Insufficient {
                balance: account.balance,
            });
        }

        let before = account.balance;
        account.balance -= amount;
        account.free_credits_used += amount;
        account.updated_at = entry.created_at;
        let after = account.balance;

        Ok(DebitOutcome::Applied(
            ledger.append(Transaction::record(entry, before, after)),
        ))
    }

    async fn credit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<CreditOutcome> {
        let mut ledger = lock(&self.ledger)?;

        let account = ledger
            .accounts
            .get_mut(principal)
            .ok_or_else(|| not_found("account", principal))?;

        let before = account.balance;
        let after = before.saturating_add(amount).min(ceiling).max(before);
        account.balance = after;
        account.lifetime_earned += after - before;
        account.updated_at = entry.created_at;

        Ok(CreditOutcome {
            transaction: ledger.append(Transaction::record(entry, before, after)),
            excess_dropped: amount - (after - before),
        })
    }

    async fn grant_monthly(
        &self,
        principal: &PrincipalId,
        month_start: DateTime<Utc>,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<Option<CreditOutcome>> {
        let mut ledger = lock(&self.ledger)?;

        let Some(account) = ledger.accounts.get_mut(principal) else {
            return Ok(None);
        };
        if account.last_monthly_reset.is_some_and(|last| last >= month_start) {
            return Ok(None);
        }

        let before = account.balance;
        let after = before.saturating_add(amount).min(ceiling).max(before);
        account.last_monthly_reset = Some(entry.created_at);
        account.balance = after;
        account.lifetime_earned += after - before;
        account.updated_at = entry.created_at;

        Ok(Some(CreditOutcome {
            transaction: ledger.append(Transaction::record(entry, before, after)),
            excess_dropped: amount - (after - before),
        }))
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let ledger = lock(&self.ledger)?;
        Ok(ledger
            .by_id
            .get(id)
            .map(|&index| ledger.transactions[index].clone()))
    }

    async fn list_transactions(
        &self,
        principal: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let ledger = lock(&self.ledger)?;
        let Some(indices) = ledger.by_principal.get(principal) else {
            return Ok(Vec::new());
        };

        Ok(indices
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|&index| ledger.transactions[index].clone())
            .collect())
    }

    async fn transactions_since(
        &self,
        principal: Option<&PrincipalId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let ledger = lock(&self.ledger)?;

        let rows = match principal {
            Some(principal) => ledger
                .by_principal
                .get(principal)
                .map(|indices| {
                    indices
                        .iter()
                        .map(|&index| &ledger.transactions[index])
                        .filter(|tx| tx.created_at >= since)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => ledger
                .by_time
                .range((since, 0)..)
                .map(|&(_, index)| ledger.transactions[index].clone())
                .collect(),
        };
        Ok(rows)
    }

    async fn has_transaction_kind(
        &self,
        principal: &PrincipalId,
        kind: TransactionKind,
    ) -> Result<bool> {
        let ledger = lock(&self.ledger)?;
        Ok(ledger.by_principal.get(principal).is_some_and(|indices| {
            indices
                .iter()
                .any(|&index| ledger.transactions[index].kind == kind)
        }))
    }

    // =========================================================================
    // Rate-Limit Operations
    // =========================================================================

    async fn admit_request(
        &self,
        identity: &str,
        endpoint: &str,
        limits: &[WindowLimit],
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        let mut tracking = lock(&self.rate_limits)?;
        let key = (identity.to_string(), endpoint.to_string());

        let records = window_records(tracking.get(&key), limits, now);
        let evaluation = evaluate(limits, &records, now);

        if matches!(evaluation, Evaluation::Admit(_)) {
            tracking
                .entry(key)
                .or_default()
                .push(RateLimitRecord::admitted(identity, endpoint, now));
        }
        Ok(evaluation)
    }

    async fn peek_requests(
        &self,
        identity: &str,
        endpoint: &str,
        limits: &[WindowLimit],
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        let tracking = lock(&self.rate_limits)?;
        let key = (identity.to_string(), endpoint.to_string());
        let records = window_records(tracking.get(&key), limits, now);
        Ok(evaluate(limits, &records, now))
    }

    async fn reset_rate_limits(&self, identity: &str) -> Result<u64> {
        let mut tracking = lock(&self.rate_limits)?;
        let mut removed = 0u64;
        tracking.retain(|(id, _), records| {
            if id == identity {
                removed += records.len() as u64;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn purge_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tracking = lock(&self.rate_limits)?;
        let mut removed = 0u64;
        for records in tracking.values_mut() {
            let before = records.len();
            records.retain(|r| r.window_start >= cutoff);
            removed += (before - records.len()) as u64;
        }
        tracking.retain(|_, records| !records.is_empty());
        Ok(removed)
    }

    // =========================================================================
    // Promo Operations
    // =========================================================================

    async fn insert_promo(&self, promo: &PromoCode) -> Result<()> {
        let mut promos = lock(&self.promos)?;
        if promos.codes.contains_key(&promo.code) {
            return Err(StoreError::Conflict(format!(
                "promo code {} already exists",
                promo.code
            )));
        }
        promos.codes.insert(promo.code.clone(), promo.clone());
        Ok(())
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>> {
        Ok(lock(&self.promos)?.codes.get(code).cloned())
    }

    async fn set_promo_active(&self, code: &str, active: bool) -> Result<bool> {
        let mut promos = lock(&self.promos)?;
        Ok(promos.codes.get_mut(code).map_or(false, |promo| {
            promo.active = active;
            true
        }))
    }

    async fn count_promo_usage(&self, code: &str, principal: &PrincipalId) -> Result<u32> {
        let promos = lock(&self.promos)?;
        Ok(u32::try_from(promos.slots_used(code, principal).len()).unwrap_or(u32::MAX))
    }

    async fn claim_promo(&self, mut usage: PromoUsage) -> Result<ClaimOutcome> {
        let mut promos = lock(&self.promos)?;

        let (max_uses, max_per_user, used_count, active) = match promos.codes.get(&usage.promo_code) {
            Some(p) => (p.max_uses, p.max_uses_per_user, p.used_count, p.active),
            None => return Ok(ClaimOutcome::NotFound),
        };
        if !active {
            return Ok(ClaimOutcome::Inactive);
        }
        if max_uses.is_some_and(|max| used_count >= max) {
            return Ok(ClaimOutcome::Exhausted);
        }

        let taken = promos.slots_used(&usage.promo_code, &usage.principal);
        let Some(slot) = (1..=max_per_user).find(|s| !taken.contains(s)) else {
            return Ok(ClaimOutcome::UserLimitReached);
        };

        usage.slot = slot;
        let used_count = used_count + 1;
        if let Some(promo) = promos.codes.get_mut(&usage.promo_code) {
            promo.used_count = used_count;
        }
        promos.usage.push(usage.clone());

        Ok(ClaimOutcome::Claimed { usage, used_count })
    }

    async fn release_promo_claim(&self, code: &str, usage_id: &PromoUsageId) -> Result<()> {
        let mut promos = lock(&self.promos)?;
        let before = promos.usage.len();
        promos.usage.retain(|u| u.id != *usage_id);

        if promos.usage.len() < before {
            if let Some(promo) = promos.codes.get_mut(code) {
                promo.used_count = promo.used_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn settle_promo_credits(
        &self,
        code: &str,
        usage_id: &PromoUsageId,
        credits: i64,
    ) -> Result<bool> {
        let mut promos = lock(&self.promos)?;
        let Some(usage) = promos
            .usage
            .iter_mut()
            .find(|u| u.id == *usage_id && u.promo_code == code)
        else {
            return Ok(false);
        };
        usage.credits_awarded = Some(credits);
        Ok(true)
    }

    async fn list_promo_usage(&self, code: &str) -> Result<Vec<PromoUsage>> {
        let promos = lock(&self.promos)?;
        Ok(promos
            .usage
            .iter()
            .filter(|u| u.promo_code == code)
            .cloned()
            .collect())
    }
}
