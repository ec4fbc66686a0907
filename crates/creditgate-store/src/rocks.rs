//! `RocksDB` storage implementation.
//!
//! `RocksDB` has no conditional update, so every read-decide-write sequence
//! runs under one process-wide write mutex and lands as a single `WriteBatch`.
//! The database must be owned by one process.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use creditgate_core::rate_limit::evaluate;
use creditgate_core::{
    CreditAccount, Evaluation, LedgerEntry, PrincipalId, PromoCode, PromoUsage, PromoUsageId,
    RateLimitRecord, Transaction, TransactionId, TransactionKind, WindowLimit,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{lookback_start, ClaimOutcome, CreditOutcome, DebitOutcome, Store};

type Db = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
    write_lock: Mutex<()>,
    sequence: AtomicU32,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
            sequence: AtomicU32::new(0),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Key-value pairs under `prefix`, starting at `from` (inclusive).
    fn scan_forward(&self, cf_name: &str, prefix: &[u8], from: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(from, Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn account_or_not_found(&self, principal: &PrincipalId) -> Result<CreditAccount> {
        self.get(cf::ACCOUNTS, &keys::account_key(principal))?
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: principal.to_string(),
            })
    }

    /// Stage the account update and the ledger row in one batch.
    fn write_ledger(&self, account: &CreditAccount, tx: &Transaction) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_principal = self.cf(cf::TRANSACTIONS_BY_PRINCIPAL)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, keys::account_key(&account.principal), Self::serialize(account)?);
        batch.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?);
        batch.put_cf(&cf_by_principal, keys::principal_transaction_key(&tx.principal, &tx.id), []);

        self.db.write(batch).map_err(db_err)
    }

    fn principal_transactions(&self, principal: &PrincipalId, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let prefix = keys::account_key(principal);
        let mut from = prefix.clone();
        from.extend_from_slice(&keys::transaction_lower_bound(since));

        let mut out = Vec::new();
        for (key, _) in self.scan_forward(cf::TRANSACTIONS_BY_PRINCIPAL, &prefix, &from)? {
            let Some(id) = keys::transaction_id_from_index(&key) else {
                continue;
            };
            if let Some(tx) = self.get::<Transaction>(cf::TRANSACTIONS, &keys::transaction_key(&id))? {
                if tx.created_at >= since {
                    out.push(tx);
                }
            }
        }
        Ok(out)
    }

    fn window_records(
        &self,
        identity: &str,
        endpoint: &str,
        limits: &[WindowLimit],
        now: DateTime<Utc>,
    ) -> Result<Vec<RateLimitRecord>> {
        let since = lookback_start(limits, now);
        let prefix = keys::rate_limit_prefix(identity, endpoint);
        let from = keys::rate_limit_key(identity, endpoint, since, 0);

        self.scan_forward(cf::RATE_LIMITS, &prefix, &from)?
            .iter()
            .map(|(_, value)| Self::deserialize::<RateLimitRecord>(value))
            .filter(|r| r.as_ref().map_or(true, |r| r.window_start > since))
            .collect()
    }
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, principal: &PrincipalId) -> Result<Option<CreditAccount>> {
        self.get(cf::ACCOUNTS, &keys::account_key(principal))
    }

    async fn open_account(
        &self,
        account: &CreditAccount,
        opening: LedgerEntry,
    ) -> Result<CreditAccount> {
        let _guard = self.write_guard()?;

        if let Some(existing) = self.get(cf::ACCOUNTS, &keys::account_key(&account.principal))? {
            return Ok(existing);
        }

        if account.balance > 0 {
            self.write_ledger(account, &Transaction::record(opening, 0, account.balance))?;
        } else {
            let cf = self.cf(cf::ACCOUNTS)?;
            self.db
                .put_cf(&cf, keys::account_key(&account.principal), Self::serialize(account)?)
                .map_err(db_err)?;
        }
        Ok(account.clone())
    }

    async fn debit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        entry: LedgerEntry,
    ) -> Result<DebitOutcome> {
        let _guard = self.write_guard()?;
        let mut account = self.account_or_not_found(principal)?;

        if account.balance < amount {
            return Ok(DebitOutcome::Insufficient {
                balance: account.balance,
            });
        }

        let before = account.balance;
        account.balance -= amount;
        account.free_credits_used += amount;
        account.updated_at = entry.created_at;

        let tx = Transaction::record(entry, before, account.balance);
        self.write_ledger(&account, &tx)?;
        Ok(DebitOutcome::Applied(tx))
    }

    async fn credit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<CreditOutcome> {
        let _guard = self.write_guard()?;
        let mut account = self.account_or_not_found(principal)?;

        let before = account.balance;
        let after = before.saturating_add(amount).min(ceiling).max(before);
        account.balance = after;
        account.lifetime_earned += after - before;
        account.updated_at = entry.created_at;

        let tx = Transaction::record(entry, before, after);
        self.write_ledger(&account, &tx)?;
        Ok(CreditOutcome {
            transaction: tx,
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
        let _guard = self.write_guard()?;
        let Some(mut account) = self.get::<CreditAccount>(cf::ACCOUNTS, &keys::account_key(principal))? else {
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

        // Mark and ledger row land in the same batch.
        let tx = Transaction::record(entry, before, after);
        self.write_ledger(&account, &tx)?;
        Ok(Some(CreditOutcome {
            transaction: tx,
            excess_dropped: amount - (after - before),
        }))
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.get(cf::TRANSACTIONS, &keys::transaction_key(id))
    }

    async fn list_transactions(
        &self,
        principal: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let cf_by_principal = self.cf(cf::TRANSACTIONS_BY_PRINCIPAL)?;
        let prefix = keys::account_key(principal);
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; 16]);

        let mut transactions = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf_by_principal, IteratorMode::From(&upper, Direction::Reverse));

        // Reverse iteration from the end of the prefix gives newest first.
        for item in iter.skip(offset) {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) || transactions.len() >= limit {
                break;
            }
            let Some(id) = keys::transaction_id_from_index(&key) else {
                continue;
            };
            if let Some(tx) = self.get(cf::TRANSACTIONS, &keys::transaction_key(&id))? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    async fn transactions_since(
        &self,
        principal: Option<&PrincipalId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        if let Some(principal) = principal {
            return self.principal_transactions(principal, since);
        }

        let from = keys::transaction_lower_bound(since);
        self.scan_forward(cf::TRANSACTIONS, &[], &from)?
            .iter()
            .map(|(_, value)| Self::deserialize::<Transaction>(value))
            .filter(|tx| tx.as_ref().map_or(true, |tx| tx.created_at >= since))
            .collect()
    }

    async fn has_transaction_kind(
        &self,
        principal: &PrincipalId,
        kind: TransactionKind,
    ) -> Result<bool> {
        let all = self.principal_transactions(principal, DateTime::<Utc>::UNIX_EPOCH)?;
        Ok(all.iter().any(|tx| tx.kind == kind))
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
        let _guard = self.write_guard()?;
        let records = self.window_records(identity, endpoint, limits, now)?;
        let evaluation = evaluate(limits, &records, now);

        if matches!(evaluation, Evaluation::Admit(_)) {
            let cf = self.cf(cf::RATE_LIMITS)?;
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let record = RateLimitRecord::admitted(identity, endpoint, now);
            self.db
                .put_cf(
                    &cf,
                    keys::rate_limit_key(identity, endpoint, now, seq),
                    Self::serialize(&record)?,
                )
                .map_err(db_err)?;
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
        let records = self.window_records(identity, endpoint, limits, now)?;
        Ok(evaluate(limits, &records, now))
    }

    async fn reset_rate_limits(&self, identity: &str) -> Result<u64> {
        let _guard = self.write_guard()?;
        let cf = self.cf(cf::RATE_LIMITS)?;
        let prefix = keys::identity_prefix(identity);

        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for (key, _) in self.scan_forward(cf::RATE_LIMITS, &prefix, &prefix)? {
            batch.delete_cf(&cf, key);
            removed += 1;
        }
        self.db.write(batch).map_err(db_err)?;
        Ok(removed)
    }

    async fn purge_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_guard()?;
        let cf = self.cf(cf::RATE_LIMITS)?;

        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for (key, value) in self.scan_forward(cf::RATE_LIMITS, &[], &[])? {
            let record: RateLimitRecord = Self::deserialize(&value)?;
            if record.window_start < cutoff {
                batch.delete_cf(&cf, key);
                removed += 1;
            }
        }
        self.db.write(batch).map_err(db_err)?;
        Ok(removed)
    }

    // =========================================================================
    // Promo Operations
    // =========================================================================

    async fn insert_promo(&self, promo: &PromoCode) -> Result<()> {
        let _guard = self.write_guard()?;
        let key = keys::promo_key(&promo.code);
        if self.get::<PromoCode>(cf::PROMO_CODES, &key)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "promo code {} already exists",
                promo.code
            )));
        }
        let cf = self.cf(cf::PROMO_CODES)?;
        self.db
            .put_cf(&cf, key, Self::serialize(promo)?)
            .map_err(db_err)
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>> {
        self.get(cf::PROMO_CODES, &keys::promo_key(code))
    }

    async fn set_promo_active(&self, code: &str, active: bool) -> Result<bool> {
        let _guard = self.write_guard()?;
        let key = keys::promo_key(code);
        let Some(mut promo) = self.get::<PromoCode>(cf::PROMO_CODES, &key)? else {
            return Ok(false);
        };
        promo.active = active;
        let cf = self.cf(cf::PROMO_CODES)?;
        self.db
            .put_cf(&cf, key, Self::serialize(&promo)?)
            .map_err(db_err)?;
        Ok(true)
    }

    async fn count_promo_usage(&self, code: &str, principal: &PrincipalId) -> Result<u32> {
        let prefix = keys::promo_usage_prefix(code, principal);
        let count = self.scan_forward(cf::PROMO_USAGE, &prefix, &prefix)?.len();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn claim_promo(&self, mut usage: PromoUsage) -> Result<ClaimOutcome> {
        let _guard = self.write_guard()?;
        let promo_key = keys::promo_key(&usage.promo_code);

        let Some(mut promo) = self.get::<PromoCode>(cf::PROMO_CODES, &promo_key)? else {
            return Ok(ClaimOutcome::NotFound);
        };
        if !promo.active {
            return Ok(ClaimOutcome::Inactive);
        }
        if promo.max_uses.is_some_and(|max| promo.used_count >= max) {
            return Ok(ClaimOutcome::Exhausted);
        }

        let prefix = keys::promo_usage_prefix(&usage.promo_code, &usage.principal);
        let taken: Vec<u32> = self
            .scan_forward(cf::PROMO_USAGE, &prefix, &prefix)?
            .iter()
            .map(|(_, value)| Self::deserialize::<PromoUsage>(value).map(|u| u.slot))
            .collect::<Result<_>>()?;
        let Some(slot) = (1..=promo.max_uses_per_user).find(|s| !taken.contains(s)) else {
            return Ok(ClaimOutcome::UserLimitReached);
        };

        usage.slot = slot;
        promo.used_count += 1;

        let cf_codes = self.cf(cf::PROMO_CODES)?;
        let cf_usage = self.cf(cf::PROMO_USAGE)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_codes, &promo_key, Self::serialize(&promo)?);
        batch.put_cf(
            &cf_usage,
            keys::promo_usage_key(&usage.promo_code, &usage.principal, slot),
            Self::serialize(&usage)?,
        );
        self.db.write(batch).map_err(db_err)?;

        Ok(ClaimOutcome::Claimed {
            usage,
            used_count: promo.used_count,
        })
    }

    async fn release_promo_claim(&self, code: &str, usage_id: &PromoUsageId) -> Result<()> {
        let _guard = self.write_guard()?;
        let prefix = keys::promo_usage_code_prefix(code);

        let mut found = None;
        for (key, value) in self.scan_forward(cf::PROMO_USAGE, &prefix, &prefix)? {
            let usage: PromoUsage = Self::deserialize(&value)?;
            if usage.id == *usage_id {
                found = Some(key);
                break;
            }
        }
        let Some(usage_key) = found else {
            return Ok(());
        };

        let cf_codes = self.cf(cf::PROMO_CODES)?;
        let cf_usage = self.cf(cf::PROMO_USAGE)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_usage, usage_key);

        let promo_key = keys::promo_key(code);
        if let Some(mut promo) = self.get::<PromoCode>(cf::PROMO_CODES, &promo_key)? {
            promo.used_count = promo.used_count.saturating_sub(1);
            batch.put_cf(&cf_codes, &promo_key, Self::serialize(&promo)?);
        }
        self.db.write(batch).map_err(db_err)
    }

    async fn settle_promo_credits(
        &self,
        code: &str,
        usage_id: &PromoUsageId,
        credits: i64,
    ) -> Result<bool> {
        let _guard = self.write_guard()?;
        let prefix = keys::promo_usage_code_prefix(code);

        for (key, value) in self.scan_forward(cf::PROMO_USAGE, &prefix, &prefix)? {
            let mut usage: PromoUsage = Self::deserialize(&value)?;
            if usage.id != *usage_id {
                continue;
            }
            usage.credits_awarded = Some(credits);

            let cf_usage = self.cf(cf::PROMO_USAGE)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_usage, key, Self::serialize(&usage)?);
            self.db.write(batch).map_err(db_err)?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_promo_usage(&self, code: &str) -> Result<Vec<PromoUsage>> {
        let prefix = keys::promo_usage_code_prefix(code);
        let mut usage = self
            .scan_forward(cf::PROMO_USAGE, &prefix, &prefix)?
            .into_iter()
            .map(|(_, value)| Self::deserialize::<PromoUsage>(&value))
            .collect::<Result<Vec<_>>>()?;
        usage.sort_by_key(|u| (u.created_at, u.slot));
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use creditgate_core::{PromoKind, WindowLimits};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 9, 30, 0).unwrap()
    }

    async fn opened(store: &RocksStore, balance: i64) -> PrincipalId {
        let principal = PrincipalId::generate();
        let opening = LedgerEntry::new(principal, TransactionKind::Bonus, "Welcome", now());
        store
            .open_account(&CreditAccount::opened(principal, balance, now()), opening)
            .await
            .unwrap();
        principal
    }

    #[tokio::test]
    async fn ledger_replay_matches_balance() {
        let (store, _dir) = create_test_store();
        let principal = opened(&store, 100).await;

        for i in 1..=3 {
            let entry = LedgerEntry::new(
                principal,
                TransactionKind::Usage,
                "Search",
                now() + Duration::seconds(i),
            )
            .with_action("stock_search");
            store.debit(&principal, 2, entry).await.unwrap();
        }
        let refund = LedgerEntry::new(principal, TransactionKind::Refund, "Refund", now() + Duration::seconds(10));
        store.credit(&principal, 5, 100_000, refund).await.unwrap();

        let account = store.get_account(&principal).await.unwrap().unwrap();
        let txs = store.list_transactions(&principal, 100, 0).await.unwrap();
        assert_eq!(txs.len(), 5);
        assert_eq!(txs[0].kind, TransactionKind::Refund);
        assert_eq!(txs.iter().map(|t| t.amount).sum::<i64>(), account.balance);
        assert_eq!(account.balance, 99);
        assert_eq!(account.free_credits_used, 6);
    }

    #[tokio::test]
    async fn monthly_grant_marks_and_credits_together() {
        let (store, _dir) = create_test_store();
        let principal = opened(&store, 90).await;
        let month_start = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let at = month_start + Duration::hours(3);
        let grant = || LedgerEntry::new(principal, TransactionKind::MonthlyReset, "Monthly", at);

        let outcome = store
            .grant_monthly(&principal, month_start, 100, 150, grant())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.transaction.amount, 60);
        assert_eq!(outcome.excess_dropped, 40);
        assert!(store
            .grant_monthly(&principal, month_start, 100, 150, grant())
            .await
            .unwrap()
            .is_none());

        let account = store.get_account(&principal).await.unwrap().unwrap();
        assert_eq!((account.balance, account.last_monthly_reset), (150, Some(at)));
        let replayed: i64 = store
            .transactions_since(Some(&principal), month_start - Duration::days(60))
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.amount)
            .sum();
        assert_eq!(replayed, 150);
    }

    #[tokio::test]
    async fn debit_refuses_overdraft() {
        let (store, _dir) = create_test_store();
        let principal = opened(&store, 10).await;
        let entry = LedgerEntry::new(principal, TransactionKind::Usage, "Analysis", now())
            .with_action("ai_analysis");

        let outcome = store.debit(&principal, 25, entry).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient { balance: 10 });
    }

    #[tokio::test]
    async fn since_queries_are_time_bounded() {
        let (store, _dir) = create_test_store();
        let principal = opened(&store, 50).await;
        let later = now() + Duration::days(3);
        let entry = LedgerEntry::new(principal, TransactionKind::Usage, "Chat", later).with_action("ai_chat");
        store.debit(&principal, 5, entry).await.unwrap();

        let recent = store
            .transactions_since(Some(&principal), now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        let global = store.transactions_since(None, now()).await.unwrap();
        assert_eq!(global.len(), 2);
        assert!(store.has_transaction_kind(&principal, TransactionKind::Usage).await.unwrap());
    }

    #[tokio::test]
    async fn rate_limits_admit_reset_and_purge() {
        let (store, _dir) = create_test_store();
        let limits = WindowLimits {
            per_minute: 1,
            per_hour: 10,
            per_day: 10,
        }
        .ordered();

        let first = store.admit_request("ip:10.1.1.1", "/api", &limits, now()).await.unwrap();
        assert!(matches!(first, Evaluation::Admit(_)));
        let second = store.admit_request("ip:10.1.1.1", "/api", &limits, now()).await.unwrap();
        assert!(matches!(second, Evaluation::Deny(_)));
        let later = store
            .admit_request("ip:10.1.1.1", "/api", &limits, now() + Duration::seconds(61))
            .await
            .unwrap();
        assert!(matches!(later, Evaluation::Admit(_)));

        assert_eq!(store.purge_rate_limits(now() + Duration::seconds(30)).await.unwrap(), 1);
        assert_eq!(store.reset_rate_limits("ip:10.1.1.1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn promo_claim_and_release() {
        let (store, _dir) = create_test_store();
        let mut promo = PromoCode::new("LAUNCH", PromoKind::Credits, 20, now());
        promo.max_uses = Some(1);
        store.insert_promo(&promo).await.unwrap();

        let principal = PrincipalId::generate();
        let usage = PromoUsage {
            id: PromoUsageId::generate(),
            promo_code: "LAUNCH".into(),
            principal,
            slot: 0,
            credits_awarded: Some(20),
            discount_applied: None,
            purchase_id: None,
            metadata: None,
            created_at: now(),
        };

        let ClaimOutcome::Claimed { usage, used_count } = store.claim_promo(usage.clone()).await.unwrap() else {
            panic!("expected claim");
        };
        assert_eq!((usage.slot, used_count), (1, 1));
        assert_eq!(store.count_promo_usage("LAUNCH", &principal).await.unwrap(), 1);

        assert!(store.settle_promo_credits("LAUNCH", &usage.id, 7).await.unwrap());
        let rows = store.list_promo_usage("LAUNCH").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].credits_awarded, Some(7));
        assert!(!store
            .settle_promo_credits("LAUNCH", &PromoUsageId::generate(), 7)
            .await
            .unwrap());

        store.release_promo_claim("LAUNCH", &usage.id).await.unwrap();
        assert_eq!(store.count_promo_usage("LAUNCH", &principal).await.unwrap(), 0);
        assert_eq!(store.get_promo("LAUNCH").await.unwrap().unwrap().used_count, 0);
        assert!(store.list_promo_usage("LAUNCH").await.unwrap().is_empty());
    }
}
