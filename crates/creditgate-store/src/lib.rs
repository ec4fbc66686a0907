//! Storage layer for creditgate.
//!
//! Every balance, rate-limit, and promo mutation is exposed as a single
//! atomic conditional operation. Callers never read a value, decide, and
//! then write it back: the decision happens inside the store.
//!
//! # Backends
//!
//! - [`MemoryStore`]: per-table mutexes, for tests and single-node use
//! - [`PgStore`]: PostgreSQL through `sqlx`, conditional `UPDATE ... RETURNING`
//! - `RocksStore`: embedded `RocksDB` with CBOR values (feature `rocksdb-backend`)
//!
//! # Example
//!
//! ```no_run
//! use creditgate_core::{CreditAccount, PrincipalId, LedgerEntry, TransactionKind};
//! use creditgate_store::{MemoryStore, Store};
//! use chrono::Utc;
//!
//! # async fn run() -> creditgate_store::Result<()> {
//! let store = MemoryStore::new();
//! let principal = PrincipalId::generate();
//! let now = Utc::now();
//!
//! let opening = LedgerEntry::new(principal, TransactionKind::Bonus, "Welcome credits", now);
//! store
//!     .open_account(&CreditAccount::opened(principal, 100, now), opening)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use creditgate_core::{
    CreditAccount, Evaluation, LedgerEntry, PrincipalId, PromoCode, PromoUsage, PromoUsageId,
    Transaction, TransactionId, TransactionKind, WindowLimit,
};

/// Result of a conditional debit.
#[derive(Debug, Clone, PartialEq)]
pub enum DebitOutcome {
    /// The balance covered the amount; the ledger row was written.
    Applied(Transaction),
    /// No row matched `balance >= amount`. Carries the balance read after
    /// the failed update.
    Insufficient {
        /// Current balance.
        balance: i64,
    },
}

/// Result of a clamped credit.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditOutcome {
    /// The ledger row, carrying the amount actually applied.
    pub transaction: Transaction,
    /// Credits dropped by the ceiling.
    pub excess_dropped: i64,
}

/// Result of a guarded promo claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The global counter was incremented and the usage row inserted.
    Claimed {
        /// The stored usage row with its assigned slot.
        usage: PromoUsage,
        /// Global count after this claim.
        used_count: u32,
    },
    /// No such code.
    NotFound,
    /// The code is switched off.
    Inactive,
    /// The global cap is reached.
    Exhausted,
    /// The principal has no free slot left.
    UserLimitReached,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (in-memory, `PostgreSQL`, `RocksDB`).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, principal: &PrincipalId) -> Result<Option<CreditAccount>>;

    /// Insert `account` unless the principal already has one.
    ///
    /// When the insert wins and the opening balance is positive, `opening` is
    /// written as the first ledger row (`0 -> balance`) in the same atomic
    /// step. Returns the stored account, which is the pre-existing one if the
    /// insert lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn open_account(
        &self,
        account: &CreditAccount,
        opening: LedgerEntry,
    ) -> Result<CreditAccount>;

    /// Decrement the balance by `amount` where `balance >= amount`, bump
    /// `free_credits_used`, and append the usage row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn debit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        entry: LedgerEntry,
    ) -> Result<DebitOutcome>;

    /// Increment the balance by `amount`, clamped to `ceiling`, and grow
    /// `lifetime_earned` by what was applied. A balance already above the
    /// ceiling is left as is.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn credit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<CreditOutcome>;

    /// Grant the monthly allotment in one atomic step: set
    /// `last_monthly_reset = entry.created_at` where it is unset or before
    /// `month_start`, and only if that guarded update changed the row,
    /// credit `amount` clamped at `ceiling`.
    ///
    /// Returns `None` when the month was already granted or the account
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written.
    async fn grant_monthly(
        &self,
        principal: &PrincipalId,
        month_start: DateTime<Utc>,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<Option<CreditOutcome>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    /// List a principal's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        principal: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    /// Transactions created at or after `since`, oldest first. `None` scans
    /// every principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn transactions_since(
        &self,
        principal: Option<&PrincipalId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;

    /// Whether the principal has any transaction of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn has_transaction_kind(
        &self,
        principal: &PrincipalId,
        kind: TransactionKind,
    ) -> Result<bool>;

    // =========================================================================
    // Rate-Limit Operations
    // =========================================================================

    /// Count the identity's records for `endpoint` against `limits` and,
    /// if every window has room, insert one record for `now`. Count and
    /// insert are one atomic step per `(identity, endpoint)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn admit_request(
        &self,
        identity: &str,
        endpoint: &str,
        limits: &[WindowLimit],
        now: DateTime<Utc>,
    ) -> Result<Evaluation>;

    /// Evaluate `limits` without recording anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn peek_requests(
        &self,
        identity: &str,
        endpoint: &str,
        limits: &[WindowLimit],
        now: DateTime<Utc>,
    ) -> Result<Evaluation>;

    /// Delete every record for `identity`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn reset_rate_limits(&self, identity: &str) -> Result<u64>;

    /// Delete records whose `window_start` is before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn purge_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // =========================================================================
    // Promo Operations
    // =========================================================================

    /// Insert a new promo code.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the code already exists.
    async fn insert_promo(&self, promo: &PromoCode) -> Result<()>;

    /// Get a promo code by its normalized code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>>;

    /// Switch a code on or off. Returns whether the code exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set_promo_active(&self, code: &str, active: bool) -> Result<bool>;

    /// Number of usage rows for `(code, principal)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_promo_usage(&self, code: &str, principal: &PrincipalId) -> Result<u32>;

    /// Atomically re-check the code's caps, increment `used_count`, and
    /// insert `usage` with the next free slot for its principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn claim_promo(&self, usage: PromoUsage) -> Result<ClaimOutcome>;

    /// Undo a claim whose follow-up step failed: delete the usage row and
    /// decrement `used_count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn release_promo_claim(&self, code: &str, usage_id: &PromoUsageId) -> Result<()>;

    /// Set the credits a claimed usage row actually granted. Returns whether
    /// the row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn settle_promo_credits(
        &self,
        code: &str,
        usage_id: &PromoUsageId,
        credits: i64,
    ) -> Result<bool>;

    /// Every usage row for `code`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_promo_usage(&self, code: &str) -> Result<Vec<PromoUsage>>;
}

/// Earliest `window_start` any of `limits` can still count at `now`.
pub(crate) fn lookback_start(limits: &[WindowLimit], now: DateTime<Utc>) -> DateTime<Utc> {
    limits
        .iter()
        .map(|l| l.window.duration())
        .max()
        .map_or(now, |longest| now - longest)
}
