//! `PostgreSQL` storage implementation.
//!
//! Balance changes are conditional `UPDATE ... RETURNING` statements whose
//! returned values feed the ledger row written in the same transaction.
//! Rate-limit admission serializes per `(identity, endpoint)` with a
//! transaction-scoped advisory lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use creditgate_core::rate_limit::evaluate;
use creditgate_core::{
    ApplicabilityFilters, CreditAccount, Evaluation, LedgerEntry, Metadata, PrincipalId,
    PromoCode, PromoUsage, PromoUsageId, RateLimitRecord, Transaction, TransactionId,
    TransactionKind, WindowLimit,
};

use crate::error::{Result, StoreError};
use crate::{lookback_start, ClaimOutcome, CreditOutcome, DebitOutcome, Store};

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn account_from_row(row: &PgRow) -> Result<CreditAccount> {
    Ok(CreditAccount {
        principal: PrincipalId::from_uuid(row.try_get("principal_id")?),
        balance: row.try_get("balance")?,
        lifetime_earned: row.try_get("lifetime_earned")?,
        free_credits_used: row.try_get("free_credits_used")?,
        last_monthly_reset: row.try_get("last_monthly_reset")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let metadata: Option<Json<Metadata>> = row.try_get("metadata")?;

    Ok(Transaction {
        id: id
            .parse()
            .map_err(|e: creditgate_core::IdError| StoreError::Serialization(e.to_string()))?,
        principal: PrincipalId::from_uuid(row.try_get("principal_id")?),
        amount: row.try_get("amount")?,
        kind: kind.parse().map_err(StoreError::Serialization)?,
        action: row.try_get("action")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        description: row.try_get("description")?,
        metadata: metadata.map(|Json(m)| m),
        created_at: row.try_get("created_at")?,
    })
}

fn promo_from_row(row: &PgRow) -> Result<PromoCode> {
    let kind: String = row.try_get("kind")?;
    let max_uses: Option<i32> = row.try_get("max_uses")?;
    let Json(filters): Json<ApplicabilityFilters> = row.try_get("filters")?;

    Ok(PromoCode {
        code: row.try_get("code")?,
        kind: kind.parse().map_err(StoreError::Serialization)?,
        value: row.try_get("value")?,
        max_discount: row.try_get("max_discount")?,
        max_uses: max_uses.map(to_u32),
        max_uses_per_user: to_u32(row.try_get("max_uses_per_user")?),
        used_count: to_u32(row.try_get("used_count")?),
        starts_at: row.try_get("starts_at")?,
        expires_at: row.try_get("expires_at")?,
        filters,
        active: row.try_get("active")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<PromoUsage> {
    let metadata: Option<Json<Metadata>> = row.try_get("metadata")?;

    Ok(PromoUsage {
        id: PromoUsageId::from_uuid(row.try_get("id")?),
        promo_code: row.try_get("promo_code")?,
        principal: PrincipalId::from_uuid(row.try_get("principal_id")?),
        slot: to_u32(row.try_get("slot")?),
        credits_awarded: row.try_get("credits_awarded")?,
        discount_applied: row.try_get("discount_applied")?,
        purchase_id: row.try_get("purchase_id")?,
        metadata: metadata.map(|Json(m)| m),
        created_at: row.try_get("created_at")?,
    })
}

fn record_from_row(identity: &str, endpoint: &str, row: &PgRow) -> Result<RateLimitRecord> {
    Ok(RateLimitRecord {
        identity: identity.to_string(),
        endpoint: endpoint.to_string(),
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        request_count: to_u32(row.try_get("request_count")?),
    })
}

const TRANSACTION_COLUMNS: &str = "id, principal_id, amount, kind, action, balance_before, \
     balance_after, description, metadata, created_at";

const ACCOUNT_COLUMNS: &str = "principal_id, balance, lifetime_earned, free_credits_used, \
     last_monthly_reset, created_at, updated_at";

/// Clamped credit plus its ledger row, on the caller's transaction.
async fn apply_credit(
    conn: &mut PgConnection,
    principal: &PrincipalId,
    amount: i64,
    ceiling: i64,
    entry: LedgerEntry,
) -> Result<CreditOutcome> {
    let row = sqlx::query(
        "WITH prev AS ( \
             SELECT principal_id, balance FROM credit_accounts WHERE principal_id = $1 FOR UPDATE \
         ) \
         UPDATE credit_accounts a \
         SET balance = GREATEST(LEAST(prev.balance + $2, $3), prev.balance), \
             lifetime_earned = a.lifetime_earned + (GREATEST(LEAST(prev.balance + $2, $3), prev.balance) - prev.balance), \
             updated_at = $4 \
         FROM prev WHERE a.principal_id = prev.principal_id \
         RETURNING prev.balance AS balance_before, a.balance AS balance_after",
    )
    .bind(principal.as_uuid())
    .bind(amount)
    .bind(ceiling)
    .bind(entry.created_at)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| StoreError::NotFound {
        entity: "account",
        id: principal.to_string(),
    })?;

    let before: i64 = row.try_get("balance_before")?;
    let after: i64 = row.try_get("balance_after")?;
    let record = Transaction::record(entry, before, after);
    insert_transaction(conn, &record).await?;

    Ok(CreditOutcome {
        transaction: record,
        excess_dropped: amount - (after - before),
    })
}

async fn insert_transaction(conn: &mut PgConnection, tx: &Transaction) -> Result<()> {
    sqlx::query(
        "INSERT INTO credit_transactions \
         (id, principal_id, amount, kind, action, balance_before, balance_after, description, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(tx.id.to_string())
    .bind(tx.principal.as_uuid())
    .bind(tx.amount)
    .bind(tx.kind.as_str())
    .bind(tx.action.as_deref())
    .bind(tx.balance_before)
    .bind(tx.balance_after)
    .bind(&tx.description)
    .bind(tx.metadata.as_ref().map(Json))
    .bind(tx.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn window_records(
    conn: &mut PgConnection,
    identity: &str,
    endpoint: &str,
    since: DateTime<Utc>,
) -> Result<Vec<RateLimitRecord>> {
    let rows = sqlx::query(
        "SELECT window_start, window_end, request_count FROM rate_limit_records \
         WHERE identity = $1 AND endpoint = $2 AND window_start > $3",
    )
    .bind(identity)
    .bind(endpoint)
    .bind(since)
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| record_from_row(identity, endpoint, row))
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, principal: &PrincipalId) -> Result<Option<CreditAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE principal_id = $1"
        ))
        .bind(principal.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn open_account(
        &self,
        account: &CreditAccount,
        opening: LedgerEntry,
    ) -> Result<CreditAccount> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO credit_accounts \
             (principal_id, balance, lifetime_earned, free_credits_used, last_monthly_reset, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (principal_id) DO NOTHING",
        )
        .bind(account.principal.as_uuid())
        .bind(account.balance)
        .bind(account.lifetime_earned)
        .bind(account.free_credits_used)
        .bind(account.last_monthly_reset)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted && account.balance > 0 {
            insert_transaction(&mut tx, &Transaction::record(opening, 0, account.balance)).await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE principal_id = $1"
        ))
        .bind(account.principal.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if inserted {
            tracing::debug!(principal = %account.principal, balance = account.balance, "Account opened");
        }
        account_from_row(&row)
    }

    async fn debit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        entry: LedgerEntry,
    ) -> Result<DebitOutcome> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE credit_accounts \
             SET balance = balance - $2, free_credits_used = free_credits_used + $2, updated_at = $3 \
             WHERE principal_id = $1 AND balance >= $2 \
             RETURNING balance + $2 AS balance_before, balance AS balance_after",
        )
        .bind(principal.as_uuid())
        .bind(amount)
        .bind(entry.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let balance: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE principal_id = $1")
                    .bind(principal.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return match balance {
                Some(balance) => Ok(DebitOutcome::Insufficient { balance }),
                None => Err(StoreError::NotFound {
                    entity: "account",
                    id: principal.to_string(),
                }),
            };
        };

        let record = Transaction::record(
            entry,
            row.try_get("balance_before")?,
            row.try_get("balance_after")?,
        );
        insert_transaction(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(DebitOutcome::Applied(record))
    }

    async fn credit(
        &self,
        principal: &PrincipalId,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<CreditOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = apply_credit(&mut tx, principal, amount, ceiling, entry).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn grant_monthly(
        &self,
        principal: &PrincipalId,
        month_start: DateTime<Utc>,
        amount: i64,
        ceiling: i64,
        entry: LedgerEntry,
    ) -> Result<Option<CreditOutcome>> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            "UPDATE credit_accounts SET last_monthly_reset = $2, updated_at = $2 \
             WHERE principal_id = $1 AND (last_monthly_reset IS NULL OR last_monthly_reset < $3)",
        )
        .bind(principal.as_uuid())
        .bind(entry.created_at)
        .bind(month_start)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if marked != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let outcome = apply_credit(&mut tx, principal, amount, ceiling, entry).await?;
        tx.commit().await?;
        Ok(Some(outcome))
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        principal: &PrincipalId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE principal_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(principal.as_uuid())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_since(
        &self,
        principal: Option<&PrincipalId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE created_at >= $1 AND ($2::uuid IS NULL OR principal_id = $2) \
             ORDER BY created_at, id"
        ))
        .bind(since)
        .bind(principal.map(PrincipalId::as_uuid))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn has_transaction_kind(
        &self,
        principal: &PrincipalId,
        kind: TransactionKind,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM credit_transactions WHERE principal_id = $1 AND kind = $2)",
        )
        .bind(principal.as_uuid())
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
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
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(format!("{identity}\u{1f}{endpoint}"))
            .execute(&mut *tx)
            .await?;

        let records = window_records(&mut tx, identity, endpoint, lookback_start(limits, now)).await?;
        let evaluation = evaluate(limits, &records, now);

        if matches!(evaluation, Evaluation::Admit(_)) {
            let record = RateLimitRecord::admitted(identity, endpoint, now);
            sqlx::query(
                "INSERT INTO rate_limit_records (identity, endpoint, window_start, window_end, request_count) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&record.identity)
            .bind(&record.endpoint)
            .bind(record.window_start)
            .bind(record.window_end)
            .bind(to_i32(record.request_count))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(evaluation)
    }

    async fn peek_requests(
        &self,
        identity: &str,
        endpoint: &str,
        limits: &[WindowLimit],
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        let mut conn = self.pool.acquire().await?;
        let records = window_records(&mut conn, identity, endpoint, lookback_start(limits, now)).await?;
        Ok(evaluate(limits, &records, now))
    }

    async fn reset_rate_limits(&self, identity: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_records WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_rate_limits(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_records WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Promo Operations
    // =========================================================================

    async fn insert_promo(&self, promo: &PromoCode) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO promo_codes \
             (code, kind, value, max_discount, max_uses, max_uses_per_user, used_count, \
              starts_at, expires_at, filters, active, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&promo.code)
        .bind(promo.kind.as_str())
        .bind(promo.value)
        .bind(promo.max_discount)
        .bind(promo.max_uses.map(to_i32))
        .bind(to_i32(promo.max_uses_per_user))
        .bind(to_i32(promo.used_count))
        .bind(promo.starts_at)
        .bind(promo.expires_at)
        .bind(Json(&promo.filters))
        .bind(promo.active)
        .bind(&promo.description)
        .bind(promo.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(format!(
                "promo code {} already exists",
                promo.code
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>> {
        let row = sqlx::query("SELECT * FROM promo_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(promo_from_row).transpose()
    }

    async fn set_promo_active(&self, code: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE promo_codes SET active = $2 WHERE code = $1")
            .bind(code)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_promo_usage(&self, code: &str, principal: &PrincipalId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM promo_usage WHERE promo_code = $1 AND principal_id = $2",
        )
        .bind(code)
        .bind(principal.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn claim_promo(&self, mut usage: PromoUsage) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        // Holds the code's row lock until commit, serializing claims per code.
        let claimed = sqlx::query(
            "UPDATE promo_codes SET used_count = used_count + 1 \
             WHERE code = $1 AND active AND (max_uses IS NULL OR used_count < max_uses) \
             RETURNING used_count, max_uses_per_user",
        )
        .bind(&usage.promo_code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            let active: Option<bool> =
                sqlx::query_scalar("SELECT active FROM promo_codes WHERE code = $1")
                    .bind(&usage.promo_code)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Ok(match active {
                None => ClaimOutcome::NotFound,
                Some(false) => ClaimOutcome::Inactive,
                Some(true) => ClaimOutcome::Exhausted,
            });
        };

        let used_count = to_u32(row.try_get("used_count")?);
        let max_per_user = to_u32(row.try_get("max_uses_per_user")?);

        let taken: Vec<i32> = sqlx::query_scalar(
            "SELECT slot FROM promo_usage WHERE promo_code = $1 AND principal_id = $2",
        )
        .bind(&usage.promo_code)
        .bind(usage.principal.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let Some(slot) = (1..=max_per_user).find(|s| !taken.contains(&to_i32(*s))) else {
            tx.rollback().await?;
            return Ok(ClaimOutcome::UserLimitReached);
        };
        usage.slot = slot;

        let inserted = sqlx::query(
            "INSERT INTO promo_usage \
             (id, promo_code, principal_id, slot, credits_awarded, discount_applied, purchase_id, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(usage.id.as_uuid())
        .bind(&usage.promo_code)
        .bind(usage.principal.as_uuid())
        .bind(to_i32(usage.slot))
        .bind(usage.credits_awarded)
        .bind(usage.discount_applied)
        .bind(usage.purchase_id.as_deref())
        .bind(usage.metadata.as_ref().map(Json))
        .bind(usage.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Ok(ClaimOutcome::UserLimitReached);
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed { usage, used_count })
    }

    async fn release_promo_claim(&self, code: &str, usage_id: &PromoUsageId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM promo_usage WHERE id = $1 AND promo_code = $2")
            .bind(usage_id.as_uuid())
            .bind(code)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 1 {
            sqlx::query(
                "UPDATE promo_codes SET used_count = used_count - 1 WHERE code = $1 AND used_count > 0",
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn settle_promo_credits(
        &self,
        code: &str,
        usage_id: &PromoUsageId,
        credits: i64,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE promo_usage SET credits_awarded = $3 WHERE id = $1 AND promo_code = $2",
        )
        .bind(usage_id.as_uuid())
        .bind(code)
        .bind(credits)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn list_promo_usage(&self, code: &str) -> Result<Vec<PromoUsage>> {
        let rows = sqlx::query(
            "SELECT id, promo_code, principal_id, slot, credits_awarded, discount_applied, \
             purchase_id, metadata, created_at \
             FROM promo_usage WHERE promo_code = $1 ORDER BY created_at, slot",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(usage_from_row).collect()
    }
}
