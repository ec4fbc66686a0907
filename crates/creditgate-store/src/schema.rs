//! Database schema definitions and column families.
//!
//! The column families mirror the SQL tables in `migrations/`.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Credit accounts, keyed by `principal_id`.
    pub const ACCOUNTS: &str = "credit_accounts";

    /// Ledger rows, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "credit_transactions";

    /// Index: transactions by principal, keyed by `principal_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_PRINCIPAL: &str = "credit_transactions_by_principal";

    /// Rate-limit records, keyed by `identity \0 endpoint \0 start_millis || seq`.
    pub const RATE_LIMITS: &str = "rate_limit_records";

    /// Promo codes, keyed by the normalized code.
    pub const PROMO_CODES: &str = "promo_codes";

    /// Promo usage, keyed by `code \0 principal_id || slot`.
    pub const PROMO_USAGE: &str = "promo_usage";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_PRINCIPAL,
        cf::RATE_LIMITS,
        cf::PROMO_CODES,
        cf::PROMO_USAGE,
    ]
}
