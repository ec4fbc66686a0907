//! Credit balance, ledger, and mutation handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{Metadata, PrincipalId, Transaction, TransactionKind};
use creditgate_meter::{Credit, Deduction, Sufficiency};

use crate::auth::{AdminAuth, AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The principal.
    pub principal: String,
    /// Current balance.
    pub balance: i64,
    /// Total credits ever added.
    pub lifetime_earned: i64,
    /// Credits consumed by usage.
    pub free_credits_used: i64,
    /// When the monthly allotment was last granted.
    pub last_monthly_reset: Option<DateTime<Utc>>,
    /// Size of the monthly allotment.
    pub monthly_credits: i64,
}

/// Get the caller's balance, opening the account on first use.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.meter.account(&auth.principal).await?;

    Ok(Json(BalanceResponse {
        principal: account.principal.to_string(),
        balance: account.balance,
        lifetime_earned: account.lifetime_earned,
        free_credits_used: account.free_credits_used,
        last_monthly_reset: account.last_monthly_reset,
        monthly_credits: state.meter.policy().monthly_credits,
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Signed amount (positive = credit, negative = debit).
    pub amount: i64,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// Action charged, for usage rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Balance before this transaction.
    pub balance_before: i64,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Caller-supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            kind: tx.kind,
            action: tx.action.clone(),
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            metadata: tx.metadata.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List the caller's ledger, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.clamp(1, 100);
    let transactions = state
        .meter
        .transactions(&auth.principal, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Sufficiency check query.
#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    /// Action to price.
    pub action: String,
}

/// Whether the caller can afford `action`. Reserves nothing.
pub async fn check(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<CheckQuery>,
) -> Result<Json<Sufficiency>, ApiError> {
    let sufficiency = state
        .meter
        .check_sufficiency(&auth.principal, &query.action)
        .await?;
    Ok(Json(sufficiency))
}

/// Deduction request from the fronting service.
#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Principal to charge.
    pub principal: PrincipalId,
    /// Action performed.
    pub action: String,
    /// Opaque metadata stored on the ledger row.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Charge an action after the billable operation succeeded.
pub async fn deduct(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<DeductRequest>,
) -> Result<Json<Deduction>, ApiError> {
    let deduction = state
        .meter
        .deduct(&body.principal, &body.action, body.metadata)
        .await?;

    tracing::debug!(
        service = %auth.service_name,
        principal = %body.principal,
        action = %body.action,
        "Deduction reported"
    );
    Ok(Json(deduction))
}

/// Monthly reset response.
#[derive(Debug, Serialize)]
pub struct MonthlyResetResponse {
    /// Whether this call granted the allotment.
    pub granted: bool,
    /// Balance afterwards.
    pub balance: i64,
}

/// Grant the monthly allotment if due.
pub async fn monthly_reset(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<MonthlyResetResponse>, ApiError> {
    let granted = state.monthly.check_and_reset(&auth.principal).await?;
    let balance = state.meter.account(&auth.principal).await?.balance;

    Ok(Json(MonthlyResetResponse { granted, balance }))
}

/// Admin credit request.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// Principal to credit.
    pub principal: PrincipalId,
    /// Credits to add.
    pub amount: i64,
    /// Credit kind (default: `admin_adjust`).
    #[serde(default = "default_add_kind")]
    pub kind: TransactionKind,
    /// Reason shown in the ledger.
    pub description: String,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

fn default_add_kind() -> TransactionKind {
    TransactionKind::AdminAdjust
}

/// Add credits to any principal (admin only).
pub async fn admin_add_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AddCreditsRequest>,
) -> Result<Json<Credit>, ApiError> {
    tracing::info!(
        admin_id = %admin.admin_id,
        principal = %body.principal,
        amount = body.amount,
        kind = %body.kind,
        "Admin adding credits"
    );

    let credit = state
        .meter
        .add(
            &body.principal,
            body.amount,
            body.kind,
            &body.description,
            body.metadata,
        )
        .await?;
    Ok(Json(credit))
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Principal to refund.
    pub principal: PrincipalId,
    /// Credits to return.
    pub amount: i64,
    /// Reason shown in the ledger.
    pub reason: String,
}

/// Refund credits (admin only).
pub async fn admin_refund(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<Credit>, ApiError> {
    tracing::info!(
        admin_id = %admin.admin_id,
        principal = %body.principal,
        amount = body.amount,
        "Admin refunding credits"
    );

    let credit = state
        .meter
        .refund(&body.principal, body.amount, &body.reason)
        .await?;
    Ok(Json(credit))
}
