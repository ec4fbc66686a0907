//! Promo code validation, redemption, and purchase application.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use creditgate_core::promo::normalize_code;
use creditgate_core::{
    Clock, MeterError, Metadata, PrincipalId, PromoBenefits, PromoCode, PromoContext, PromoKind,
    PromoRejection, PromoUsage, PromoUsageId, Result, TransactionKind,
};
use creditgate_store::{ClaimOutcome, Store};

use crate::credit_meter::CreditMeter;

/// Result of a read-only validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoValidation {
    /// Whether the code could be used right now.
    pub valid: bool,
    /// The normalized code.
    pub code: String,
    /// Why not, when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<PromoRejection>,
    /// What it would grant, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benefits: Option<PromoBenefits>,
}

/// Result of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemResult {
    /// Always true; failures are errors.
    pub success: bool,
    /// Credits actually added.
    pub credits_awarded: i64,
    /// Balance after the grant.
    pub new_balance: i64,
    /// Human-readable summary.
    pub message: String,
}

/// Priced purchase after a discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseQuote {
    /// The normalized code.
    pub code: String,
    /// Amount before discount.
    pub original_amount: i64,
    /// Amount the principal pays.
    pub discounted_amount: i64,
    /// Amount taken off.
    pub discount_applied: i64,
}

/// Validates and redeems promo codes. Balance changes go through the meter.
pub struct PromoRedeemer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    meter: Arc<CreditMeter>,
}

impl PromoRedeemer {
    /// Create a redeemer granting credits through `meter`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, meter: Arc<CreditMeter>) -> Self {
        Self { store, clock, meter }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check whether `principal` could use `code`. Never mutates state.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails. A code
    /// that cannot be used is reported in the result, not as an error.
    pub async fn validate(
        &self,
        code: &str,
        principal: &PrincipalId,
        context: &PromoContext,
    ) -> Result<PromoValidation> {
        let code = normalize_code(code);
        let outcome = self.check(&code, principal, context).await?;

        Ok(match outcome {
            Ok(promo) => PromoValidation {
                valid: true,
                code,
                reason: None,
                benefits: Some(promo.benefits()),
            },
            Err(rejection) => {
                tracing::debug!(code = %code, principal = %principal, reason = rejection.code(), "Promo code invalid");
                PromoValidation {
                    valid: false,
                    code,
                    reason: Some(rejection),
                    benefits: None,
                }
            }
        })
    }

    /// Load the code and run every use check against it.
    async fn check(
        &self,
        code: &str,
        principal: &PrincipalId,
        context: &PromoContext,
    ) -> Result<std::result::Result<PromoCode, PromoRejection>> {
        let Some(promo) = self.store.get_promo(code).await? else {
            return Ok(Err(PromoRejection::NotFound));
        };

        let prior = self.store.count_promo_usage(code, principal).await?;
        let context = if context.has_prior_purchase || !promo.filters.new_accounts_only {
            context.clone()
        } else {
            PromoContext {
                has_prior_purchase: self
                    .store
                    .has_transaction_kind(principal, TransactionKind::Purchase)
                    .await?,
                ..context.clone()
            }
        };

        Ok(promo
            .check_use(self.clock.now(), prior, &context)
            .map(|()| promo))
    }

    // =========================================================================
    // Redemption
    // =========================================================================

    /// Redeem a credit or trial code.
    ///
    /// The claim (global counter plus per-principal slot) is taken first; if
    /// adding the credits then fails, the claim is released.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::AlreadyRedeemed` when the principal has used up
    /// their uses, `MeterError::PromoRejected` for any other failed check, or
    /// `MeterError::StorageUnavailable` if the store fails.
    pub async fn redeem(
        &self,
        code: &str,
        principal: &PrincipalId,
        metadata: Option<Metadata>,
    ) -> Result<RedeemResult> {
        let code = normalize_code(code);
        let promo = self
            .check(&code, principal, &PromoContext::default())
            .await?
            .map_err(|rejection| rejected(&code, rejection))?;

        if !promo.kind.grants_credits() {
            return Err(MeterError::PromoRejected(PromoRejection::WrongKind {
                expected: PromoKind::Credits.to_string(),
                actual: promo.kind.to_string(),
            }));
        }

        let usage = self.new_usage(&code, principal, metadata.clone());
        let usage_id = usage.id;
        let claim = PromoUsage {
            credits_awarded: Some(promo.value),
            ..usage
        };
        let used_count = match self.store.claim_promo(claim).await? {
            ClaimOutcome::Claimed { used_count, .. } => used_count,
            other => return Err(rejected(&code, claim_rejection(&other))),
        };

        let description = format!("Promo code {code}");
        let credit = match self
            .meter
            .add(principal, promo.value, TransactionKind::Promo, &description, metadata)
            .await
        {
            Ok(credit) => credit,
            Err(err) => {
                tracing::error!(code = %code, principal = %principal, error = %err, "Promo grant failed, releasing claim");
                if let Err(release) = self.store.release_promo_claim(&code, &usage_id).await {
                    tracing::error!(code = %code, error = %release, "Failed to release promo claim");
                }
                return Err(err);
            }
        };

        if credit.amount_applied != promo.value {
            if let Err(err) = self
                .store
                .settle_promo_credits(&code, &usage_id, credit.amount_applied)
                .await
            {
                tracing::warn!(code = %code, error = %err, "Failed to record capped promo grant on usage row");
            }
        }

        tracing::info!(
            code = %code,
            principal = %principal,
            credits = credit.amount_applied,
            used_count,
            "Promo code redeemed"
        );

        Ok(RedeemResult {
            success: true,
            credits_awarded: credit.amount_applied,
            new_balance: credit.new_balance,
            message: format!("Redeemed {code} for {} credits", credit.amount_applied),
        })
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Price a purchase with a discount code. Records nothing.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::PromoRejected` if the code cannot be applied,
    /// `MeterError::Validation` for a non-positive amount.
    pub async fn apply_to_purchase(
        &self,
        code: &str,
        principal: &PrincipalId,
        amount: i64,
        package_id: Option<String>,
    ) -> Result<PurchaseQuote> {
        if amount <= 0 {
            return Err(MeterError::Validation("amount must be positive".into()));
        }
        let code = normalize_code(code);
        let context = PromoContext {
            purchase_amount: Some(amount),
            package_id,
            has_prior_purchase: false,
        };
        let promo = self
            .check(&code, principal, &context)
            .await?
            .map_err(|rejection| rejected(&code, rejection))?;

        if promo.kind != PromoKind::Discount {
            return Err(MeterError::PromoRejected(PromoRejection::WrongKind {
                expected: PromoKind::Discount.to_string(),
                actual: promo.kind.to_string(),
            }));
        }

        let discount = promo.discount_for(amount);
        Ok(PurchaseQuote {
            code,
            original_amount: amount,
            discounted_amount: amount - discount,
            discount_applied: discount,
        })
    }

    /// Record a discount code against a confirmed purchase.
    ///
    /// The code must be a discount code inside its validity window. Purchase
    /// filters are not re-applied; they were checked when the price was quoted.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::AlreadyRedeemed` or `MeterError::PromoRejected`
    /// when the code cannot be used, `MeterError::Validation` for an unknown
    /// code or a negative discount.
    pub async fn record_purchase_usage(
        &self,
        code: &str,
        principal: &PrincipalId,
        discount_applied: i64,
        purchase_id: &str,
        metadata: Option<Metadata>,
    ) -> Result<PromoUsage> {
        if discount_applied < 0 {
            return Err(MeterError::Validation("discount must not be negative".into()));
        }
        let code = normalize_code(code);
        let Some(promo) = self.store.get_promo(&code).await? else {
            return Err(rejected(&code, PromoRejection::NotFound));
        };
        if promo.kind != PromoKind::Discount {
            return Err(MeterError::PromoRejected(PromoRejection::WrongKind {
                expected: PromoKind::Discount.to_string(),
                actual: promo.kind.to_string(),
            }));
        }
        let prior = self.store.count_promo_usage(&code, principal).await?;
        promo
            .check_use(self.clock.now(), prior, &PromoContext::default())
            .map_err(|rejection| rejected(&code, rejection))?;

        let usage = PromoUsage {
            discount_applied: Some(discount_applied),
            purchase_id: Some(purchase_id.to_string()),
            ..self.new_usage(&code, principal, metadata)
        };

        match self.store.claim_promo(usage).await? {
            ClaimOutcome::Claimed { usage, used_count } => {
                tracing::info!(
                    code = %code,
                    principal = %principal,
                    purchase_id,
                    discount_applied,
                    used_count,
                    "Promo purchase usage recorded"
                );
                Ok(usage)
            }
            other => Err(rejected(&code, claim_rejection(&other))),
        }
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Create a new code.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Validation` for an incoherent definition or a
    /// duplicate code.
    pub async fn create(&self, mut promo: PromoCode) -> Result<PromoCode> {
        promo.code = normalize_code(&promo.code);
        promo.used_count = 0;
        promo.check_definition().map_err(MeterError::Validation)?;

        self.store.insert_promo(&promo).await?;
        tracing::info!(code = %promo.code, kind = %promo.kind, value = promo.value, "Promo code created");
        Ok(promo)
    }

    /// Switch a code off. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn deactivate(&self, code: &str) -> Result<bool> {
        let code = normalize_code(code);
        let found = self.store.set_promo_active(&code, false).await?;
        if found {
            tracing::info!(code = %code, "Promo code deactivated");
        }
        Ok(found)
    }

    fn new_usage(&self, code: &str, principal: &PrincipalId, metadata: Option<Metadata>) -> PromoUsage {
        PromoUsage {
            id: PromoUsageId::generate(),
            promo_code: code.to_string(),
            principal: *principal,
            slot: 0,
            credits_awarded: None,
            discount_applied: None,
            purchase_id: None,
            metadata,
            created_at: self.clock.now(),
        }
    }
}

fn claim_rejection(outcome: &ClaimOutcome) -> PromoRejection {
    match outcome {
        ClaimOutcome::NotFound | ClaimOutcome::Claimed { .. } => PromoRejection::NotFound,
        ClaimOutcome::Inactive => PromoRejection::Inactive,
        ClaimOutcome::Exhausted => PromoRejection::Exhausted,
        ClaimOutcome::UserLimitReached => PromoRejection::AlreadyRedeemed,
    }
}

fn rejected(code: &str, rejection: PromoRejection) -> MeterError {
    match rejection {
        PromoRejection::AlreadyRedeemed => MeterError::AlreadyRedeemed {
            code: code.to_string(),
        },
        PromoRejection::NotFound => MeterError::Validation(format!("unknown promo code {code}")),
        other => MeterError::PromoRejected(other),
    }
}
