//! Promotional codes.
//!
//! Validation is a pure function of the code definition, the principal's
//! prior usage count and the purchase context. The redeemer re-runs it and
//! then relies on the store's guarded claim to close races.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credits::Metadata;
use crate::{PrincipalId, PromoUsageId};

/// What a promo code grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// A fixed number of credits.
    Credits,
    /// A percentage off a purchase.
    Discount,
    /// A one-time trial grant of credits.
    Trial,
}

impl PromoKind {
    /// Whether redeeming this kind adds credits.
    #[must_use]
    pub const fn grants_credits(self) -> bool {
        matches!(self, Self::Credits | Self::Trial)
    }

    /// The `snake_case` wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Credits => "credits",
            Self::Discount => "discount",
            Self::Trial => "trial",
        }
    }
}

impl std::fmt::Display for PromoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromoKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credits" => Ok(Self::Credits),
            "discount" => Ok(Self::Discount),
            "trial" => Ok(Self::Trial),
            other => Err(format!("unknown promo kind: {other}")),
        }
    }
}

/// Restrictions on who may use a code and for what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicabilityFilters {
    /// Minimum purchase amount for discount codes.
    #[serde(default)]
    pub min_purchase: Option<i64>,
    /// Packages the code applies to. Empty means all.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Only principals with no prior purchase may use the code.
    #[serde(default)]
    pub new_accounts_only: bool,
}

/// A promotional code definition and its global usage counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// Normalized (trimmed, upper-case) code.
    pub code: String,
    /// Benefit type.
    pub kind: PromoKind,
    /// Credits for `credits`/`trial`; percentage for `discount`.
    pub value: i64,
    /// Cap on the discount amount, for `discount` codes.
    pub max_discount: Option<i64>,
    /// Global redemption cap.
    pub max_uses: Option<u32>,
    /// Per-principal redemption cap.
    pub max_uses_per_user: u32,
    /// Successful redemptions so far.
    pub used_count: u32,
    /// Not valid before this instant.
    pub starts_at: Option<DateTime<Utc>>,
    /// Not valid from this instant on.
    pub expires_at: Option<DateTime<Utc>>,
    /// Applicability filters.
    pub filters: ApplicabilityFilters,
    /// Switched off by an operator.
    pub active: bool,
    /// Operator-facing description.
    pub description: String,
    /// When the code was created.
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    /// A new active code with a single use per principal and no global cap.
    #[must_use]
    pub fn new(code: &str, kind: PromoKind, value: i64, now: DateTime<Utc>) -> Self {
        Self {
            code: normalize_code(code),
            kind,
            value,
            max_discount: None,
            max_uses: None,
            max_uses_per_user: 1,
            used_count: 0,
            starts_at: None,
            expires_at: None,
            filters: ApplicabilityFilters::default(),
            active: true,
            description: String::new(),
            created_at: now,
        }
    }

    /// Check that the definition itself is coherent.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn check_definition(&self) -> Result<(), String> {
        if self.code.is_empty()
            || !self
                .code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("invalid promo code `{}`", self.code));
        }
        if self.value <= 0 {
            return Err("promo value must be positive".into());
        }
        if self.kind == PromoKind::Discount && self.value > 100 {
            return Err("discount percentage must be between 1 and 100".into());
        }
        if self.max_uses_per_user == 0 {
            return Err("max_uses_per_user must be at least 1".into());
        }
        if self.kind == PromoKind::Trial && self.max_uses_per_user != 1 {
            return Err("trial codes are single-use per principal".into());
        }
        if let (Some(start), Some(end)) = (self.starts_at, self.expires_at) {
            if end <= start {
                return Err("expires_at must be after starts_at".into());
            }
        }
        Ok(())
    }

    /// Validate a use of this code, in order: active, validity window, global
    /// cap, per-principal cap, minimum purchase, applicability.
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub fn check_use(
        &self,
        now: DateTime<Utc>,
        prior_uses_by_principal: u32,
        context: &PromoContext,
    ) -> Result<(), PromoRejection> {
        if !self.active {
            return Err(PromoRejection::Inactive);
        }
        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return Err(PromoRejection::NotStarted { starts_at });
            }
        }
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return Err(PromoRejection::Expired { expires_at });
            }
        }
        if self.max_uses.is_some_and(|max| self.used_count >= max) {
            return Err(PromoRejection::Exhausted);
        }
        if prior_uses_by_principal >= self.max_uses_per_user {
            return Err(PromoRejection::AlreadyRedeemed);
        }
        if let Some(minimum) = self.filters.min_purchase {
            if context.purchase_amount.is_some_and(|amount| amount < minimum) {
                return Err(PromoRejection::BelowMinimumPurchase { minimum });
            }
        }
        if !self.filters.packages.is_empty() {
            if let Some(package) = &context.package_id {
                if !self.filters.packages.iter().any(|p| p == package) {
                    return Err(PromoRejection::PackageNotEligible);
                }
            }
        }
        if self.filters.new_accounts_only && context.has_prior_purchase {
            return Err(PromoRejection::NewAccountsOnly);
        }
        Ok(())
    }

    /// Discount on `amount` for a discount code: `value` percent, capped by
    /// `max_discount` and by the amount itself.
    #[must_use]
    pub fn discount_for(&self, amount: i64) -> i64 {
        if self.kind != PromoKind::Discount || amount <= 0 {
            return 0;
        }
        let raw = amount.saturating_mul(self.value) / 100;
        let capped = self.max_discount.map_or(raw, |cap| raw.min(cap));
        capped.clamp(0, amount)
    }

    /// What a successful use would grant.
    #[must_use]
    pub fn benefits(&self) -> PromoBenefits {
        PromoBenefits {
            kind: self.kind,
            credits: self.kind.grants_credits().then_some(self.value),
            discount_percent: (self.kind == PromoKind::Discount).then_some(self.value),
            max_discount: self.max_discount,
        }
    }
}

/// Trim and upper-case a user-entered code.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Facts about the attempted use, supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoContext {
    /// Purchase amount, when applying to a purchase.
    #[serde(default)]
    pub purchase_amount: Option<i64>,
    /// Package being purchased.
    #[serde(default)]
    pub package_id: Option<String>,
    /// Whether the principal has purchased before.
    #[serde(default)]
    pub has_prior_purchase: bool,
}

/// The benefit a valid code confers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoBenefits {
    /// Code kind.
    pub kind: PromoKind,
    /// Credits granted on redemption.
    pub credits: Option<i64>,
    /// Percentage off a purchase.
    pub discount_percent: Option<i64>,
    /// Cap on the discount.
    pub max_discount: Option<i64>,
}

/// One successful redemption or purchase application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoUsage {
    /// Row identifier.
    pub id: PromoUsageId,
    /// The code used.
    pub promo_code: String,
    /// Who used it.
    pub principal: PrincipalId,
    /// 1-based ordinal of this use for the principal; unique per code and
    /// principal, so two racing uses cannot claim the same slot.
    pub slot: u32,
    /// Credits added, for credit and trial codes.
    pub credits_awarded: Option<i64>,
    /// Discount applied, for purchase usage.
    pub discount_applied: Option<i64>,
    /// External purchase reference.
    pub purchase_id: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Option<Metadata>,
    /// When the use was recorded.
    pub created_at: DateTime<Utc>,
}

/// Why a promo code cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PromoRejection {
    /// No such code.
    #[error("promo code not found")]
    NotFound,
    /// Switched off.
    #[error("promo code is no longer active")]
    Inactive,
    /// Validity window not yet open.
    #[error("promo code is not valid until {starts_at}")]
    NotStarted {
        /// Opening instant.
        starts_at: DateTime<Utc>,
    },
    /// Validity window closed.
    #[error("promo code expired at {expires_at}")]
    Expired {
        /// Closing instant.
        expires_at: DateTime<Utc>,
    },
    /// Global cap reached.
    #[error("promo code has reached its usage limit")]
    Exhausted,
    /// Per-principal cap reached.
    #[error("promo code already redeemed")]
    AlreadyRedeemed,
    /// Purchase too small.
    #[error("purchase must be at least {minimum}")]
    BelowMinimumPurchase {
        /// Required minimum.
        minimum: i64,
    },
    /// Package excluded.
    #[error("promo code does not apply to this package")]
    PackageNotEligible,
    /// Principal has purchased before.
    #[error("promo code is only for new accounts")]
    NewAccountsOnly,
    /// Code used through the wrong operation.
    #[error("promo code is a {actual} code, expected {expected}")]
    WrongKind {
        /// Kind the operation needs.
        expected: String,
        /// Kind of the code.
        actual: String,
    },
}

impl PromoRejection {
    /// Stable machine-readable reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::NotStarted { .. } => "not_started",
            Self::Expired { .. } => "expired",
            Self::Exhausted => "exhausted",
            Self::AlreadyRedeemed => "already_redeemed",
            Self::BelowMinimumPurchase { .. } => "below_minimum_purchase",
            Self::PackageNotEligible => "package_not_eligible",
            Self::NewAccountsOnly => "new_accounts_only",
            Self::WrongKind { .. } => "wrong_kind",
        }
    }
}
