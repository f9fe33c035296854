//! Authorization evaluator: pure allow/deny decisions over an account and
//! its plan limits.
//!
//! Nothing here mutates a counter. A denial is reported either as a
//! boolean, as a user-facing message, or as a typed [`AuthzError`].

use qrstudio_db::models::{PlanTier, QrType};

use crate::plan::{Feature, PlanLimits};
use crate::request::QrCodeRequest;
use crate::session::{Session, UserAccount};

/// Reasons a request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error(
        "dynamic QR codes require the {tier} plan or higher; sign in to create one",
        tier = Feature::DynamicCodes.min_tier()
    )]
    DynamicRequiresAccount,

    #[error("you have reached your limit of {limit} dynamic QR codes on the {plan} plan; please upgrade")]
    DynamicQuotaReached { limit: u32, plan: PlanTier },

    #[error(
        "custom colors, sizes and error correction require the {tier} plan",
        tier = Feature::Customization.min_tier()
    )]
    CustomizationLocked,
}

/// Whether `account` may create another dynamic code.
///
/// Guests never may. Free accounts may while their count is strictly below
/// the plan maximum. Paid accounts are not counted.
pub fn can_create_dynamic(account: &UserAccount, limits: &PlanLimits) -> bool {
    require_dynamic(account, limits).is_ok()
}

/// Whether the plan allows non-default appearance settings.
pub fn can_customize(limits: &PlanLimits) -> bool {
    limits.can_customize_appearance
}

/// A user-facing explanation of why a dynamic code is refused, or `None`
/// when one is allowed.
pub fn dynamic_quota_message(account: &UserAccount, limits: &PlanLimits) -> Option<String> {
    require_dynamic(account, limits).err().map(|e| e.to_string())
}

/// Typed form of [`can_create_dynamic`].
pub fn require_dynamic(account: &UserAccount, limits: &PlanLimits) -> Result<(), AuthzError> {
    match account.plan {
        PlanTier::Guest => Err(AuthzError::DynamicRequiresAccount),
        PlanTier::Free => {
            if limits
                .max_dynamic_codes
                .allows_another(account.dynamic_code_count)
            {
                Ok(())
            } else {
                Err(AuthzError::DynamicQuotaReached {
                    limit: limits.max_dynamic_codes.finite().unwrap_or(0),
                    plan: account.plan,
                })
            }
        }
        PlanTier::Paid => Ok(()),
    }
}

/// Check every plan-gated aspect of a request against a session.
///
/// Dynamic requests need dynamic quota; non-default appearance needs the
/// customization feature.
pub fn check_request(session: &Session, request: &QrCodeRequest) -> Result<(), AuthzError> {
    if request.qr_type == QrType::Dynamic {
        require_dynamic(session.account(), session.limits())?;
    }
    if !request.appearance.is_default() && !can_customize(session.limits()) {
        return Err(AuthzError::CustomizationLocked);
    }
    Ok(())
}
