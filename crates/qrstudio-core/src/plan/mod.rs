//! Plan catalog: the single source of truth for what each tier may do.
//!
//! Every limit is a pure function of [`PlanTier`]; nothing else in the
//! workspace branches on the tier to derive a limit.

use std::fmt;

use serde::{Deserialize, Serialize};

use qrstudio_db::models::PlanTier;

/// A numeric quota that may be unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Finite(u32),
    Unbounded,
}

impl Limit {
    /// Whether one more unit fits when `used` are already taken.
    ///
    /// The upper bound is exclusive: `used == max` denies.
    pub const fn allows_another(&self, used: u32) -> bool {
        match self {
            Self::Finite(max) => used < *max,
            Self::Unbounded => true,
        }
    }

    /// The finite bound, if any.
    pub const fn finite(&self) -> Option<u32> {
        match self {
            Self::Finite(max) => Some(*max),
            Self::Unbounded => None,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(max) => write!(f, "{max}"),
            Self::Unbounded => f.write_str("unlimited"),
        }
    }
}

/// Limits granted by a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_dynamic_codes: Limit,
    pub max_storage_mb: Limit,
    pub can_customize_appearance: bool,
    pub can_track_analytics: bool,
}

const GUEST_LIMITS: PlanLimits = PlanLimits {
    max_dynamic_codes: Limit::Finite(0),
    max_storage_mb: Limit::Finite(0),
    can_customize_appearance: false,
    can_track_analytics: false,
};

const FREE_LIMITS: PlanLimits = PlanLimits {
    max_dynamic_codes: Limit::Finite(2),
    max_storage_mb: Limit::Finite(20),
    can_customize_appearance: false,
    can_track_analytics: true,
};

const PAID_LIMITS: PlanLimits = PlanLimits {
    max_dynamic_codes: Limit::Finite(20),
    max_storage_mb: Limit::Unbounded,
    can_customize_appearance: true,
    can_track_analytics: true,
};

/// Limits for a tier.
pub const fn limits_for(tier: PlanTier) -> PlanLimits {
    match tier {
        PlanTier::Guest => GUEST_LIMITS,
        PlanTier::Free => FREE_LIMITS,
        PlanTier::Paid => PAID_LIMITS,
    }
}

/// Limits for a tier given by name. Unknown names fail closed to guest.
pub fn limits_for_name(name: &str) -> PlanLimits {
    match name.parse::<PlanTier>() {
        Ok(tier) => limits_for(tier),
        Err(e) => {
            tracing::warn!(tier = name, error = %e, "unknown plan tier, using guest limits");
            GUEST_LIMITS
        }
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Named capabilities, used to phrase upgrade prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    StaticCodes,
    History,
    DynamicCodes,
    ScanAnalytics,
    Customization,
    FullAnalytics,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Self::StaticCodes,
        Self::History,
        Self::DynamicCodes,
        Self::ScanAnalytics,
        Self::Customization,
        Self::FullAnalytics,
    ];

    /// The cheapest tier that grants this feature.
    pub const fn min_tier(&self) -> PlanTier {
        match self {
            Self::StaticCodes | Self::History => PlanTier::Guest,
            Self::DynamicCodes | Self::ScanAnalytics => PlanTier::Free,
            Self::Customization | Self::FullAnalytics => PlanTier::Paid,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StaticCodes => "static_codes",
            Self::History => "history",
            Self::DynamicCodes => "dynamic_codes",
            Self::ScanAnalytics => "scan_analytics",
            Self::Customization => "customization",
            Self::FullAnalytics => "full_analytics",
        };
        f.write_str(s)
    }
}

/// Whether `tier` grants `feature`.
pub const fn has_feature(tier: PlanTier, feature: Feature) -> bool {
    tier.level() >= feature.min_tier().level()
}

/// Features granted by `tier`, in catalog order.
pub fn features(tier: PlanTier) -> Vec<Feature> {
    Feature::ALL
        .into_iter()
        .filter(|f| has_feature(tier, *f))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_matches_published_table() {
        let guest = limits_for(PlanTier::Guest);
        assert_eq!(guest.max_dynamic_codes, Limit::Finite(0));
        assert_eq!(guest.max_storage_mb, Limit::Finite(0));
        assert!(!guest.can_customize_appearance);
        assert!(!guest.can_track_analytics);

        let free = limits_for(PlanTier::Free);
        assert_eq!(free.max_dynamic_codes, Limit::Finite(2));
        assert_eq!(free.max_storage_mb, Limit::Finite(20));
        assert!(!free.can_customize_appearance);
        assert!(free.can_track_analytics);

        let paid = limits_for(PlanTier::Paid);
        assert_eq!(paid.max_dynamic_codes, Limit::Finite(20));
        assert_eq!(paid.max_storage_mb, Limit::Unbounded);
        assert!(paid.can_customize_appearance);
        assert!(paid.can_track_analytics);
    }

    #[test]
    fn unknown_tier_name_fails_closed() {
        assert_eq!(limits_for_name("platinum"), limits_for(PlanTier::Guest));
        assert_eq!(limits_for_name(""), limits_for(PlanTier::Guest));
        assert_eq!(limits_for_name("paid"), limits_for(PlanTier::Paid));
    }

    #[test]
    fn limit_upper_bound_is_exclusive() {
        let limit = Limit::Finite(2);
        assert!(limit.allows_another(1));
        assert!(!limit.allows_another(2));
        assert!(!limit.allows_another(3));
        assert!(Limit::Unbounded.allows_another(u32::MAX));
        assert!(!Limit::Finite(0).allows_another(0));
    }

    #[test]
    fn limit_display() {
        assert_eq!(Limit::Finite(20).to_string(), "20");
        assert_eq!(Limit::Unbounded.to_string(), "unlimited");
    }

    #[test]
    fn features_agree_with_limits() {
        for tier in PlanTier::ALL {
            let limits = limits_for(tier);
            assert_eq!(
                has_feature(tier, Feature::Customization),
                limits.can_customize_appearance,
                "customization mismatch for {tier}"
            );
            assert_eq!(
                has_feature(tier, Feature::ScanAnalytics),
                limits.can_track_analytics,
                "analytics mismatch for {tier}"
            );
            assert_eq!(
                has_feature(tier, Feature::DynamicCodes),
                limits.max_dynamic_codes.allows_another(0),
                "dynamic mismatch for {tier}"
            );
        }
    }

    #[test]
    fn guest_features_are_static_only() {
        assert_eq!(
            features(PlanTier::Guest),
            vec![Feature::StaticCodes, Feature::History]
        );
        assert_eq!(features(PlanTier::Paid).len(), Feature::ALL.len());
    }
}
