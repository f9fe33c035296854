use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Subscription tier of an account. Governs every plan limit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Guest,
    Free,
    Paid,
}

impl PlanTier {
    /// All tiers, cheapest first.
    pub const ALL: [PlanTier; 3] = [Self::Guest, Self::Free, Self::Paid];

    /// Ordinal used to compare tiers ("free or higher").
    pub const fn level(&self) -> u8 {
        match self {
            Self::Guest => 0,
            Self::Free => 1,
            Self::Paid => 2,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Guest => "guest",
            Self::Free => "free",
            Self::Paid => "paid",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanTier {
    type Err = PlanTierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "guest" => Ok(Self::Guest),
            "free" => Ok(Self::Free),
            "paid" | "pro" => Ok(Self::Paid),
            _ => Err(PlanTierParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanTier`] string.
#[derive(Debug, Clone)]
pub struct PlanTierParseError(pub String);

impl fmt::Display for PlanTierParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan tier: {:?}", self.0)
    }
}

impl std::error::Error for PlanTierParseError {}

// ---------------------------------------------------------------------------

/// Whether a code's target is fixed at creation or editable afterwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QrType {
    #[default]
    Static,
    Dynamic,
}

impl fmt::Display for QrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        };
        f.write_str(s)
    }
}

impl FromStr for QrType {
    type Err = QrTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(QrTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`QrType`] string.
#[derive(Debug, Clone)]
pub struct QrTypeParseError(pub String);

impl fmt::Display for QrTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid QR type: {:?}", self.0)
    }
}

impl std::error::Error for QrTypeParseError {}

// ---------------------------------------------------------------------------

/// What the encoded content points at.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    #[default]
    Url,
    Document,
    SocialMedia,
    Menu,
    AppStore,
}

impl ContentCategory {
    /// Human-readable label, e.g. "social media".
    pub fn label(&self) -> String {
        self.to_string().replace('_', " ")
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Url => "url",
            Self::Document => "document",
            Self::SocialMedia => "social_media",
            Self::Menu => "menu",
            Self::AppStore => "app_store",
        };
        f.write_str(s)
    }
}

impl FromStr for ContentCategory {
    type Err = ContentCategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(Self::Url),
            "document" => Ok(Self::Document),
            "social_media" => Ok(Self::SocialMedia),
            "menu" => Ok(Self::Menu),
            "app_store" => Ok(Self::AppStore),
            other => Err(ContentCategoryParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ContentCategory`] string.
#[derive(Debug, Clone)]
pub struct ContentCategoryParseError(pub String);

impl fmt::Display for ContentCategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid content category: {:?}", self.0)
    }
}

impl std::error::Error for ContentCategoryParseError {}

// ---------------------------------------------------------------------------

/// QR error-correction level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text")]
pub enum EcLevel {
    L,
    #[default]
    M,
    Q,
    H,
}

impl fmt::Display for EcLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::L => "L",
            Self::M => "M",
            Self::Q => "Q",
            Self::H => "H",
        };
        f.write_str(s)
    }
}

impl FromStr for EcLevel {
    type Err = EcLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "L" => Ok(Self::L),
            "M" => Ok(Self::M),
            "Q" => Ok(Self::Q),
            "H" => Ok(Self::H),
            _ => Err(EcLevelParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EcLevel`] string.
#[derive(Debug, Clone)]
pub struct EcLevelParseError(pub String);

impl fmt::Display for EcLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error-correction level: {:?}", self.0)
    }
}

impl std::error::Error for EcLevelParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// An account profile as stored by the row store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub plan: PlanTier,
    pub storage_used_mb: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Saved QR code metadata. Dynamic codes carry a short code and short URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SavedQrCode {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    pub destination_url: String,
    pub short_code: Option<String>,
    pub short_url: Option<String>,
    pub qr_type: QrType,
    pub content_category: ContentCategory,
    pub scan_count: i64,
    pub fg_color: String,
    pub bg_color: String,
    pub ec_level: EcLevel,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tier_roundtrips_through_display() {
        for tier in PlanTier::ALL {
            assert_eq!(tier.to_string().parse::<PlanTier>().unwrap(), tier);
        }
    }

    #[test]
    fn plan_tier_parse_is_case_insensitive() {
        assert_eq!("PAID".parse::<PlanTier>().unwrap(), PlanTier::Paid);
        assert_eq!(" Free ".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert_eq!("pro".parse::<PlanTier>().unwrap(), PlanTier::Paid);
    }

    #[test]
    fn plan_tier_rejects_unknown() {
        let err = "enterprise".parse::<PlanTier>().unwrap_err();
        assert_eq!(err.to_string(), "invalid plan tier: \"enterprise\"");
    }

    #[test]
    fn plan_tier_levels_are_ordered() {
        assert!(PlanTier::Guest.level() < PlanTier::Free.level());
        assert!(PlanTier::Free.level() < PlanTier::Paid.level());
    }

    #[test]
    fn content_category_label_replaces_underscores() {
        assert_eq!(ContentCategory::SocialMedia.label(), "social media");
        assert_eq!(ContentCategory::AppStore.label(), "app store");
        assert_eq!(ContentCategory::Url.label(), "url");
    }

    #[test]
    fn content_category_serde_is_snake_case() {
        let json = serde_json::to_string(&ContentCategory::AppStore).unwrap();
        assert_eq!(json, "\"app_store\"");
        let back: ContentCategory = serde_json::from_str("\"social_media\"").unwrap();
        assert_eq!(back, ContentCategory::SocialMedia);
    }

    #[test]
    fn ec_level_defaults_to_medium() {
        assert_eq!(EcLevel::default(), EcLevel::M);
        assert_eq!("q".parse::<EcLevel>().unwrap(), EcLevel::Q);
        assert!("X".parse::<EcLevel>().is_err());
    }

    #[test]
    fn qr_type_parse() {
        assert_eq!("dynamic".parse::<QrType>().unwrap(), QrType::Dynamic);
        assert!("Dynamic".parse::<QrType>().is_err());
    }
}
