//! Generation requests and their appearance settings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use qrstudio_db::models::{ContentCategory, EcLevel, QrType};

/// Symbol sizes offered to users, in pixels.
pub const ALLOWED_SIZES: [u32; 4] = [128, 256, 512, 1024];

/// Default symbol size in pixels.
pub const DEFAULT_SIZE: u32 = 256;

/// Errors in appearance settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppearanceError {
    #[error("invalid color {0:?}: expected #rrggbb")]
    InvalidColor(String),

    #[error("unsupported size {0}px (allowed: 128, 256, 512, 1024)")]
    UnsupportedSize(u32),
}

/// An opaque RGB color written as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(pub [u8; 3]);

impl HexColor {
    pub const BLACK: HexColor = HexColor([0x00, 0x00, 0x00]);
    pub const WHITE: HexColor = HexColor([0xff, 0xff, 0xff]);

    pub const fn rgb(&self) -> [u8; 3] {
        self.0
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

impl FromStr for HexColor {
    type Err = AppearanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppearanceError::InvalidColor(s.to_owned());
        let hex = s.trim().strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for HexColor {
    type Error = AppearanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HexColor> for String {
    fn from(value: HexColor) -> Self {
        value.to_string()
    }
}

/// Visual settings of a generated symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    pub foreground: HexColor,
    pub background: HexColor,
    pub error_correction: EcLevel,
    pub size_px: u32,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            foreground: HexColor::BLACK,
            background: HexColor::WHITE,
            error_correction: EcLevel::M,
            size_px: DEFAULT_SIZE,
        }
    }
}

impl Appearance {
    /// Whether every field is at its default. Anything else counts as
    /// customization and is plan-gated.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), AppearanceError> {
        if !ALLOWED_SIZES.contains(&self.size_px) {
            return Err(AppearanceError::UnsupportedSize(self.size_px));
        }
        Ok(())
    }
}

/// A draft submitted for generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrCodeRequest {
    pub content: String,
    pub qr_type: QrType,
    pub content_category: ContentCategory,
    pub appearance: Appearance,
}

impl QrCodeRequest {
    /// A static URL request with default appearance.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            qr_type: QrType::Static,
            content_category: ContentCategory::Url,
            appearance: Appearance::default(),
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.qr_type = QrType::Dynamic;
        self
    }

    pub fn with_category(mut self, category: ContentCategory) -> Self {
        self.content_category = category;
        self
    }

    pub fn with_appearance(mut self, appearance: Appearance) -> Self {
        self.appearance = appearance;
        self
    }

    /// The content with surrounding whitespace removed, or `None` when
    /// nothing is left.
    pub fn trimmed_content(&self) -> Option<&str> {
        let trimmed = self.content.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}
