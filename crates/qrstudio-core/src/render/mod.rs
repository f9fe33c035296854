//! Rendering collaborator: turns validated content into a module matrix
//! and exports it as PNG or SVG.

use std::fmt::Write as _;
use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use qrstudio_db::models::EcLevel;

use crate::request::Appearance;

/// Light modules drawn around the symbol on every side.
pub const QUIET_ZONE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer {0} is not ready")]
    NotReady(String),

    #[error("content cannot be encoded as a QR code: {0}")]
    Encode(String),

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `encode` can be called. The workflow refuses to start
    /// while this is false.
    fn is_ready(&self) -> bool;

    fn encode(&self, content: &str, appearance: &Appearance) -> Result<Surface, RenderError>;
}

/// An encoded symbol plus the appearance to draw it with.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    payload: String,
    appearance: Appearance,
    width: usize,
    modules: Vec<bool>,
}

impl Surface {
    /// Build a surface from a row-major matrix of `width * width` modules
    /// where `true` is dark.
    pub fn new(
        payload: impl Into<String>,
        appearance: Appearance,
        width: usize,
        modules: Vec<bool>,
    ) -> Result<Self, RenderError> {
        if width == 0 || modules.len() != width * width {
            return Err(RenderError::Encode(format!(
                "module matrix of {} cells does not match width {width}",
                modules.len()
            )));
        }
        Ok(Self {
            payload: payload.into(),
            appearance,
            width,
            modules,
        })
    }

    /// The exact text encoded in the symbol.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn appearance(&self) -> &Appearance {
        &self.appearance
    }

    /// Symbol width in modules, without the quiet zone.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.width && self.modules[y * self.width + x]
    }

    fn total_width(&self) -> usize {
        self.width + 2 * QUIET_ZONE
    }

    fn is_dark_padded(&self, x: usize, y: usize) -> bool {
        x >= QUIET_ZONE
            && y >= QUIET_ZONE
            && self.is_dark(x - QUIET_ZONE, y - QUIET_ZONE)
    }

    /// Rasterize at `size_px` square, nearest-neighbour sampled, as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, RenderError> {
        let size = self.appearance.size_px.max(1);
        let total = self.total_width();
        let fg = Rgb(self.appearance.foreground.rgb());
        let bg = Rgb(self.appearance.background.rgb());

        let img = RgbImage::from_fn(size, size, |px, py| {
            let x = px as usize * total / size as usize;
            let y = py as usize * total / size as usize;
            if self.is_dark_padded(x, y) { fg } else { bg }
        });

        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// Vector export. One unit per module; the document is scaled to
    /// `size_px`.
    pub fn to_svg(&self) -> String {
        let total = self.total_width();
        let size = self.appearance.size_px;
        let mut path = String::new();
        for y in 0..self.width {
            for x in 0..self.width {
                if self.is_dark(x, y) {
                    let _ = write!(path, "M{},{}h1v1h-1z", x + QUIET_ZONE, y + QUIET_ZONE);
                }
            }
        }

        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<svg xmlns=\"http://www.w3.org/2000/svg\" version=\"1.1\" ",
                "width=\"{size}\" height=\"{size}\" viewBox=\"0 0 {total} {total}\" ",
                "shape-rendering=\"crispEdges\">\n",
                "<rect width=\"{total}\" height=\"{total}\" fill=\"{bg}\"/>\n",
                "<path fill=\"{fg}\" d=\"{path}\"/>\n",
                "</svg>\n"
            ),
            size = size,
            total = total,
            bg = self.appearance.background,
            fg = self.appearance.foreground,
            path = path,
        )
    }
}

// ---------------------------------------------------------------------------
// qrcode-backed renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct QrCodeRenderer;

impl QrCodeRenderer {
    pub fn new() -> Self {
        Self
    }
}

fn ec_level(level: EcLevel) -> qrcode::EcLevel {
    match level {
        EcLevel::L => qrcode::EcLevel::L,
        EcLevel::M => qrcode::EcLevel::M,
        EcLevel::Q => qrcode::EcLevel::Q,
        EcLevel::H => qrcode::EcLevel::H,
    }
}

impl Renderer for QrCodeRenderer {
    fn name(&self) -> &str {
        "qrcode"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn encode(&self, content: &str, appearance: &Appearance) -> Result<Surface, RenderError> {
        let code = qrcode::QrCode::with_error_correction_level(
            content.as_bytes(),
            ec_level(appearance.error_correction),
        )
        .map_err(|e| RenderError::Encode(e.to_string()))?;

        let modules = code
            .to_colors()
            .into_iter()
            .map(|c| c == qrcode::Color::Dark)
            .collect();
        Surface::new(content, *appearance, code.width(), modules)
    }
}
