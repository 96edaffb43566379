//! Screenshot decoding and region extraction

use std::path::{Path, PathBuf};

use image::{GrayImage, RgbaImage};

use super::VisionError;
use crate::android::Point;

/// A decoded device screenshot
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
}

impl Frame {
    /// Decode PNG (or any format `image` recognizes) bytes from `screencap -p`
    pub fn decode(bytes: &[u8]) -> Result<Self, VisionError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| VisionError::Decode(e.to_string()))?
            .to_rgba8();
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::EmptyRegion);
        }
        Ok(Self { image })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Frame dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Extract a pixel region, clamped to the frame. `None` if nothing is left.
    pub fn extract_region(&self, region: PixelRegion) -> Option<RgbaImage> {
        let (width, height) = self.dimensions();
        let x = region.x.min(width);
        let y = region.y.min(height);
        let w = region.width.min(width - x);
        let h = region.height.min(height - y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(image::imageops::crop_imm(&self.image, x, y, w, h).to_image())
    }

    /// Extract a region given in screen fractions
    pub fn extract_percent(&self, rect: PercentRect) -> Option<RgbaImage> {
        let (width, height) = self.dimensions();
        self.extract_region(rect.to_pixels(width, height))
    }

    /// Write the frame as PNG
    pub fn save(&self, path: &Path) -> Result<(), VisionError> {
        self.image
            .save(path)
            .map_err(|e| VisionError::Decode(e.to_string()))
    }
}

/// Rectangle in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Rectangle in fractions of the screen, as left/top/right/bottom edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl PercentRect {
    pub const fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A `width` x `height` rectangle centered on `center`
    pub fn centered(center: Point, width: f64, height: f64) -> Self {
        Self::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            center.x + width / 2.0,
            center.y + height / 2.0,
        )
    }

    /// Horizontal band of this rectangle, `from`/`to` relative to its height
    pub fn band(&self, from: f64, to: f64) -> Self {
        let h = self.bottom - self.top;
        Self::new(self.left, self.top + h * from, self.right, self.top + h * to)
    }

    /// Pixel rectangle on a `width` x `height` screen; edges are clamped to the screen
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRegion {
        let edge = |fraction: f64, extent: u32| -> u32 {
            (fraction.clamp(0.0, 1.0) * extent as f64).round() as u32
        };
        let (x0, x1) = (edge(self.left, width), edge(self.right, width));
        let (y0, y1) = (edge(self.top, height), edge(self.bottom, height));
        PixelRegion {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }
}

/// Where the game draws the numbers we read
pub mod regions {
    use super::PercentRect;

    /// "Available loot" block in the top left of a scouted base
    pub const RESOURCES: PercentRect = PercentRect::new(0.00, 0.02, 0.52, 0.38);

    /// Wider crop around the loot block, for layouts that shift it
    pub const RESOURCES_WIDE: PercentRect = PercentRect::new(0.00, 0.00, 0.62, 0.45);

    /// Victory panel loot area, tightest first
    pub const LOOT_PRESETS: [PercentRect; 3] = [
        PercentRect::new(0.34, 0.40, 0.64, 0.74),
        PercentRect::new(0.28, 0.36, 0.72, 0.80),
        PercentRect::new(0.18, 0.28, 0.84, 0.88),
    ];

    /// Gold, elixir and dark elixir rows, relative to a loot or resource area
    pub const ROW_BANDS: [(f64, f64); 3] = [(0.06, 0.36), (0.36, 0.66), (0.66, 0.96)];
}

/// Write a frame and the processed crops next to it for offline inspection.
/// Returns the path of the full frame.
pub fn save_debug_images(
    dir: &Path,
    label: &str,
    frame: &Frame,
    crops: &[(String, GrayImage)],
) -> Result<PathBuf, VisionError> {
    std::fs::create_dir_all(dir).map_err(|e| VisionError::Decode(e.to_string()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

    let full = dir.join(format!("{label}_{stamp}.png"));
    frame.save(&full)?;
    for (name, crop) in crops {
        let path = dir.join(format!("{label}_{stamp}_{name}.png"));
        crop.save(&path)
            .map_err(|e| VisionError::Decode(e.to_string()))?;
    }
    Ok(full)
}
