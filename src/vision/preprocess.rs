//! Image preparation before OCR
//!
//! Game digits are drawn with outlines and gradients; Tesseract reads them
//! much better after upscaling, a light blur and binarization.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use imageproc::contrast::{adaptive_threshold, otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;

/// How the grayscale image is reduced to black and white
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binarize {
    /// Global Otsu threshold
    Otsu,
    /// Otsu with inverted output, for light text on dark backgrounds
    OtsuInverted,
    /// Local mean threshold over a `2r+1` square block
    Adaptive { block_radius: u32 },
}

/// A preprocessing recipe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocess {
    /// Upscale factor applied before blurring
    pub scale: f32,
    /// Gaussian sigma; zero disables the blur
    pub blur_sigma: f32,
    pub binarize: Binarize,
}

impl Preprocess {
    /// Scouted-base loot block
    pub const RESOURCES: Preprocess = Preprocess {
        scale: 2.0,
        blur_sigma: 0.8,
        binarize: Binarize::Otsu,
    };

    /// A single row of the victory panel
    pub const LOOT_ROW: Preprocess = Preprocess {
        scale: 2.5,
        blur_sigma: 0.8,
        binarize: Binarize::Otsu,
    };

    /// Remaining-troop badge on the attack bar
    pub const TROOP_BADGE: Preprocess = Preprocess {
        scale: 2.0,
        blur_sigma: 0.0,
        binarize: Binarize::Otsu,
    };

    /// Last resort for uneven lighting; a 31px block
    pub const ADAPTIVE: Preprocess = Preprocess {
        scale: 2.0,
        blur_sigma: 0.8,
        binarize: Binarize::Adaptive { block_radius: 15 },
    };

    pub fn with_binarize(mut self, binarize: Binarize) -> Self {
        self.binarize = binarize;
        self
    }

    /// Inverted variant of an Otsu recipe
    pub fn inverted(self) -> Self {
        match self.binarize {
            Binarize::Otsu => self.with_binarize(Binarize::OtsuInverted),
            Binarize::OtsuInverted => self.with_binarize(Binarize::Otsu),
            Binarize::Adaptive { .. } => self,
        }
    }

    /// Run the recipe on a color crop
    pub fn apply(&self, region: &RgbaImage) -> GrayImage {
        let gray = imageops::grayscale(region);
        let (width, height) = gray.dimensions();

        let scaled = if (self.scale - 1.0).abs() > f32::EPSILON {
            let w = ((width as f32 * self.scale).round() as u32).max(1);
            let h = ((height as f32 * self.scale).round() as u32).max(1);
            imageops::resize(&gray, w, h, FilterType::CatmullRom)
        } else {
            gray
        };

        let smoothed = if self.blur_sigma > 0.0 {
            gaussian_blur_f32(&scaled, self.blur_sigma)
        } else {
            scaled
        };

        match self.binarize {
            Binarize::Otsu => {
                let level = otsu_level(&smoothed);
                threshold(&smoothed, level, ThresholdType::Binary)
            }
            Binarize::OtsuInverted => {
                let level = otsu_level(&smoothed);
                threshold(&smoothed, level, ThresholdType::BinaryInverted)
            }
            Binarize::Adaptive { block_radius } => adaptive_threshold(&smoothed, block_radius),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Dark left half, bright right half
    fn split_image() -> RgbaImage {
        RgbaImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgba([20, 20, 20, 255])
            } else {
                Rgba([230, 230, 230, 255])
            }
        })
    }

    #[test]
    fn test_output_is_upscaled() {
        let out = Preprocess::RESOURCES.apply(&split_image());
        assert_eq!(out.dimensions(), (40, 20));

        let out = Preprocess::LOOT_ROW.apply(&split_image());
        assert_eq!(out.dimensions(), (50, 25));
    }

    #[test]
    fn test_output_is_binary() {
        let out = Preprocess::RESOURCES.apply(&split_image());
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_otsu_separates_halves() {
        let out = Preprocess::TROOP_BADGE.apply(&split_image());
        assert_eq!(out.get_pixel(0, 5)[0], 0);
        assert_eq!(out.get_pixel(39, 5)[0], 255);

        let inverted = Preprocess::TROOP_BADGE.inverted().apply(&split_image());
        assert_eq!(inverted.get_pixel(0, 5)[0], 255);
        assert_eq!(inverted.get_pixel(39, 5)[0], 0);
    }

    #[test]
    fn test_adaptive_is_not_inverted() {
        assert_eq!(Preprocess::ADAPTIVE.inverted(), Preprocess::ADAPTIVE);
        let out = Preprocess::ADAPTIVE.apply(&split_image());
        assert_eq!(out.dimensions(), (40, 20));
    }
}
