//! Vision module
//!
//! Turns device screenshots into resource counts: the loot of a scouted
//! base, the loot won on the victory panel and the remaining troops of an
//! attack bar slot.

pub mod capture;
pub mod ocr;
pub mod parse;
pub mod preprocess;
pub mod strategy;

use std::path::Path;
use std::sync::Arc;

use crate::android::Point;
use crate::config::TroopOcrGeometry;

pub use capture::{Frame, PercentRect, PixelRegion};
pub use ocr::{OcrOptions, Tesseract, TextRecognizer};
pub use parse::ResourceCounts;
pub use strategy::{Ladder, Reading};

use capture::regions;
use preprocess::Preprocess;

/// Errors from the vision pipeline
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// The OCR engine cannot run; no amount of retrying will help
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("Could not decode image: {0}")]
    Decode(String),
    #[error("Region is empty")]
    EmptyRegion,
}

impl VisionError {
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, VisionError::EngineUnavailable(_))
    }
}

/// Coordinates all reads against one OCR engine
pub struct VisionReader {
    ocr: Arc<dyn TextRecognizer>,
    resources: Ladder,
    resources_wide: Ladder,
    loot: Ladder,
}

impl VisionReader {
    pub fn new(ocr: Arc<dyn TextRecognizer>) -> Self {
        Self {
            ocr,
            resources: strategy::resource_ladder(regions::RESOURCES),
            resources_wide: strategy::resource_ladder(regions::RESOURCES_WIDE),
            loot: strategy::loot_ladder(),
        }
    }

    /// Fail fast when the engine is missing
    pub fn probe(&self) -> Result<(), VisionError> {
        self.ocr.probe()
    }

    /// Available loot of a scouted base
    pub fn read_resources(&self, frame: &Frame) -> Result<Reading, VisionError> {
        self.probe()?;
        self.resources.run(frame, self.ocr.as_ref())
    }

    /// Same as [`VisionReader::read_resources`] on a wider crop
    pub fn read_resources_wide(&self, frame: &Frame) -> Result<Reading, VisionError> {
        self.probe()?;
        self.resources_wide.run(frame, self.ocr.as_ref())
    }

    /// Loot shown on the victory panel
    pub fn read_victory_loot(&self, frame: &Frame) -> Result<Reading, VisionError> {
        self.probe()?;
        self.loot.run(frame, self.ocr.as_ref())
    }

    /// Remaining units on a troop slot; 0 when the badge is unreadable
    pub fn read_troop_count(
        &self,
        frame: &Frame,
        slot: Point,
        geometry: &TroopOcrGeometry,
    ) -> Result<u32, VisionError> {
        self.probe()?;
        let center = slot.offset(geometry.offset_x, geometry.offset_y);
        let area = PercentRect::centered(center, geometry.crop_w, geometry.crop_h);
        let Some(badge) = frame.extract_percent(area) else {
            return Ok(0);
        };
        let prepared = Preprocess::TROOP_BADGE.apply(&badge);
        let text = self.ocr.recognize(&prepared, &OcrOptions::line(Some(ocr::DIGITS)))?;
        Ok(parse::parse_troop_count(&text))
    }

    /// Save the victory frame and the loot crops for offline inspection
    pub fn save_loot_debug(&self, frame: &Frame, dir: &Path) -> Result<std::path::PathBuf, VisionError> {
        let crops: Vec<_> = regions::LOOT_PRESETS
            .iter()
            .enumerate()
            .filter_map(|(i, area)| {
                let crop = frame.extract_percent(*area)?;
                Some((format!("roi{}", i + 1), Preprocess::LOOT_ROW.apply(&crop)))
            })
            .collect();
        capture::save_debug_images(dir, "victory", frame, &crops)
    }
}
