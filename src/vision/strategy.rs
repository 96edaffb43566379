//! Read strategies and escalation ladders
//!
//! A single OCR pass fails often enough on game art that every read goes
//! through a ladder: cheap strategies first, more aggressive ones only when
//! the earlier ones came back empty.

use image::RgbaImage;

use super::capture::{regions, Frame, PercentRect};
use super::ocr::{OcrOptions, TextRecognizer, AMOUNT_CHARS, LOOT_CHARS};
use super::parse::{self, ResourceCounts};
use super::preprocess::Preprocess;
use super::VisionError;

/// Outcome of one strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub counts: ResourceCounts,
    /// Raw OCR text, kept for the operator log
    pub raw: String,
    /// Strategy that produced it
    pub strategy: &'static str,
}

impl Reading {
    /// Ranking key: more amounts filled wins, then a larger sum
    pub fn score(&self) -> (u8, u64) {
        (self.counts.filled(), self.counts.total())
    }
}

/// A named way of reading resource amounts from a frame
pub trait ReadStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self, frame: &Frame, ocr: &dyn TextRecognizer) -> Result<Reading, VisionError>;
}

fn crop(frame: &Frame, area: PercentRect) -> Result<RgbaImage, VisionError> {
    frame.extract_percent(area).ok_or(VisionError::EmptyRegion)
}

/// OCR the whole area as a block and assign numbers by appearance
pub struct BlockRead {
    pub name: &'static str,
    pub area: PercentRect,
    pub preprocess: Preprocess,
}

impl ReadStrategy for BlockRead {
    fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self, frame: &Frame, ocr: &dyn TextRecognizer) -> Result<Reading, VisionError> {
        let prepared = self.preprocess.apply(&crop(frame, self.area)?);
        let raw = ocr.recognize(&prepared, &OcrOptions::block(Some(AMOUNT_CHARS)))?;
        Ok(Reading {
            counts: parse::parse_resources(&raw),
            raw,
            strategy: self.name,
        })
    }
}

/// Split the area into gold, elixir and dark elixir rows and take the
/// largest number of each row
pub struct BandedRead {
    pub name: &'static str,
    pub area: PercentRect,
    pub preprocess: Preprocess,
}

impl BandedRead {
    fn read_row(
        &self,
        frame: &Frame,
        band: PercentRect,
        ocr: &dyn TextRecognizer,
    ) -> Result<(u64, String), VisionError> {
        let prepared = self.preprocess.apply(&crop(frame, band)?);
        let mut text = ocr.recognize(&prepared, &OcrOptions::block(Some(LOOT_CHARS)))?;
        if text.trim().is_empty() {
            text = ocr.recognize(&prepared, &OcrOptions::line(None))?;
        }
        Ok((parse::largest_number(&text), text.trim().to_string()))
    }
}

impl ReadStrategy for BandedRead {
    fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self, frame: &Frame, ocr: &dyn TextRecognizer) -> Result<Reading, VisionError> {
        let mut values = [0u64; 3];
        let mut texts = Vec::with_capacity(3);
        for (slot, (from, to)) in regions::ROW_BANDS.iter().enumerate() {
            match self.read_row(frame, self.area.band(*from, *to), ocr) {
                Ok((value, text)) => {
                    values[slot] = value;
                    texts.push(text);
                }
                Err(e @ VisionError::EngineUnavailable(_)) => return Err(e),
                Err(e) => {
                    log::debug!("{}: row {} unreadable: {}", self.name, slot, e);
                    texts.push(String::new());
                }
            }
        }
        Ok(Reading {
            counts: ResourceCounts::new(values[0], values[1], values[2]),
            raw: texts.join(" | "),
            strategy: self.name,
        })
    }
}

/// Adaptive threshold on the whole area, top three numbers by size
pub struct AdaptiveRead {
    pub name: &'static str,
    pub area: PercentRect,
}

impl ReadStrategy for AdaptiveRead {
    fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self, frame: &Frame, ocr: &dyn TextRecognizer) -> Result<Reading, VisionError> {
        let prepared = Preprocess::ADAPTIVE.apply(&crop(frame, self.area)?);
        let raw = ocr.recognize(&prepared, &OcrOptions::block(None))?;
        Ok(Reading {
            counts: parse::top_three(&raw),
            raw,
            strategy: self.name,
        })
    }
}

/// Ordered strategies with an early-exit condition
pub struct Ladder {
    steps: Vec<Box<dyn ReadStrategy>>,
    settled: fn(&ResourceCounts) -> bool,
}

impl Ladder {
    pub fn new(settled: fn(&ResourceCounts) -> bool) -> Self {
        Self {
            steps: Vec::new(),
            settled,
        }
    }

    pub fn then(mut self, step: impl ReadStrategy + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run strategies until one settles; return the best reading seen.
    ///
    /// An unavailable engine aborts the ladder. Any other failure only
    /// skips that strategy.
    pub fn run(&self, frame: &Frame, ocr: &dyn TextRecognizer) -> Result<Reading, VisionError> {
        let mut best: Option<Reading> = None;
        for step in &self.steps {
            let reading = match step.read(frame, ocr) {
                Ok(reading) => reading,
                Err(e @ VisionError::EngineUnavailable(_)) => return Err(e),
                Err(e) => {
                    log::debug!("{} skipped: {}", step.name(), e);
                    continue;
                }
            };
            log::debug!("{} -> {:?}", step.name(), reading.counts);

            let settled = (self.settled)(&reading.counts);
            if best.as_ref().map_or(true, |b| reading.score() > b.score()) {
                best = Some(reading);
            }
            if settled {
                break;
            }
        }
        Ok(best.unwrap_or_default())
    }
}

/// Loot block ladder rooted at `area`: Otsu, inverted Otsu, row bands both
/// polarities, then adaptive threshold
pub fn resource_ladder(area: PercentRect) -> Ladder {
    Ladder::new(|counts| !counts.is_zero())
        .then(BlockRead {
            name: "block",
            area,
            preprocess: Preprocess::RESOURCES,
        })
        .then(BlockRead {
            name: "block-inverted",
            area,
            preprocess: Preprocess::RESOURCES.inverted(),
        })
        .then(BandedRead {
            name: "rows",
            area,
            preprocess: Preprocess::RESOURCES,
        })
        .then(BandedRead {
            name: "rows-inverted",
            area,
            preprocess: Preprocess::RESOURCES.inverted(),
        })
        .then(AdaptiveRead {
            name: "adaptive",
            area,
        })
}

/// Sum of a victory panel that is clearly a real read
pub const LOOT_SETTLED_TOTAL: u64 = 5_000;

/// Victory panel ladder: every preset in both polarities, then adaptive on the widest
pub fn loot_ladder() -> Ladder {
    const NAMES: [[&str; 2]; 3] = [
        ["loot-tight", "loot-tight-inverted"],
        ["loot-medium", "loot-medium-inverted"],
        ["loot-wide", "loot-wide-inverted"],
    ];

    let mut ladder = Ladder::new(|counts| counts.total() >= LOOT_SETTLED_TOTAL);
    for (area, [plain, inverted]) in regions::LOOT_PRESETS.iter().zip(NAMES) {
        ladder = ladder
            .then(BandedRead {
                name: plain,
                area: *area,
                preprocess: Preprocess::LOOT_ROW,
            })
            .then(BandedRead {
                name: inverted,
                area: *area,
                preprocess: Preprocess::LOOT_ROW.inverted(),
            });
    }
    ladder.then(AdaptiveRead {
        name: "loot-adaptive",
        area: regions::LOOT_PRESETS[2],
    })
}
