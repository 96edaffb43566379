//! Matchmaking: scout bases until one is worth attacking

use std::time::Duration;

use tokio::time::Instant;

use super::context::RunContext;
use super::ControlError;
use crate::android::InputGenerator;
use crate::config::{LootThresholds, RunConfig};
use crate::game::Phase;
use crate::gateway::protocol::{Event, OcrPayload};
use crate::vision::{Reading, ResourceCounts};

/// Wait before re-reading a base that came back empty
const REREAD_DELAY: Duration = Duration::from_millis(800);

/// Raw OCR text shown to the operator is cut to this many characters
const RAW_PREVIEW_CHARS: usize = 120;

/// Decision on one scouted base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Loot meets every threshold
    Accept,
    /// Nothing could be read; attack anyway rather than skip blindly forever
    AcceptUnread,
    Reject,
}

/// Compare a reading with the thresholds
pub fn judge(counts: &ResourceCounts, thresholds: &LootThresholds) -> Verdict {
    if counts.main_missing() {
        return Verdict::AcceptUnread;
    }
    if counts.gold >= thresholds.min_gold
        && counts.elixir >= thresholds.min_elixir
        && counts.dark_elixir >= thresholds.min_dark_elixir
    {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}

/// How the search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A base met the thresholds
    Accepted { counts: ResourceCounts, attempts: u32 },
    /// The base could not be read and was taken as-is
    AcceptedUnread { attempts: u32 },
    /// The time budget ran out; the base on screen is attacked
    Forced { attempts: u32 },
    /// The attempt budget ran out; the cycle is abandoned
    Exhausted { attempts: u32 },
}

impl SearchOutcome {
    /// Whether the cycle proceeds to the attack
    pub fn attacks(&self) -> bool {
        !matches!(self, SearchOutcome::Exhausted { .. })
    }
}

/// Navigate to matchmaking from the home village
pub async fn open_matchmaking(ctx: &RunContext) -> Result<(), ControlError> {
    ctx.set_phase(Phase::SearchVillage);
    let config = ctx.snapshot();
    ctx.report.info("Opening matchmaking");
    let actions = InputGenerator::new(&config.coords).to_matchmaking(
        config.delays.after_attack_menu,
        config.delays.after_find_match,
    );
    ctx.execute(&actions).await
}

/// Scout bases until one is accepted or a budget runs out
pub async fn find_target(ctx: &RunContext) -> Result<SearchOutcome, ControlError> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        ctx.checkpoint().await?;
        let config = ctx.snapshot();

        if attempts >= config.search.max_searches {
            ctx.report.warning(format!(
                "No suitable base after {} searches, giving up on this cycle",
                attempts
            ));
            return Ok(SearchOutcome::Exhausted { attempts });
        }
        if attempts > 0 && started.elapsed() >= config.search.force_attack_after {
            ctx.report.warning(format!(
                "Search took {}s, attacking the current base",
                started.elapsed().as_secs()
            ));
            return Ok(SearchOutcome::Forced { attempts });
        }

        attempts += 1;
        ctx.set_phase(Phase::AnalyzeVillage);
        ctx.sleep(config.delays.before_ocr).await?;

        let reading = read_base(ctx).await?;
        ctx.stats.update(|stats| stats.record_search());
        ctx.report.emit(Event::OcrResult(OcrPayload {
            attempt: attempts,
            counts: reading.counts,
            raw: reading.raw.clone(),
        }));
        ctx.report.info(format!(
            "Base #{}: gold {} | elixir {} | dark elixir {}",
            attempts, reading.counts.gold, reading.counts.elixir, reading.counts.dark_elixir
        ));

        ctx.set_phase(Phase::CheckCriteria);
        match judge(&reading.counts, &config.thresholds) {
            Verdict::Accept => {
                ctx.report.success("Base meets the loot thresholds");
                return Ok(SearchOutcome::Accepted {
                    counts: reading.counts,
                    attempts,
                });
            }
            Verdict::AcceptUnread => {
                ctx.report
                    .warning("Loot unreadable, attacking this base anyway");
                return Ok(SearchOutcome::AcceptedUnread { attempts });
            }
            Verdict::Reject => {
                ctx.report.info("Below thresholds, next base");
                ctx.set_phase(Phase::SearchVillage);
                let actions = InputGenerator::new(&config.coords)
                    .next_village(config.delays.after_next_village);
                ctx.execute(&actions).await?;
            }
        }
    }
}

/// Leave matchmaking after an exhausted search
pub async fn abandon(ctx: &RunContext, config: &RunConfig) -> Result<(), ControlError> {
    ctx.set_phase(Phase::SearchVillage);
    ctx.execute(&InputGenerator::new(&config.coords).abandon_search())
        .await
}

/// Read the scouted base: primary crop, a re-read, then the wide crop
async fn read_base(ctx: &RunContext) -> Result<Reading, ControlError> {
    let mut reading = read_once(ctx, false).await?;
    if reading.counts.main_missing() {
        ctx.sleep(REREAD_DELAY).await?;
        reading = read_once(ctx, false).await?;
    }
    if reading.counts.main_missing() {
        reading = read_once(ctx, true).await?;
    }
    if reading.counts.main_missing() {
        let preview: String = reading
            .raw
            .chars()
            .take(RAW_PREVIEW_CHARS)
            .collect::<String>()
            .replace('\n', " ");
        ctx.report
            .warning(format!("OCR found no loot. Raw text: '{}'", preview.trim()));
    }
    Ok(reading)
}

async fn read_once(ctx: &RunContext, wide: bool) -> Result<Reading, ControlError> {
    let Some(frame) = ctx.capture().await else {
        return Ok(Reading::default());
    };
    let vision = ctx.vision.clone();
    let reading = ctx
        .blocking(move || {
            if wide {
                vision.read_resources_wide(&frame)
            } else {
                vision.read_resources(&frame)
            }
        })
        .await??;
    Ok(reading)
}
