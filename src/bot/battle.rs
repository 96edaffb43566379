//! Battle aftermath: waiting, surrendering, reading the victory panel and
//! going home

use std::time::Duration;

use super::context::RunContext;
use super::ControlError;
use crate::android::InputGenerator;
use crate::game::Phase;
use crate::vision::{Reading, ResourceCounts};

/// Progress is logged at this interval while the battle runs
const WAIT_STEP: Duration = Duration::from_secs(5);

/// Between victory panel read attempts
const LOOT_RETRY_DELAY: Duration = Duration::from_millis(400);

/// Let the battle play out, logging progress
pub async fn wait_for_battle(ctx: &RunContext) -> Result<(), ControlError> {
    ctx.set_phase(Phase::WaitAttack);
    let total = ctx.snapshot().deploy.wait_attack;
    let steps = total.as_millis().div_ceil(WAIT_STEP.as_millis()).max(1) as u32;
    ctx.report
        .info(format!("Battle running, waiting {}s", total.as_secs()));

    let mut waited = Duration::ZERO;
    for _ in 0..steps {
        ctx.checkpoint().await?;
        let step = WAIT_STEP.min(total.saturating_sub(waited));
        ctx.sleep(step).await?;
        waited += step;
        ctx.report.info(format!(
            "Battle in progress, {}s/{}s",
            waited.as_secs(),
            total.as_secs()
        ));
    }
    Ok(())
}

/// Surrender, then read the loot from the victory panel.
///
/// The attack is counted even when the panel cannot be read; the loot is
/// then zero.
pub async fn end_battle(ctx: &RunContext) -> Result<ResourceCounts, ControlError> {
    ctx.checkpoint().await?;
    ctx.set_phase(Phase::EndAttack);
    let config = ctx.snapshot();

    ctx.report.info("Ending the battle");
    ctx.execute(&InputGenerator::new(&config.coords).end_battle())
        .await?;
    ctx.sleep(config.delays.victory_screen).await?;

    let attempts = config.victory.ocr_retries.clamp(1, 6);
    let mut best = Reading::default();
    let mut last_frame = None;
    for attempt in 1..=attempts {
        if let Some(frame) = ctx.capture().await {
            let vision = ctx.vision.clone();
            let copy = frame.clone();
            let reading = ctx
                .blocking(move || vision.read_victory_loot(&copy))
                .await??;
            if reading.score() > best.score() {
                best = reading;
            }
            last_frame = Some(frame);
        }
        if !best.counts.is_zero() {
            break;
        }
        log::debug!("Victory panel unreadable, attempt {}/{}", attempt, attempts);
        if attempt < attempts {
            ctx.sleep(LOOT_RETRY_DELAY).await?;
        }
    }

    if best.counts.is_zero() || config.victory.debug_capture {
        if let Some(frame) = last_frame {
            save_debug(ctx, frame).await;
        }
    }

    ctx.report
        .info(format!("Victory panel OCR text ({}): {:?}", best.strategy, best.raw));
    if best.counts.is_zero() {
        ctx.report
            .warning("Could not read the victory panel, counting no loot");
    } else {
        ctx.report.success(format!(
            "Loot: gold {} | elixir {} | dark elixir {}",
            best.counts.gold, best.counts.elixir, best.counts.dark_elixir
        ));
    }
    Ok(best.counts)
}

async fn save_debug(ctx: &RunContext, frame: crate::vision::Frame) {
    let vision = ctx.vision.clone();
    let dir = ctx.debug_dir.clone();
    match ctx
        .blocking(move || vision.save_loot_debug(&frame, &dir))
        .await
    {
        Ok(Ok(path)) => ctx
            .report
            .info(format!("Victory panel saved to {}", path.display())),
        Ok(Err(e)) => log::warn!("Could not save victory debug images: {}", e),
        Err(e) => log::warn!("Could not save victory debug images: {}", e),
    }
}

/// Return to the village and record the attack
pub async fn return_home(ctx: &RunContext, loot: ResourceCounts) -> Result<(), ControlError> {
    ctx.set_phase(Phase::ReturnHome);
    let config = ctx.snapshot();
    ctx.execute(&InputGenerator::new(&config.coords).return_home())
        .await?;

    let stats = ctx.stats.update(|stats| stats.record_attack(&loot));
    ctx.report.success(format!(
        "Attack #{} done: +{} gold, +{} elixir, +{} dark elixir",
        stats.attacks_completed, loot.gold, loot.elixir, loot.dark_elixir
    ));
    ctx.report.stats(stats);
    Ok(())
}

/// Spend loot on one wall segment
pub async fn upgrade_wall(ctx: &RunContext) -> Result<(), ControlError> {
    ctx.checkpoint().await?;
    ctx.set_phase(Phase::UpgradeWall);
    let config = ctx.snapshot();
    ctx.report.info("Upgrading a wall");
    ctx.execute(&InputGenerator::new(&config.coords).upgrade_wall())
        .await?;

    let stats = ctx.stats.update(|stats| stats.record_wall());
    ctx.report.success(format!(
        "Wall upgraded ({} this session)",
        stats.walls_upgraded
    ));
    ctx.report.stats(stats);
    Ok(())
}
