//! Troop, hero and spell deployment
//!
//! Each troop slot is selected and its units are dropped over the fixed
//! funnel plan until the slot is spent or its time budget runs out. The
//! whole phase has a budget of its own that cuts across slots.

use std::time::Duration;

use tokio::time::Instant;

use super::context::RunContext;
use super::ControlError;
use crate::android::input::{InputGenerator, Point, DEPLOY_PLAN};
use crate::android::UiElement;
use crate::config::{DeployMode, RunConfig};
use crate::game::Phase;

/// Taps per drop point in one pass
pub const TAPS_PER_POINT: usize = 6;

/// Between taps on the same point
const TAP_INTERVAL: Duration = Duration::from_millis(30);

/// After the first selection of a slot
const SELECT_SETTLE: Duration = Duration::from_millis(120);

/// After re-selecting the slot at the start of a pass
const RESELECT_SETTLE: Duration = Duration::from_millis(80);

/// Between passes over the plan
const PASS_GAP: Duration = Duration::from_millis(100);

/// Why a slot stopped being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEnd {
    /// The badge read zero
    Spent,
    /// The badge stopped going down
    Stalled,
    /// The slot budget ran out
    SlotBudget,
    /// The deployment budget ran out
    DeployBudget,
}

/// Follows the remaining-troop badge of one slot
#[derive(Debug, Clone)]
pub struct StallTracker {
    last: Option<u32>,
    stalled: u32,
    limit: u32,
}

impl StallTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            last: None,
            stalled: 0,
            limit: limit.max(1),
        }
    }

    /// Feed a badge reading; returns why the slot should end, if it should
    pub fn observe(&mut self, count: u32) -> Option<SlotEnd> {
        if count == 0 {
            return Some(SlotEnd::Spent);
        }
        match self.last {
            Some(previous) if count >= previous => self.stalled += 1,
            _ => self.stalled = 0,
        }
        self.last = Some(count);
        (self.stalled >= self.limit).then_some(SlotEnd::Stalled)
    }
}

/// Deploy every configured troop slot
pub async fn deploy_troops(ctx: &RunContext) -> Result<(), ControlError> {
    ctx.set_phase(Phase::DeployTroops);
    let config = ctx.snapshot();
    let deadline = Instant::now() + config.deploy.total_limit;
    ctx.report.info(format!(
        "Deploying {} slots over the funnel ({} mode)",
        config.deploy.slot_count,
        match config.deploy.mode {
            DeployMode::Timed => "timed",
            DeployMode::Ocr => "ocr",
        }
    ));

    for slot in 1..=config.deploy.slot_count {
        ctx.checkpoint().await?;
        if Instant::now() >= deadline {
            ctx.report.warning(format!(
                "Deployment budget of {}s used up at slot {}",
                config.deploy.total_limit.as_secs(),
                slot
            ));
            break;
        }

        let slot_deadline = (Instant::now() + config.deploy.slot_limit).min(deadline);
        let end = deploy_slot(ctx, &config, slot, slot_deadline, deadline).await?;
        log::debug!("Slot {} ended: {:?}", slot, end);
        if end == SlotEnd::DeployBudget {
            ctx.report.warning(format!(
                "Deployment budget of {}s used up at slot {}",
                config.deploy.total_limit.as_secs(),
                slot
            ));
            break;
        }
    }
    Ok(())
}

async fn deploy_slot(
    ctx: &RunContext,
    config: &RunConfig,
    slot: u8,
    slot_deadline: Instant,
    deadline: Instant,
) -> Result<SlotEnd, ControlError> {
    let slot_point = config.coords.resolve(UiElement::TroopSlot(slot));
    let out_of_time = || {
        if Instant::now() >= deadline {
            Some(SlotEnd::DeployBudget)
        } else if Instant::now() >= slot_deadline {
            Some(SlotEnd::SlotBudget)
        } else {
            None
        }
    };

    ctx.tap(slot_point).await;
    ctx.sleep(SELECT_SETTLE).await?;

    let mut tracker = StallTracker::new(config.deploy.max_stalled_checks);
    loop {
        if let Some(end) = out_of_time() {
            return Ok(end);
        }
        ctx.checkpoint().await?;

        // Re-select in case a tap landed on the bar and changed the selection
        ctx.tap(slot_point).await;
        ctx.sleep(RESELECT_SETTLE).await?;

        for point in DEPLOY_PLAN {
            if out_of_time().is_some() {
                break;
            }
            tap_many(ctx, point, TAPS_PER_POINT, slot_deadline).await?;
        }
        ctx.sleep(PASS_GAP).await?;

        if config.deploy.mode == DeployMode::Ocr {
            let remaining = read_remaining(ctx, config, slot_point).await?;
            if let Some(end) = tracker.observe(remaining) {
                return Ok(end);
            }
        }
    }
}

/// Tap one point repeatedly, stopping early at the deadline
async fn tap_many(
    ctx: &RunContext,
    point: Point,
    times: usize,
    deadline: Instant,
) -> Result<(), ControlError> {
    for _ in 0..times {
        if Instant::now() >= deadline {
            break;
        }
        ctx.tap(point).await;
        ctx.sleep(TAP_INTERVAL).await?;
    }
    Ok(())
}

/// Badge count of a slot; an unreadable badge counts as spent
async fn read_remaining(
    ctx: &RunContext,
    config: &RunConfig,
    slot_point: Point,
) -> Result<u32, ControlError> {
    let Some(frame) = ctx.capture().await else {
        return Ok(0);
    };
    let vision = ctx.vision.clone();
    let geometry = config.troop_ocr;
    let count = ctx
        .blocking(move || vision.read_troop_count(&frame, slot_point, &geometry))
        .await??;
    Ok(count)
}

/// Drop heroes and cast spells. Best effort: a missed tap is ignored.
pub async fn deploy_heroes_and_spells(ctx: &RunContext) -> Result<(), ControlError> {
    ctx.checkpoint().await?;
    let config = ctx.snapshot();
    let gen = InputGenerator::new(&config.coords);

    ctx.report.info("Deploying heroes");
    ctx.execute(&gen.heroes()).await?;

    ctx.report.info("Casting spells");
    ctx.execute(&gen.spells()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, ScriptedOcr};
    use serde_json::json;

    #[test]
    fn test_zero_ends_the_slot() {
        let mut tracker = StallTracker::new(3);
        assert_eq!(tracker.observe(12), None);
        assert_eq!(tracker.observe(4), None);
        assert_eq!(tracker.observe(0), Some(SlotEnd::Spent));
    }

    #[test]
    fn test_stall_needs_consecutive_reads() {
        let mut tracker = StallTracker::new(3);
        assert_eq!(tracker.observe(5), None);
        assert_eq!(tracker.observe(5), None);
        assert_eq!(tracker.observe(5), None);
        // A decrease resets the count
        assert_eq!(tracker.observe(4), None);
        assert_eq!(tracker.observe(4), None);
        assert_eq!(tracker.observe(6), None);
        assert_eq!(tracker.observe(6), Some(SlotEnd::Stalled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_budget_bounds_a_slot() {
        let harness = Harness::new();
        harness.config.update(
            json!({"troop_slots_count": 1, "deploy_slot_limit_s": 1, "deploy_limit_s": 60})
                .as_object()
                .unwrap(),
        );

        let started = Instant::now();
        deploy_troops(&harness.context()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(1));
        // Budget plus at most one tap interval and one pass gap
        assert!(elapsed <= Duration::from_secs(1) + TAP_INTERVAL + PASS_GAP + RESELECT_SETTLE);
        assert!(harness.device.taps().len() > 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_budget_cuts_across_slots() {
        let harness = Harness::new();
        harness.config.update(
            json!({"troop_slots_count": 11, "deploy_slot_limit_s": 6, "deploy_limit_s": 10})
                .as_object()
                .unwrap(),
        );

        let started = Instant::now();
        deploy_troops(&harness.context()).await.unwrap();
        assert!(started.elapsed() <= Duration::from_millis(10_300));

        // Slot 1 takes 6s and slot 2 is cut at 10s; later slots are never selected
        let config = harness.config.snapshot();
        let session = crate::android::Device::session(harness.device.as_ref());
        let slot3 = config
            .coords
            .resolve(UiElement::TroopSlot(3))
            .to_pixels(session.width, session.height);
        assert!(!harness.device.taps().contains(&slot3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ocr_mode_moves_on_when_spent() {
        let harness = Harness::with_ocr(ScriptedOcr::sequence(&["x8", "x3", "0"]));
        harness.config.update(
            json!({"troop_slots_count": 1, "deploy_mode": "ocr", "deploy_slot_limit_s": 60})
                .as_object()
                .unwrap(),
        );

        deploy_troops(&harness.context()).await.unwrap();
        assert_eq!(harness.ocr.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heroes_and_spells() {
        let harness = Harness::new();
        deploy_heroes_and_spells(&harness.context()).await.unwrap();
        // Four heroes and two spells, each selected then dropped
        assert_eq!(harness.device.taps().len(), 12);
    }
}
