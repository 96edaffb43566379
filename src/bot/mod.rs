//! Run controller
//!
//! Drives the attack cycle: detect the village, search for a base, attack,
//! read the loot, go home, pause, repeat. Each step checks for stop and
//! pause requests before doing anything that takes time.

pub mod battle;
pub mod context;
pub mod deploy;
pub mod pacing;
pub mod search;

use std::time::Duration;

use crate::android::{DeviceError, InputGenerator};
use crate::game::Phase;
use crate::vision::VisionError;

pub use context::RunContext;
pub use pacing::Pacer;
pub use search::{SearchOutcome, Verdict};

/// Wait before retrying a cycle that failed
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Settle time when looking at the village before a cycle
const DETECT_SETTLE: Duration = Duration::from_secs(1);

/// Errors that end a cycle
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A stop was requested; not a failure
    #[error("Run stopped")]
    Stopped,
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A base was attacked
    Attacked,
    /// No base was found within the search budget
    Abandoned,
}

/// Owns one run of the attack loop
pub struct RunController {
    ctx: RunContext,
}

impl RunController {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Loop until stopped. Failed cycles are logged and retried.
    pub async fn run(self) {
        let ctx = &self.ctx;
        let config = ctx.snapshot();
        ctx.report.success(format!(
            "Bot started ({:?} army, min gold {}, min elixir {})",
            config.troop_type, config.thresholds.min_gold, config.thresholds.min_elixir
        ));

        loop {
            match self.cycle().await {
                Ok(outcome) => log::debug!("Cycle finished: {:?}", outcome),
                Err(ControlError::Stopped) => break,
                Err(e) => {
                    ctx.report.error(format!(
                        "Cycle failed: {}; retrying in {}s",
                        e,
                        RETRY_DELAY.as_secs()
                    ));
                    if ctx.sleep(RETRY_DELAY).await.is_err() {
                        break;
                    }
                }
            }
        }

        ctx.state.finish();
        ctx.report.info("Bot stopped");
    }

    /// One full attack cycle
    pub async fn cycle(&self) -> Result<CycleOutcome, ControlError> {
        let ctx = &self.ctx;

        ctx.checkpoint().await?;
        ctx.set_phase(Phase::DetectScreen);
        ctx.ensure_device().await?;
        ctx.report.info("Checking the home village");
        ctx.sleep(DETECT_SETTLE).await?;

        ctx.checkpoint().await?;
        search::open_matchmaking(ctx).await?;

        let outcome = search::find_target(ctx).await?;
        if !outcome.attacks() {
            let config = ctx.snapshot();
            search::abandon(ctx, &config).await?;
            return Ok(CycleOutcome::Abandoned);
        }

        ctx.checkpoint().await?;
        ctx.set_phase(Phase::StartAttack);
        let config = ctx.snapshot();
        ctx.report.info("Starting the attack");
        ctx.execute(&InputGenerator::new(&config.coords).commit_attack())
            .await?;

        deploy::deploy_troops(ctx).await?;
        deploy::deploy_heroes_and_spells(ctx).await?;
        battle::wait_for_battle(ctx).await?;
        let loot = battle::end_battle(ctx).await?;
        battle::return_home(ctx, loot).await?;

        if ctx.snapshot().auto_wall_upgrade {
            battle::upgrade_wall(ctx).await?;
        }

        ctx.checkpoint().await?;
        ctx.set_phase(Phase::RandomPause);
        let pause = Pacer::default().pause(&ctx.snapshot().pause);
        ctx.report
            .info(format!("Pausing {:.1}s before the next cycle", pause.as_secs_f64()));
        ctx.sleep(pause).await?;

        Ok(CycleOutcome::Attacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, ScriptedOcr};
    use serde_json::json;
    use tokio::time::Instant;

    fn fast_config(harness: &Harness) {
        harness.config.update(
            json!({
                "deploy_limit_s": 2,
                "deploy_slot_limit_s": 1,
                "wait_attack_s": 5,
                "pause_min": 1,
                "pause_max": 1
            })
            .as_object()
            .unwrap(),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_records_an_attack() {
        let harness = Harness::with_ocr(ScriptedOcr::always("250 000\n250 000\n2 000"));
        fast_config(&harness);

        let outcome = RunController::new(harness.context()).cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Attacked);

        let stats = harness.stats.snapshot();
        assert_eq!(stats.attacks_completed, 1);
        assert!(stats.gold_collected > 0);
        assert_eq!(harness.stats.snapshot().walls_upgraded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_upgrade_runs_when_enabled() {
        let harness = Harness::with_ocr(ScriptedOcr::always("250 000\n250 000\n2 000"));
        fast_config(&harness);
        harness
            .config
            .update(json!({"auto_wall_upgrade": true}).as_object().unwrap());

        RunController::new(harness.context()).cycle().await.unwrap();
        assert_eq!(harness.stats.snapshot().walls_upgraded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_search_abandons_cycle() {
        let harness = Harness::with_ocr(ScriptedOcr::always("1000\n1000"));
        harness.config.update(
            json!({"max_searches": 2, "force_attack_after_s": 3600})
                .as_object()
                .unwrap(),
        );

        let outcome = RunController::new(harness.context()).cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Abandoned);
        assert_eq!(harness.stats.snapshot().attacks_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_within_a_poll_interval() {
        let harness = Harness::with_ocr(ScriptedOcr::always("250 000\n250 000\n2 000"));
        fast_config(&harness);
        let controller = RunController::new(harness.context());
        let handle = tokio::spawn(controller.run());

        tokio::time::sleep(Duration::from_secs(40)).await;
        harness.state.request_stop();
        let stopped_at = Instant::now();

        tokio::time::timeout(context::PAUSE_POLL, handle)
            .await
            .expect("run loop did not stop in time")
            .unwrap();
        assert!(stopped_at.elapsed() <= context::PAUSE_POLL);
        assert_eq!(harness.state.phase(), Phase::Idle);
        assert!(harness.stats.snapshot().attacks_completed >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_reconnects_a_lost_device() {
        let harness = Harness::with_ocr(ScriptedOcr::always("250 000\n250 000\n2 000"));
        fast_config(&harness);
        harness.device.drop_link();

        let outcome = RunController::new(harness.context()).cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Attacked);
        assert!(harness
            .report
            .recent()
            .iter()
            .any(|e| e.message == "Emulator link lost, reconnecting"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_is_retried() {
        let harness = Harness::with_ocr(ScriptedOcr::unavailable());
        let handle = tokio::spawn(RunController::new(harness.context()).run());

        // A failing cycle takes about 13s plus the retry delay
        tokio::time::sleep(Duration::from_secs(60)).await;
        harness.state.request_stop();
        handle.await.unwrap();

        let errors = harness
            .report
            .recent()
            .iter()
            .filter(|e| e.level == crate::game::LogLevel::Error)
            .count();
        assert!(errors >= 2, "expected repeated failures, got {errors}");
    }
}
