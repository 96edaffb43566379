//! Everything a running attack cycle needs, plus the cooperative
//! checkpoints that make stop and pause responsive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ControlError;
use crate::android::{Device, Point};
use crate::config::{RunConfig, SharedConfig};
use crate::game::{Phase, RunState, SharedStats};
use crate::gateway::protocol::{Event, StatusPayload};
use crate::gateway::Reporter;
use crate::vision::{Frame, VisionReader};
use crate::FarmAction;

/// How often a paused run re-checks its flags
pub const PAUSE_POLL: Duration = Duration::from_secs(1);

/// Where victory panels are saved when they cannot be read
pub const DEFAULT_DEBUG_DIR: &str = "debug_victory";

/// Shared handles of one run
#[derive(Clone)]
pub struct RunContext {
    pub device: Arc<dyn Device>,
    pub vision: Arc<VisionReader>,
    pub config: SharedConfig,
    pub stats: SharedStats,
    pub state: Arc<RunState>,
    pub report: Reporter,
    pub debug_dir: PathBuf,
    token: CancellationToken,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<dyn Device>,
        vision: Arc<VisionReader>,
        config: SharedConfig,
        stats: SharedStats,
        state: Arc<RunState>,
        report: Reporter,
        token: CancellationToken,
    ) -> Self {
        Self {
            device,
            vision,
            config,
            stats,
            state,
            report,
            debug_dir: PathBuf::from(DEFAULT_DEBUG_DIR),
            token,
        }
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = dir.into();
        self
    }

    /// Current configuration, taken once per phase
    pub fn snapshot(&self) -> RunConfig {
        self.config.snapshot()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.state.set_phase(phase);
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || !self.state.is_running()
    }

    /// Return `Stopped` if a stop was requested; block while paused
    pub async fn checkpoint(&self) -> Result<(), ControlError> {
        loop {
            if self.is_stopped() {
                return Err(ControlError::Stopped);
            }
            if !self.state.is_paused() {
                return Ok(());
            }
            self.sleep(PAUSE_POLL).await?;
        }
    }

    /// Sleep that ends early with `Stopped` when the run is cancelled
    pub async fn sleep(&self, duration: Duration) -> Result<(), ControlError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(ControlError::Stopped),
            _ = tokio::time::sleep(duration) => {
                if self.is_stopped() {
                    Err(ControlError::Stopped)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Run blocking work (adb, OCR) off the async workers
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, ControlError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ControlError::Worker(e.to_string()))
    }

    /// Tap at a screen percentage; false if the device refused
    pub async fn tap(&self, point: Point) -> bool {
        let device = self.device.clone();
        self.blocking(move || device.tap_percent(point))
            .await
            .unwrap_or(false)
    }

    /// Status event carrying the device link
    pub fn link_status(&self) -> Event {
        let session = self.device.session();
        Event::Status(StatusPayload {
            status: self.state.status().into(),
            adb_connected: Some(session.connected),
            screen_size: Some(session.screen_size()),
            step: Some(self.state.phase()),
        })
    }

    /// Reconnect if the device link was lost since the last cycle
    pub async fn ensure_device(&self) -> Result<(), ControlError> {
        if self.device.session().connected {
            return Ok(());
        }
        self.report.warning("Emulator link lost, reconnecting");
        self.report.emit(self.link_status());

        let device = self.device.clone();
        let session = self.blocking(move || device.connect()).await??;
        self.report.success(format!(
            "Reconnected to {} ({})",
            session.device_id,
            session.screen_size()
        ));
        self.report.emit(self.link_status());
        Ok(())
    }

    /// Capture and decode the screen. `None` on transport or decode failure.
    pub async fn capture(&self) -> Option<Frame> {
        let device = self.device.clone();
        let decoded = self
            .blocking(move || device.screenshot().map(|bytes| Frame::decode(&bytes)))
            .await
            .ok()??;
        match decoded {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::warn!("Screenshot could not be decoded: {}", e);
                None
            }
        }
    }

    /// Play a tap/wait sequence.
    ///
    /// A tap in flight always completes. A stop landing in one of the waits
    /// drops the rest of the sequence, so a run never sits out a multi-second
    /// screen transition after being told to stop.
    pub async fn execute(&self, actions: &[FarmAction]) -> Result<(), ControlError> {
        for action in actions {
            match *action {
                FarmAction::Tap { element, point } => {
                    if !self.tap(point).await {
                        if let Some(element) = element {
                            log::warn!("Tap on {} was not delivered", element);
                        }
                    }
                }
                FarmAction::Wait(duration) => self.sleep(duration).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let harness = Harness::new();
        let ctx = harness.context();

        let state = harness.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            state.request_stop();
        });

        let started = Instant::now();
        let result = ctx.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(ControlError::Stopped)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_blocks_while_paused() {
        let harness = Harness::new();
        let ctx = harness.context();
        harness.state.pause();

        let state = harness.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            state.resume();
        });

        let started = Instant::now();
        ctx.checkpoint().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5));
        assert!(waited <= Duration::from_secs(5) + PAUSE_POLL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_paused() {
        let harness = Harness::new();
        let ctx = harness.context();
        harness.state.pause();

        let state = harness.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            state.request_stop();
        });

        assert!(matches!(ctx.checkpoint().await, Err(ControlError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_taps_in_order() {
        let harness = Harness::new();
        let ctx = harness.context();
        let actions = [
            FarmAction::Tap {
                element: None,
                point: Point::new(0.5, 0.5),
            },
            FarmAction::Wait(Duration::from_millis(100)),
            FarmAction::Tap {
                element: None,
                point: Point::new(0.1, 0.2),
            },
        ];
        ctx.execute(&actions).await.unwrap();

        assert_eq!(harness.device.taps(), vec![(100, 50), (20, 20)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_between_taps_drops_the_rest() {
        let harness = Harness::new();
        let ctx = harness.context();
        let actions = [
            FarmAction::Tap {
                element: None,
                point: Point::new(0.5, 0.5),
            },
            FarmAction::Wait(Duration::from_secs(5)),
            FarmAction::Tap {
                element: None,
                point: Point::new(0.1, 0.2),
            },
        ];

        let state = harness.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            state.request_stop();
        });

        let started = Instant::now();
        let result = ctx.execute(&actions).await;
        assert!(matches!(result, Err(ControlError::Stopped)));
        assert!(started.elapsed() <= Duration::from_secs(1) + PAUSE_POLL);
        assert_eq!(harness.device.taps(), vec![(100, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_link_is_reconnected() {
        let harness = Harness::new();
        let ctx = harness.context();
        let mut events = harness.report.subscribe();

        ctx.ensure_device().await.unwrap();
        assert!(events.try_recv().is_err());

        harness.device.drop_link();
        ctx.ensure_device().await.unwrap();
        assert!(harness.device.session().connected);

        let links: Vec<Option<bool>> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                Event::Status(status) => Some(status.adb_connected),
                _ => None,
            })
            .collect();
        assert_eq!(links, vec![Some(false), Some(true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_device_fails_the_cycle() {
        let harness = Harness::new();
        harness.device.drop_link();
        harness.device.refuse_connections();

        let result = harness.context().ensure_device().await;
        assert!(matches!(result, Err(ControlError::Device(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_decodes_frames() {
        let harness = Harness::new();
        let frame = harness.context().capture().await.unwrap();
        assert_eq!(frame.dimensions(), (200, 100));

        harness.device.fail_screenshots();
        assert!(harness.context().capture().await.is_none());
    }
}
