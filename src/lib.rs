//! CoC Farmhand - OCR-guided Clash of Clans farming for Android emulators
//!
//! This library drives an emulator over adb: it searches matchmaking for
//! bases whose loot meets configured thresholds, attacks them with a fixed
//! deployment plan, reads the loot won from the victory panel and keeps
//! session statistics. An operator console controls it over a local
//! WebSocket.
//!
//! ## Architecture
//!
//! - `android`: adb device driver and calibrated UI coordinates
//! - `vision`: screenshot preprocessing, Tesseract OCR and number parsing
//! - `bot`: the attack cycle state machine
//! - `gateway`: the operator console protocol and server

pub mod android;
pub mod bot;
pub mod config;
pub mod game;
pub mod gateway;
pub mod vision;

mod process;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::android::{Device, DeviceError, DeviceSession, Point, UiElement};
use crate::bot::context::DEFAULT_DEBUG_DIR;
use crate::bot::{RunContext, RunController};
use crate::config::{ConfigError, RunConfig, SharedConfig};
use crate::game::{RunState, SessionStats, SharedStats};
use crate::gateway::protocol::{ConsoleStatus, Event, StatusPayload, SwipeGesture, TapTarget};
use crate::gateway::Reporter;
use crate::vision::{TextRecognizer, VisionReader};

/// Interval of the status heartbeat while a run is active
pub const STATUS_INTERVAL: Duration = Duration::from_secs(3);

/// Pause between the calibration tap and its screenshot
const TEST_COORDS_SETTLE: Duration = Duration::from_secs(2);

/// Actions the bot performs on the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FarmAction {
    /// Tap at a screen percentage, optionally naming the element
    Tap {
        element: Option<UiElement>,
        point: Point,
    },
    /// Wait for a duration
    Wait(Duration),
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run is active or still shutting down
    AlreadyRunning,
    /// The emulator could not be reached
    DeviceUnavailable(String),
}

/// The bot: device, vision, configuration and the current run
pub struct Farmhand {
    device: Arc<dyn Device>,
    vision: Arc<VisionReader>,
    config: SharedConfig,
    stats: SharedStats,
    state: Arc<RunState>,
    report: Reporter,
    debug_dir: PathBuf,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

impl Farmhand {
    /// Create a new bot with the given device, OCR engine and settings
    pub fn new(device: Arc<dyn Device>, ocr: Arc<dyn TextRecognizer>, config: RunConfig) -> Self {
        let state = Arc::new(RunState::new());
        Self {
            device,
            vision: Arc::new(VisionReader::new(ocr)),
            config: SharedConfig::new(config),
            stats: SharedStats::new(),
            report: Reporter::new(state.clone()),
            state,
            debug_dir: PathBuf::from(DEFAULT_DEBUG_DIR),
            run_task: Mutex::new(None),
        }
    }

    /// Directory for debug screenshots
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = dir.into();
        self
    }

    pub fn reporter(&self) -> &Reporter {
        &self.report
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.report.subscribe()
    }

    pub fn session(&self) -> DeviceSession {
        self.device.session()
    }

    /// Connect (or reconnect) to the emulator
    pub async fn connect_device(&self) -> Result<DeviceSession, DeviceError> {
        let device = self.device.clone();
        match tokio::task::spawn_blocking(move || device.connect()).await {
            Ok(result) => result,
            Err(e) => Err(DeviceError::CommandFailed {
                command: "connect".into(),
                stderr: e.to_string(),
            }),
        }
    }

    /// Status event including the device link
    pub fn status_event(&self, status: ConsoleStatus) -> Event {
        let session = self.device.session();
        Event::Status(StatusPayload {
            status,
            adb_connected: Some(session.connected),
            screen_size: Some(session.screen_size()),
            step: Some(self.state.phase()),
        })
    }

    fn run_in_flight(&self) -> bool {
        self.run_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the attack loop
    pub async fn start(&self) -> StartOutcome {
        if self.state.is_running() || self.run_in_flight() {
            self.report.warning("Bot is already running");
            self.report.emit(Event::status(self.state.status()));
            return StartOutcome::AlreadyRunning;
        }

        if !self.device.session().connected {
            if let Err(e) = self.connect_device().await {
                self.report
                    .error(format!("Could not connect to the emulator: {}", e));
                self.report.emit(self.status_event(ConsoleStatus::Idle));
                return StartOutcome::DeviceUnavailable(e.to_string());
            }
        }

        let Some(token) = self.state.begin() else {
            return StartOutcome::AlreadyRunning;
        };
        self.stats.update(|stats| stats.mark_started(Utc::now()));

        let ctx = RunContext::new(
            self.device.clone(),
            self.vision.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.state.clone(),
            self.report.clone(),
            token.clone(),
        )
        .with_debug_dir(self.debug_dir.clone());

        let handle = tokio::spawn(RunController::new(ctx).run());
        *self.run_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tokio::spawn(heartbeat(self.state.clone(), self.report.clone(), token));

        self.report.emit(self.status_event(ConsoleStatus::Running));
        StartOutcome::Started
    }

    /// Ask the loop to stop; it exits at its next checkpoint
    pub fn stop(&self) {
        if !self.state.is_running() {
            self.report.info("Bot is not running");
        } else {
            self.report.info("Stop requested");
        }
        self.state.request_stop();
        self.report.emit(Event::status(ConsoleStatus::Idle));
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(&self) {
        self.state.request_stop();
        let handle = self
            .run_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Run loop ended abnormally: {}", e);
            }
        }
    }

    pub fn pause(&self) {
        if self.state.pause() {
            self.report.info("Paused");
            self.report.emit(Event::status(ConsoleStatus::Paused));
        } else {
            self.report.warning("Nothing to pause");
        }
    }

    pub fn resume(&self) {
        if self.state.resume() {
            self.report.info("Resumed");
            self.report.emit(Event::status(ConsoleStatus::Running));
        } else {
            self.report.warning("Bot is not paused");
        }
    }

    /// Merge parameters into the configuration; the loop picks them up at
    /// its next phase
    pub fn update_config(&self, params: &Map<String, Value>) -> Vec<ConfigError> {
        let (applied, rejected) = self.config.update(params);
        for error in &rejected {
            self.report.warning(format!("Config ignored: {}", error));
        }
        if !applied.is_empty() {
            self.report
                .info(format!("Config updated: {}", applied.join(", ")));
            self.report.emit(Event::Config(self.config.to_params()));
        }
        rejected
    }

    /// Current configuration under its external names
    pub fn config_params(&self) -> Map<String, Value> {
        self.config.to_params()
    }

    pub fn config_snapshot(&self) -> RunConfig {
        self.config.snapshot()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Zero the session counters and restart the session clock
    pub fn reset_stats(&self) {
        self.stats.reset();
        let stats = self.stats.update(|stats| stats.mark_started(Utc::now()));
        self.report.info("Statistics reset");
        self.report.stats(stats);
    }

    /// Capture the screen as base64 PNG
    pub async fn screenshot(&self) -> Option<String> {
        let device = self.device.clone();
        let bytes = tokio::task::spawn_blocking(move || device.screenshot())
            .await
            .ok()??;
        Some(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Manual tap from the console
    pub async fn tap(&self, target: TapTarget) -> bool {
        let device = self.device.clone();
        let delivered = tokio::task::spawn_blocking(move || match target {
            TapTarget::Percent(point) => device.tap_percent(point),
            TapTarget::Pixels(x, y) => device.tap(x, y),
        })
        .await
        .unwrap_or(false);

        if delivered {
            self.report.info(format!("Tapped {:?}", target));
        } else {
            self.report.warning(format!("Tap {:?} was not delivered", target));
        }
        delivered
    }

    /// Manual swipe from the console
    pub async fn swipe(&self, gesture: SwipeGesture) -> bool {
        let device = self.device.clone();
        let delivered = tokio::task::spawn_blocking(move || {
            device.swipe(gesture.from, gesture.to, gesture.duration_ms)
        })
        .await
        .unwrap_or(false);

        if delivered {
            self.report.info(format!(
                "Swiped {:?} -> {:?} in {}ms",
                gesture.from, gesture.to, gesture.duration_ms
            ));
        } else {
            self.report.warning("Swipe was not delivered");
        }
        delivered
    }

    /// Tap the attack button and save a screenshot to check the calibration
    pub async fn test_coords(&self) {
        let point = self.config.snapshot().coords.resolve(UiElement::AttackButton);
        self.report
            .info(format!("Test tap on attack button at ({:.2}, {:.2})", point.x, point.y));
        self.tap(TapTarget::Percent(point)).await;
        tokio::time::sleep(TEST_COORDS_SETTLE).await;

        let device = self.device.clone();
        let dir = self.debug_dir.clone();
        let saved = tokio::task::spawn_blocking(move || -> Result<PathBuf, String> {
            let bytes = device.screenshot().ok_or("no screenshot")?;
            std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
            let path = dir.join(format!("test_coords_{}.png", Utc::now().timestamp()));
            std::fs::write(&path, bytes).map_err(|e| e.to_string())?;
            Ok(path)
        })
        .await;

        match saved {
            Ok(Ok(path)) => self
                .report
                .success(format!("Screenshot saved to {}", path.display())),
            Ok(Err(e)) => self.report.warning(format!("Could not save screenshot: {}", e)),
            Err(e) => self.report.warning(format!("Could not save screenshot: {}", e)),
        }
    }
}

/// Periodic status while the run lasts
async fn heartbeat(state: Arc<RunState>, report: Reporter, token: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if !state.is_running() {
                    break;
                }
                report.emit(Event::Status(StatusPayload {
                    status: state.status().into(),
                    adb_connected: None,
                    screen_size: None,
                    step: Some(state.phase()),
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, ScriptedOcr};
    use base64::Engine as _;
    use serde_json::json;

    fn farmhand(device: FakeDevice) -> (Farmhand, Arc<FakeDevice>) {
        let device = Arc::new(device);
        let bot = Farmhand::new(
            device.clone(),
            Arc::new(ScriptedOcr::always("250 000\n250 000\n2 000")),
            RunConfig::default(),
        )
        .with_debug_dir(std::env::temp_dir().join(format!("farmhand-lib-{}", std::process::id())));
        (bot, device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_device_stays_idle() {
        let (bot, _) = farmhand(FakeDevice::unreachable());
        let mut events = bot.subscribe();

        let outcome = bot.start().await;
        assert!(matches!(outcome, StartOutcome::DeviceUnavailable(_)));
        assert!(!bot.state().is_running());

        let mut saw_idle = false;
        while let Ok(event) = events.try_recv() {
            if let Event::Status(status) = event {
                saw_idle |= status.status == ConsoleStatus::Idle;
            }
        }
        assert!(saw_idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_a_no_op() {
        let (bot, _) = farmhand(FakeDevice::connected());
        assert_eq!(bot.start().await, StartOutcome::Started);
        assert_eq!(bot.start().await, StartOutcome::AlreadyRunning);
        bot.shutdown().await;
        assert!(!bot.state().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_start_again() {
        let (bot, _) = farmhand(FakeDevice::connected());
        bot.start().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        bot.stop();
        bot.shutdown().await;

        assert_eq!(bot.start().await, StartOutcome::Started);
        assert!(bot.stats().session_started_at.is_some());
        bot.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_emit_status() {
        let (bot, _) = farmhand(FakeDevice::connected());
        bot.start().await;
        let mut events = bot.subscribe();

        bot.pause();
        assert!(bot.state().is_paused());
        bot.resume();
        assert!(!bot.state().is_paused());

        let statuses: Vec<ConsoleStatus> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                Event::Status(status) => Some(status.status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![ConsoleStatus::Paused, ConsoleStatus::Running]);
        bot.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_config_update_changes_nothing() {
        let (bot, _) = farmhand(FakeDevice::connected());
        let config_before = bot.config_snapshot();
        let stats_before = bot.stats();

        let rejected = bot.update_config(&Map::new());
        assert!(rejected.is_empty());
        assert_eq!(bot.config_snapshot(), config_before);
        assert_eq!(bot.stats(), stats_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_update_is_broadcast() {
        let (bot, _) = farmhand(FakeDevice::connected());
        let mut events = bot.subscribe();

        let rejected = bot.update_config(json!({"min_gold": 123456}).as_object().unwrap());
        assert!(rejected.is_empty());

        let config = std::iter::from_fn(|| events.try_recv().ok()).find_map(|event| match event {
            Event::Config(params) => Some(params),
            _ => None,
        });
        assert_eq!(config.unwrap()["min_gold"], json!(123456));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_tap_and_screenshot() {
        let (bot, device) = farmhand(FakeDevice::connected());
        assert!(bot.tap(TapTarget::Percent(Point::new(0.5, 0.5))).await);
        assert!(bot.tap(TapTarget::Pixels(7, 9)).await);
        assert_eq!(device.taps(), vec![(100, 50), (7, 9)]);

        let encoded = bot.screenshot().await.unwrap();
        let png = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_swipe() {
        let (bot, device) = farmhand(FakeDevice::connected());
        let gesture = SwipeGesture {
            from: (10, 50),
            to: (190, 50),
            duration_ms: 300,
        };
        assert!(bot.swipe(gesture).await);
        assert_eq!(device.swipes(), vec![((10, 50), (190, 50), 300)]);

        let (bot, device) = farmhand(FakeDevice::unreachable());
        assert!(!bot.swipe(gesture).await);
        assert!(device.swipes().is_empty());
        assert!(bot
            .reporter()
            .recent()
            .iter()
            .any(|e| e.message == "Swipe was not delivered"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coords_taps_and_saves_a_screenshot() {
        let (bot, device) = farmhand(FakeDevice::connected());
        bot.test_coords().await;

        let expected = UiElement::AttackButton.default_point().to_pixels(200, 100);
        assert_eq!(device.taps(), vec![expected]);
        let saved = std::fs::read_dir(&bot.debug_dir)
            .unwrap()
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().starts_with("test_coords_"));
        assert!(saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stats() {
        let (bot, _) = farmhand(FakeDevice::connected());
        bot.stats.update(|s| s.record_wall());
        bot.reset_stats();
        let stats = bot.stats();
        assert_eq!(stats.walls_upgraded, 0);
        assert!(stats.session_started_at.is_some());
    }
}
