//! Test doubles for the device and the OCR engine

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{GrayImage, Rgba, RgbaImage};
use tokio_util::sync::CancellationToken;

use crate::android::{Device, DeviceError, DeviceSession};
use crate::bot::RunContext;
use crate::config::SharedConfig;
use crate::game::{RunState, SharedStats};
use crate::gateway::Reporter;
use crate::vision::{Frame, OcrOptions, TextRecognizer, VisionError, VisionReader};

pub const FRAME_WIDTH: u32 = 200;
pub const FRAME_HEIGHT: u32 = 100;

pub fn blank_image() -> RgbaImage {
    RgbaImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgba([40, 40, 40, 255]))
}

pub fn blank_frame() -> Frame {
    Frame::from_image(blank_image())
}

fn blank_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    blank_image()
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub type Swipe = ((i32, i32), (i32, i32), u32);

/// Records taps and serves a fixed screenshot
pub struct FakeDevice {
    session: Mutex<DeviceSession>,
    reachable: AtomicBool,
    taps: Mutex<Vec<(i32, i32)>>,
    swipes: Mutex<Vec<Swipe>>,
    screenshots: AtomicUsize,
    screenshots_fail: AtomicBool,
    png: Vec<u8>,
}

impl FakeDevice {
    pub fn connected() -> Self {
        Self {
            session: Mutex::new(DeviceSession {
                connected: true,
                device_id: "emulator-5554".into(),
                width: FRAME_WIDTH,
                height: FRAME_HEIGHT,
            }),
            reachable: AtomicBool::new(true),
            taps: Mutex::new(Vec::new()),
            swipes: Mutex::new(Vec::new()),
            screenshots: AtomicUsize::new(0),
            screenshots_fail: AtomicBool::new(false),
            png: blank_png(),
        }
    }

    /// A device that is not attached and refuses to connect
    pub fn unreachable() -> Self {
        let device = Self::connected();
        device.reachable.store(false, Ordering::SeqCst);
        device.session.lock().unwrap().connected = false;
        device
    }

    pub fn taps(&self) -> Vec<(i32, i32)> {
        self.taps.lock().unwrap().clone()
    }

    pub fn swipes(&self) -> Vec<Swipe> {
        self.swipes.lock().unwrap().clone()
    }

    pub fn screenshot_count(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    /// Lose the link as if the emulator stopped answering
    pub fn drop_link(&self) {
        self.session.lock().unwrap().connected = false;
    }

    pub fn refuse_connections(&self) {
        self.reachable.store(false, Ordering::SeqCst);
    }

    pub fn fail_screenshots(&self) {
        self.screenshots_fail.store(true, Ordering::SeqCst);
    }
}

impl Device for FakeDevice {
    fn connect(&self) -> Result<DeviceSession, DeviceError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(DeviceError::NoDevice("127.0.0.1:5555".into()));
        }
        let mut session = self.session.lock().unwrap();
        session.connected = true;
        Ok(session.clone())
    }

    fn session(&self) -> DeviceSession {
        self.session.lock().unwrap().clone()
    }

    fn tap(&self, x: i32, y: i32) -> bool {
        if !self.session().connected {
            return false;
        }
        self.taps.lock().unwrap().push((x, y));
        true
    }

    fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u32) -> bool {
        if !self.session().connected {
            return false;
        }
        self.swipes.lock().unwrap().push((from, to, duration_ms));
        true
    }

    fn screenshot(&self) -> Option<Vec<u8>> {
        if self.screenshots_fail.load(Ordering::SeqCst) {
            return None;
        }
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Some(self.png.clone())
    }
}

/// OCR engine that answers from a script, then repeats a default
pub struct ScriptedOcr {
    script: Mutex<VecDeque<String>>,
    fallback: String,
    available: bool,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn always(text: &str) -> Self {
        Self::sequence(&[]).with_fallback(text)
    }

    pub fn sequence(texts: &[&str]) -> Self {
        Self {
            script: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
            fallback: String::new(),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::sequence(&[])
        }
    }

    fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = text.to_string();
        self
    }

    /// Number of recognize calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextRecognizer for ScriptedOcr {
    fn probe(&self) -> Result<(), VisionError> {
        if self.available {
            Ok(())
        } else {
            Err(VisionError::EngineUnavailable("scripted engine is offline".into()))
        }
    }

    fn recognize(&self, _image: &GrayImage, _options: &OcrOptions) -> Result<String, VisionError> {
        self.probe()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// A running state with fakes behind it
pub struct Harness {
    pub device: Arc<FakeDevice>,
    pub ocr: Arc<ScriptedOcr>,
    pub config: SharedConfig,
    pub stats: SharedStats,
    pub state: Arc<RunState>,
    pub report: Reporter,
    pub debug_dir: PathBuf,
    token: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ocr(ScriptedOcr::always(""))
    }

    pub fn with_ocr(ocr: ScriptedOcr) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let state = Arc::new(RunState::new());
        let token = state.begin().unwrap();
        let debug_dir = std::env::temp_dir().join(format!(
            "farmhand-debug-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        Self {
            device: Arc::new(FakeDevice::connected()),
            ocr: Arc::new(ocr),
            config: SharedConfig::default(),
            stats: SharedStats::new(),
            report: Reporter::new(state.clone()),
            state,
            debug_dir,
            token,
        }
    }

    pub fn context(&self) -> RunContext {
        RunContext::new(
            self.device.clone(),
            Arc::new(VisionReader::new(self.ocr.clone())),
            self.config.clone(),
            self.stats.clone(),
            self.state.clone(),
            self.report.clone(),
            self.token.clone(),
        )
        .with_debug_dir(self.debug_dir.clone())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.debug_dir);
    }
}
