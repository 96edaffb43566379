//! ADB device driver
//!
//! Talks to the emulator through the `adb` executable: device discovery,
//! resolution query, taps, swipes and PNG screenshots. Every subprocess is
//! bounded by a timeout so a wedged adb server cannot stall the run loop.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use super::input::Point;
use crate::process::{run_bounded, ProcessError};

/// Serial of the first BlueStacks / AVD instance
pub const DEFAULT_DEVICE_ID: &str = "emulator-5554";

/// TCP endpoint tried when no device is listed
pub const FALLBACK_TCP_ADDR: &str = "127.0.0.1:5555";

/// Resolution assumed until `wm size` answers
pub const DEFAULT_RESOLUTION: (u32, u32) = (1920, 1080);

/// Upper bound of any adb invocation
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive failed device commands after which the link counts as lost
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// State of the device link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSession {
    pub connected: bool,
    pub device_id: String,
    pub width: u32,
    pub height: u32,
}

impl DeviceSession {
    pub fn disconnected(device_id: impl Into<String>) -> Self {
        Self {
            connected: false,
            device_id: device_id.into(),
            width: DEFAULT_RESOLUTION.0,
            height: DEFAULT_RESOLUTION.1,
        }
    }

    /// Resolution formatted as `WxH`
    pub fn screen_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Errors from the device link
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("adb executable could not be started: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("adb {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("adb {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("no device attached and {0} refused the connection")]
    NoDevice(String),
    #[error("device is not connected")]
    NotConnected,
}

/// An Android device that can be tapped and captured.
///
/// Input and capture report failure as `false`/`None` instead of an error:
/// a missed tap is routine and the caller decides whether it matters.
pub trait Device: Send + Sync {
    /// Establish (or re-establish) the link and query the resolution
    fn connect(&self) -> Result<DeviceSession, DeviceError>;

    /// Current link state
    fn session(&self) -> DeviceSession;

    /// Tap at pixel coordinates
    fn tap(&self, x: i32, y: i32) -> bool;

    /// Swipe between two pixel coordinates
    fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u32) -> bool;

    /// Capture the screen as PNG bytes
    fn screenshot(&self) -> Option<Vec<u8>>;

    /// Tap at a screen percentage using the session resolution
    fn tap_percent(&self, point: Point) -> bool {
        let session = self.session();
        let (x, y) = point.to_pixels(session.width, session.height);
        self.tap(x, y)
    }
}

/// Captured result of an adb invocation
#[derive(Debug)]
pub struct AdbOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl AdbOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Device driven through the adb command line
pub struct AdbDevice {
    adb: PathBuf,
    preferred_id: String,
    timeout: Duration,
    session: Mutex<DeviceSession>,
    failures: AtomicU32,
}

impl AdbDevice {
    pub fn new(adb: impl Into<PathBuf>, preferred_id: impl Into<String>) -> Self {
        let preferred_id = preferred_id.into();
        Self {
            adb: adb.into(),
            session: Mutex::new(DeviceSession::disconnected(preferred_id.clone())),
            preferred_id,
            timeout: COMMAND_TIMEOUT,
            failures: AtomicU32::new(0),
        }
    }

    /// Run adb with the given arguments, killing it on timeout
    pub fn run(&self, args: &[&str]) -> Result<AdbOutput, DeviceError> {
        let finished = run_bounded(Command::new(&self.adb).args(args), None, self.timeout)
            .map_err(|e| match e {
                ProcessError::Io(e) => DeviceError::Spawn(e),
                ProcessError::TimedOut(timeout) => DeviceError::Timeout {
                    command: args.join(" "),
                    timeout,
                },
            })?;

        Ok(AdbOutput {
            success: finished.success,
            stdout: finished.stdout,
            stderr: String::from_utf8_lossy(&finished.stderr).trim().to_string(),
        })
    }

    /// Run a command against the selected device.
    ///
    /// After [`MAX_CONSECUTIVE_FAILURES`] failures in a row the session is
    /// reset to disconnected until the next `connect`.
    fn run_on_device(&self, args: &[&str]) -> Result<AdbOutput, DeviceError> {
        let session = self.session();
        if !session.connected {
            return Err(DeviceError::NotConnected);
        }
        let mut full = vec!["-s", session.device_id.as_str()];
        full.extend_from_slice(args);
        let result = self.run(&full).and_then(|output| {
            if output.success {
                Ok(output)
            } else {
                Err(DeviceError::CommandFailed {
                    command: args.join(" "),
                    stderr: output.stderr,
                })
            }
        });

        match &result {
            Ok(_) => self.failures.store(0, Ordering::SeqCst),
            Err(_) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    log::warn!(
                        "{} failed {} times in a row, marking it disconnected",
                        session.device_id,
                        failures
                    );
                    self.failures.store(0, Ordering::SeqCst);
                    self.set_session(DeviceSession::disconnected(session.device_id.clone()));
                }
            }
        }
        result
    }

    fn pick_device(&self) -> Result<String, DeviceError> {
        let listing = self.run(&["devices"])?;
        let devices = parse_device_list(&listing.stdout_text());

        if devices.iter().any(|id| id == &self.preferred_id) {
            return Ok(self.preferred_id.clone());
        }
        if let Some(first) = devices.first() {
            log::info!(
                "Preferred device {} not attached, using {}",
                self.preferred_id,
                first
            );
            return Ok(first.clone());
        }

        log::info!("No device attached, trying {}", FALLBACK_TCP_ADDR);
        let attempt = self.run(&["connect", FALLBACK_TCP_ADDR])?;
        let reply = attempt.stdout_text().to_lowercase();
        if reply.contains("connected to") {
            Ok(FALLBACK_TCP_ADDR.to_string())
        } else {
            Err(DeviceError::NoDevice(FALLBACK_TCP_ADDR.to_string()))
        }
    }

    fn query_resolution(&self, device_id: &str) -> Option<(u32, u32)> {
        match self.run(&["-s", device_id, "shell", "wm", "size"]) {
            Ok(output) if output.success => parse_wm_size(&output.stdout_text()),
            Ok(output) => {
                log::warn!("wm size failed: {}", output.stderr);
                None
            }
            Err(e) => {
                log::warn!("wm size failed: {}", e);
                None
            }
        }
    }

    fn set_session(&self, session: DeviceSession) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

impl Device for AdbDevice {
    fn connect(&self) -> Result<DeviceSession, DeviceError> {
        let device_id = match self.pick_device() {
            Ok(id) => id,
            Err(e) => {
                self.set_session(DeviceSession::disconnected(self.preferred_id.clone()));
                return Err(e);
            }
        };

        let (width, height) = self.query_resolution(&device_id).unwrap_or_else(|| {
            log::warn!(
                "Could not read screen size, assuming {}x{}",
                DEFAULT_RESOLUTION.0,
                DEFAULT_RESOLUTION.1
            );
            DEFAULT_RESOLUTION
        });

        let session = DeviceSession {
            connected: true,
            device_id,
            width,
            height,
        };
        log::info!(
            "Connected to {} ({})",
            session.device_id,
            session.screen_size()
        );
        self.failures.store(0, Ordering::SeqCst);
        self.set_session(session.clone());
        Ok(session)
    }

    fn session(&self) -> DeviceSession {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn tap(&self, x: i32, y: i32) -> bool {
        let (x, y) = (x.to_string(), y.to_string());
        match self.run_on_device(&["shell", "input", "tap", &x, &y]) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Tap at ({}, {}) failed: {}", x, y, e);
                false
            }
        }
    }

    fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u32) -> bool {
        let args = [
            from.0.to_string(),
            from.1.to_string(),
            to.0.to_string(),
            to.1.to_string(),
            duration_ms.to_string(),
        ];
        let mut full = vec!["shell", "input", "swipe"];
        full.extend(args.iter().map(String::as_str));
        match self.run_on_device(&full) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Swipe failed: {}", e);
                false
            }
        }
    }

    fn screenshot(&self) -> Option<Vec<u8>> {
        match self.run_on_device(&["exec-out", "screencap", "-p"]) {
            Ok(output) if !output.stdout.is_empty() => Some(output.stdout),
            Ok(_) => {
                log::warn!("Screenshot returned no data");
                None
            }
            Err(e) => {
                log::warn!("Screenshot failed: {}", e);
                None
            }
        }
    }
}

/// Find the adb executable.
///
/// Order: `ADB_PATH`, then `PATH`, then the usual SDK and emulator install
/// locations. Falls back to the bare name so the OS gets the final say.
pub fn locate_adb() -> PathBuf {
    if let Ok(path) = std::env::var("ADB_PATH") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return path;
        }
        log::warn!("ADB_PATH={} does not exist, searching", path.display());
    }

    let exe = if cfg!(windows) { "adb.exe" } else { "adb" };

    if let Some(paths) = std::env::var_os("PATH") {
        if let Some(found) = std::env::split_paths(&paths)
            .map(|dir| dir.join(exe))
            .find(|candidate| candidate.is_file())
        {
            return found;
        }
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = PathBuf::from(home);
        candidates.push(home.join("Android/Sdk/platform-tools").join(exe));
        candidates.push(home.join("Library/Android/sdk/platform-tools").join(exe));
        candidates.push(home.join("AppData/Local/Android/Sdk/platform-tools").join(exe));
    }
    candidates.push(PathBuf::from("/usr/bin/adb"));
    candidates.push(PathBuf::from("/usr/local/bin/adb"));
    candidates.push(PathBuf::from("/opt/homebrew/bin/adb"));
    candidates.push(PathBuf::from("C:/Program Files/BlueStacks_nxt/HD-Adb.exe"));
    candidates.push(PathBuf::from("C:/Program Files/BlueStacks/HD-Adb.exe"));

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(exe))
}

/// Serials of attached devices from `adb devices`
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Resolution from `wm size`; an override size wins over the physical one
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let parse_line = |prefix: &str| {
        output.lines().find_map(|line| {
            let rest = line.trim().strip_prefix(prefix)?;
            let (w, h) = rest.trim().split_once('x')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
    };
    parse_line("Override size:").or_else(|| parse_line("Physical size:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "* daemon started successfully\n\
                      List of devices attached\n\
                      emulator-5554\tdevice\n\
                      127.0.0.1:5565\toffline\n\
                      R58M123\tunauthorized\n\
                      192.168.1.4:5555\tdevice\n\n";
        assert_eq!(
            parse_device_list(output),
            vec!["emulator-5554".to_string(), "192.168.1.4:5555".to_string()]
        );
    }

    #[test]
    fn test_parse_empty_device_list() {
        assert!(parse_device_list("List of devices attached\n\n").is_empty());
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn test_parse_wm_size() {
        assert_eq!(parse_wm_size("Physical size: 1600x900\n"), Some((1600, 900)));
        assert_eq!(
            parse_wm_size("Physical size: 1920x1080\nOverride size: 1280x720\n"),
            Some((1280, 720))
        );
        assert_eq!(parse_wm_size("error: no devices"), None);
        assert_eq!(parse_wm_size("Physical size: axb"), None);
    }

    #[test]
    fn test_session_screen_size() {
        let session = DeviceSession::disconnected("emulator-5554");
        assert!(!session.connected);
        assert_eq!(session.screen_size(), "1920x1080");
    }

    #[test]
    fn test_missing_adb_fails_to_connect() {
        let device = AdbDevice::new("/nonexistent/adb-binary", DEFAULT_DEVICE_ID);
        assert!(matches!(device.connect(), Err(DeviceError::Spawn(_))));
        assert!(!device.session().connected);
    }

    #[test]
    fn test_repeated_failures_drop_the_link() {
        let device = AdbDevice::new("/nonexistent/adb-binary", DEFAULT_DEVICE_ID);
        device.set_session(DeviceSession {
            connected: true,
            device_id: DEFAULT_DEVICE_ID.into(),
            width: 1600,
            height: 900,
        });

        for _ in 1..MAX_CONSECUTIVE_FAILURES {
            assert!(!device.tap(10, 10));
            assert!(device.session().connected);
        }
        assert!(device.screenshot().is_none());

        let session = device.session();
        assert!(!session.connected);
        assert_eq!(session.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(session.screen_size(), "1920x1080");
        assert!(matches!(
            device.run_on_device(&["shell", "true"]),
            Err(DeviceError::NotConnected)
        ));
    }

    #[test]
    fn test_input_requires_connection() {
        let device = AdbDevice::new("/nonexistent/adb-binary", DEFAULT_DEVICE_ID);
        assert!(!device.tap(10, 10));
        assert!(!device.tap_percent(Point::new(0.5, 0.5)));
        assert!(device.screenshot().is_none());
    }
}
