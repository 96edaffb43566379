//! Operator console wire format
//!
//! Every frame is a JSON text message `{type, payload, timestamp}` with the
//! timestamp in milliseconds since the epoch. The console sends `command`
//! frames; the bot sends everything else.

use serde::Serialize;
use serde_json::{Map, Value};

use super::GatewayError;
use crate::android::Point;
use crate::game::{LogEntry, LogLevel, Phase, RunStatus, SessionStats};
use crate::vision::ResourceCounts;

/// Status shown in the console header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStatus {
    /// Sent once when the console attaches
    Connected,
    Idle,
    Running,
    Paused,
}

impl From<RunStatus> for ConsoleStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Idle => ConsoleStatus::Idle,
            RunStatus::Running => ConsoleStatus::Running,
            RunStatus::Paused => ConsoleStatus::Paused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub status: ConsoleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adb_connected: Option<bool>,
    /// `WxH`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Phase>,
}

impl StatusPayload {
    pub fn new(status: ConsoleStatus) -> Self {
        Self {
            status,
            adb_connected: None,
            screen_size: None,
            step: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPayload {
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Phase>,
}

impl From<&LogEntry> for LogPayload {
    fn from(entry: &LogEntry) -> Self {
        Self {
            level: entry.level,
            message: entry.message.clone(),
            step: entry.step,
        }
    }
}

/// Loot read from a scouted base
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrPayload {
    pub attempt: u32,
    #[serde(flatten)]
    pub counts: ResourceCounts,
    pub raw: String,
}

/// Messages sent to the console
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    Status(StatusPayload),
    Log(LogPayload),
    Screenshot { image: String },
    OcrResult(OcrPayload),
    Stats(SessionStats),
    Config(Map<String, Value>),
    /// A command could not be carried out
    Error(String),
}

impl Event {
    pub fn status(status: impl Into<ConsoleStatus>) -> Self {
        Event::Status(StatusPayload::new(status.into()))
    }

    /// Frame the event with a timestamp
    pub fn encode(&self, timestamp_ms: i64) -> Result<String, GatewayError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("timestamp".into(), Value::from(timestamp_ms));
        }
        Ok(value.to_string())
    }
}

/// Tap target of a manual `tap` command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapTarget {
    Percent(Point),
    Pixels(i32, i32),
}

/// Default length of a console swipe
pub const DEFAULT_SWIPE_MS: u32 = 300;

/// Manual swipe in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipeGesture {
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub duration_ms: u32,
}

/// Commands accepted from the console
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
    UpdateConfig(Map<String, Value>),
    Screenshot,
    Tap(TapTarget),
    Swipe(SwipeGesture),
    TestCoords,
    ResetStats,
    GetConfig,
}

impl Command {
    /// Parse a text frame. `Ok(None)` means a well-formed frame that is not a command.
    pub fn parse(text: &str) -> Result<Option<Command>, GatewayError> {
        let frame: Value = serde_json::from_str(text)?;
        let kind = frame.get("type").and_then(Value::as_str);
        if kind != Some("command") {
            return Ok(None);
        }

        let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidCommand("missing action".into()))?;
        let params = match payload.get("params") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(GatewayError::InvalidCommand(format!(
                    "params must be an object, got {other}"
                )))
            }
        };

        let command = match action {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "update_config" => Command::UpdateConfig(params),
            "screenshot" => Command::Screenshot,
            "tap" => Command::Tap(tap_target(&params)?),
            "swipe" => Command::Swipe(swipe_gesture(&params)?),
            "test_coords" => Command::TestCoords,
            "reset_stats" => Command::ResetStats,
            "get_config" => Command::GetConfig,
            other => return Err(GatewayError::UnknownAction(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn tap_target(params: &Map<String, Value>) -> Result<TapTarget, GatewayError> {
    let number = |keys: &[&str]| keys.iter().find_map(|k| params.get(*k).and_then(Value::as_f64));

    if let (Some(x), Some(y)) = (
        number(&["x_percent", "xPercent"]),
        number(&["y_percent", "yPercent"]),
    ) {
        return Ok(TapTarget::Percent(Point::new(
            x.clamp(0.0, 1.0),
            y.clamp(0.0, 1.0),
        )));
    }
    if let (Some(x), Some(y)) = (number(&["x"]), number(&["y"])) {
        return Ok(TapTarget::Pixels(x.round() as i32, y.round() as i32));
    }
    Err(GatewayError::InvalidCommand(
        "tap needs x_percent/y_percent or x/y".into(),
    ))
}

fn swipe_gesture(params: &Map<String, Value>) -> Result<SwipeGesture, GatewayError> {
    let pixel = |key: &str| {
        params
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v.round() as i32)
            .ok_or_else(|| GatewayError::InvalidCommand(format!("swipe needs {key}")))
    };
    let duration_ms = params
        .get("duration")
        .and_then(Value::as_u64)
        .map_or(DEFAULT_SWIPE_MS, |ms| ms.min(u64::from(u32::MAX)) as u32);
    Ok(SwipeGesture {
        from: (pixel("x1")?, pixel("y1")?),
        to: (pixel("x2")?, pixel("y2")?),
        duration_ms,
    })
}
