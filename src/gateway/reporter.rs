//! Fan-out of operator messages
//!
//! Every operator log line goes to three places: the `log` facade, the
//! replay journal and the broadcast channel read by the console writer.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use super::protocol::{Event, LogPayload};
use crate::game::{Journal, LogEntry, LogLevel, RunState, SessionStats};

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct Reporter {
    events: broadcast::Sender<Event>,
    journal: Arc<Mutex<Journal>>,
    state: Arc<RunState>,
}

impl Reporter {
    pub fn new(state: Arc<RunState>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            events,
            journal: Arc::new(Mutex::new(Journal::default())),
            state,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Send an event to whoever is listening
    pub fn emit(&self, event: Event) {
        // No subscriber is fine: the console may simply not be attached
        let _ = self.events.send(event);
    }

    /// Record an operator log line tagged with the current phase
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let step = self.state.phase();
        log::log!(level.as_log_level(), "[{}] {}", step.as_str(), message);

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            step: Some(step),
        };
        let payload = LogPayload::from(&entry);
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        self.emit(Event::Log(payload));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn stats(&self, stats: SessionStats) {
        self.emit(Event::Stats(stats));
    }

    /// Journal contents, oldest first
    pub fn recent(&self) -> Vec<LogEntry> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .cloned()
            .collect()
    }
}
