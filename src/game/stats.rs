//! Session statistics

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::vision::ResourceCounts;

/// Totals since the session started.
///
/// Serialized as-is into the `stats` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub attacks_completed: u64,
    pub gold_collected: u64,
    pub elixir_collected: u64,
    pub dark_elixir_collected: u64,
    pub walls_upgraded: u64,
    pub villages_searched: u64,
    /// Set by the first start after a reset
    pub session_started_at: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished attack and its loot
    pub fn record_attack(&mut self, loot: &ResourceCounts) {
        self.attacks_completed += 1;
        self.gold_collected = self.gold_collected.saturating_add(loot.gold);
        self.elixir_collected = self.elixir_collected.saturating_add(loot.elixir);
        self.dark_elixir_collected = self.dark_elixir_collected.saturating_add(loot.dark_elixir);
    }

    pub fn record_search(&mut self) {
        self.villages_searched += 1;
    }

    pub fn record_wall(&mut self) {
        self.walls_upgraded += 1;
    }

    /// Stamp the session start unless it is already running
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.session_started_at.get_or_insert(now);
    }
}

/// Stats shared between the run loop and the operator channel
#[derive(Debug, Clone, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<SessionStats>>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate under the lock and return a copy of the result
    pub fn update(&self, f: impl FnOnce(&mut SessionStats)) -> SessionStats {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
        stats.clone()
    }

    pub fn snapshot(&self) -> SessionStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Zero every counter and clear the session start
    pub fn reset(&self) -> SessionStats {
        self.update(|stats| *stats = SessionStats::new())
    }
}
