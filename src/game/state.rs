//! Run state representation
//!
//! Tracks which phase of the attack cycle the bot is in and whether it is
//! running or paused. Shared between the run loop and the operator channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Current phase of the attack cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No run in progress
    Idle,
    /// Making sure the home village is on screen
    DetectScreen,
    /// Navigating to matchmaking and skipping bases
    SearchVillage,
    /// Reading the loot of a scouted base
    AnalyzeVillage,
    /// Comparing the loot with the thresholds
    CheckCriteria,
    /// Committing to the attack
    StartAttack,
    /// Dropping troops, heroes and spells
    DeployTroops,
    /// Letting the battle play out
    WaitAttack,
    /// Ending the battle and reading the victory panel
    EndAttack,
    /// Back to the home village
    ReturnHome,
    /// Spending loot on a wall
    UpgradeWall,
    /// Idle time between cycles
    RandomPause,
}

impl Phase {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::DetectScreen => "detect_screen",
            Phase::SearchVillage => "search_village",
            Phase::AnalyzeVillage => "analyze_village",
            Phase::CheckCriteria => "check_criteria",
            Phase::StartAttack => "start_attack",
            Phase::DeployTroops => "deploy_troops",
            Phase::WaitAttack => "wait_attack",
            Phase::EndAttack => "end_attack",
            Phase::ReturnHome => "return_home",
            Phase::UpgradeWall => "upgrade_wall",
            Phase::RandomPause => "random_pause",
        }
    }
}

/// Coarse status reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
}

/// Flags of the current run.
///
/// `running` and `paused` are plain atomics so the operator channel can flip
/// them without waiting for the run loop. The cancellation token wakes any
/// sleep in progress when a stop is requested.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    paused: AtomicBool,
    phase: Mutex<Phase>,
    cancel: Mutex<CancellationToken>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Mark a run as started. Returns the token of the new run, or `None`
    /// if one is already running.
    pub fn begin(&self) -> Option<CancellationToken> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.paused.store(false, Ordering::SeqCst);
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        Some(token)
    }

    /// Ask the run to stop at its next checkpoint
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Pause the run. Returns false if nothing is running.
    pub fn pause(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.paused.store(true, Ordering::SeqCst);
        true
    }

    /// Resume a paused run. Returns false if it was not paused.
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RunStatus {
        match (self.is_running(), self.is_paused()) {
            (false, _) => RunStatus::Idle,
            (true, true) => RunStatus::Paused,
            (true, false) => RunStatus::Running,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to a new phase; returns the previous one
    pub fn set_phase(&self, phase: Phase) -> Phase {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *current, phase);
        if previous != phase {
            log::debug!("Phase: {} -> {}", previous.as_str(), phase.as_str());
        }
        previous
    }

    /// Called by the run loop once it has fully exited
    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.set_phase(Phase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_exclusive() {
        let state = RunState::new();
        let token = state.begin().unwrap();
        assert!(state.is_running());
        assert!(state.begin().is_none());

        state.request_stop();
        assert!(token.is_cancelled());
        assert!(!state.is_running());

        let second = state.begin().unwrap();
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_pause_and_resume() {
        let state = RunState::new();
        assert!(!state.pause());
        assert_eq!(state.status(), RunStatus::Idle);

        state.begin().unwrap();
        assert!(state.pause());
        assert_eq!(state.status(), RunStatus::Paused);
        assert!(state.resume());
        assert!(!state.resume());
        assert_eq!(state.status(), RunStatus::Running);
    }

    #[test]
    fn test_stop_clears_pause() {
        let state = RunState::new();
        state.begin().unwrap();
        state.pause();
        state.request_stop();
        assert!(!state.is_paused());
        assert_eq!(state.status(), RunStatus::Idle);
    }

    #[test]
    fn test_phase_transitions() {
        let state = RunState::new();
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.set_phase(Phase::SearchVillage), Phase::Idle);
        assert_eq!(state.set_phase(Phase::DeployTroops), Phase::SearchVillage);
        assert_eq!(state.phase(), Phase::DeployTroops);
        state.finish();
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn test_phase_wire_names_match_serde() {
        for phase in [Phase::DetectScreen, Phase::RandomPause, Phase::UpgradeWall] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
        }
    }
}
