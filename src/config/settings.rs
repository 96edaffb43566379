//! Run configuration
//!
//! Defines every tunable of a farming run. The operator console sees these
//! through the flat parameter names in [`super::params`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::android::input::{CoordinateMap, TROOP_SLOT_COUNT};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Loot a base must offer before we attack it
    pub thresholds: LootThresholds,
    /// Idle time between attack cycles
    pub pause: PauseSettings,
    /// Waits after screen transitions
    pub delays: DelaySettings,
    /// Search budgets
    pub search: SearchSettings,
    /// Troop deployment
    pub deploy: DeploySettings,
    /// Where the remaining-troop badge sits relative to a slot
    pub troop_ocr: TroopOcrGeometry,
    /// Victory panel reading
    pub victory: VictorySettings,
    /// Army composition, informational
    pub troop_type: TroopType,
    /// Spend loot on a wall after each attack
    pub auto_wall_upgrade: bool,
    /// Screen positions of UI elements
    pub coords: CoordinateMap,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thresholds: LootThresholds::default(),
            pause: PauseSettings::default(),
            delays: DelaySettings::default(),
            search: SearchSettings::default(),
            deploy: DeploySettings::default(),
            troop_ocr: TroopOcrGeometry::default(),
            victory: VictorySettings::default(),
            troop_type: TroopType::Barbarian,
            auto_wall_upgrade: false,
            coords: CoordinateMap::new(),
        }
    }
}

/// Minimum loot of an acceptable base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootThresholds {
    pub min_gold: u64,
    pub min_elixir: u64,
    /// Only enforced when set above zero
    pub min_dark_elixir: u64,
}

impl Default for LootThresholds {
    fn default() -> Self {
        Self {
            min_gold: 200_000,
            min_elixir: 200_000,
            min_dark_elixir: 0,
        }
    }
}

/// How the pause between cycles is picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseMode {
    /// Halfway between min and max
    Midpoint,
    /// Uniformly between min and max
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseSettings {
    pub min: Duration,
    pub max: Duration,
    pub mode: PauseMode,
}

impl Default for PauseSettings {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(15),
            max: Duration::from_secs(15),
            mode: PauseMode::Midpoint,
        }
    }
}

/// Waits after taps that change screens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySettings {
    /// After the attack button, before the menu is usable
    pub after_attack_menu: Duration,
    /// After "Find a match", while clouds load the first base
    pub after_find_match: Duration,
    /// After "Next", while the next base loads
    pub after_next_village: Duration,
    /// Before reading a scouted base, so the loot counters settle
    pub before_ocr: Duration,
    /// After ending the battle, for the victory panel to animate in
    pub victory_screen: Duration,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            after_attack_menu: Duration::from_millis(3000),
            after_find_match: Duration::from_millis(5500),
            after_next_village: Duration::from_millis(3500),
            before_ocr: Duration::from_millis(1200),
            victory_screen: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    /// Bases scouted before the cycle is abandoned
    pub max_searches: u32,
    /// Time after which the current base is attacked regardless of loot
    pub force_attack_after: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_searches: 50,
            force_attack_after: Duration::from_secs(25),
        }
    }
}

/// How long a troop slot keeps being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Until the slot time budget runs out
    Timed,
    /// Until the slot badge reads zero or stops decreasing
    Ocr,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeploySettings {
    pub mode: DeployMode,
    /// Budget of the whole deployment phase
    pub total_limit: Duration,
    /// Budget of one slot
    pub slot_limit: Duration,
    /// Slots used, starting from the left
    pub slot_count: u8,
    /// Consecutive non-decreasing badge reads before a slot is given up
    pub max_stalled_checks: u32,
    /// Time the battle is left running after deployment
    pub wait_attack: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            mode: DeployMode::Timed,
            total_limit: Duration::from_secs(60),
            slot_limit: Duration::from_secs(6),
            slot_count: TROOP_SLOT_COUNT,
            max_stalled_checks: 3,
            wait_attack: Duration::from_secs(120),
        }
    }
}

/// Badge crop around a troop slot, in screen fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TroopOcrGeometry {
    pub crop_w: f64,
    pub crop_h: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for TroopOcrGeometry {
    fn default() -> Self {
        Self {
            crop_w: 0.06,
            crop_h: 0.06,
            offset_x: 0.0,
            offset_y: -0.03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VictorySettings {
    /// Attempts at reading the panel, 1 to 6
    pub ocr_retries: u32,
    /// Always save the panel and crops to the debug directory
    pub debug_capture: bool,
}

impl Default for VictorySettings {
    fn default() -> Self {
        Self {
            ocr_retries: 3,
            debug_capture: false,
        }
    }
}

/// Army composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TroopType {
    Barbarian,
    Archer,
    Goblin,
    Giant,
    Mixed,
}
