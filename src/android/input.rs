//! Coordinate map and touch sequence generation
//!
//! UI elements are addressed by percentage of the screen so the same
//! calibration works on any emulator resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FarmAction;

/// Number of troop slots on the attack bar
pub const TROOP_SLOT_COUNT: u8 = 11;

/// Number of spell slots on the attack bar
pub const SPELL_SLOT_COUNT: u8 = 2;

/// A screen position expressed as fractions of width and height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert to device pixels. Values outside [0,1] are converted as-is.
    pub fn to_pixels(self, width: u32, height: u32) -> (i32, i32) {
        (
            (self.x * width as f64).round() as i32,
            (self.y * height as f64).round() as i32,
        )
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Calibratable UI elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UiElement {
    /// "Attack" button on the home village
    AttackButton,
    /// Confirmation "Attack!" shown on some layouts before matchmaking
    AttackMenu,
    /// "Find a match"
    FindMatch,
    /// Green "Attack!" that commits to the found base
    AttackStart,
    /// Legacy alias of `AttackStart`, kept calibratable
    AttackConfirm,
    /// "Next" village during search
    NextButton,
    /// "End battle"
    EndBattle,
    /// Confirmation dialog of "End battle"
    EndBattleConfirm,
    /// "Return home" on the victory panel
    ReturnHome,
    /// Close whatever window is open, used to back out of a search
    CloseWindow,
    /// Troop slot on the attack bar (1-based)
    TroopSlot(u8),
    /// Spell slot on the attack bar (1-based)
    SpellSlot(u8),
    /// A wall segment on the home village
    Wall,
    /// "Upgrade" button of the selected wall
    WallUpgrade,
    /// Confirmation of the wall upgrade
    WallUpgradeConfirm,
}

impl UiElement {
    /// Every element, in a stable order
    pub fn all() -> Vec<UiElement> {
        let mut elements = vec![
            UiElement::AttackButton,
            UiElement::AttackMenu,
            UiElement::FindMatch,
            UiElement::AttackStart,
            UiElement::AttackConfirm,
            UiElement::NextButton,
            UiElement::EndBattle,
            UiElement::EndBattleConfirm,
            UiElement::ReturnHome,
            UiElement::CloseWindow,
        ];
        elements.extend((1..=TROOP_SLOT_COUNT).map(UiElement::TroopSlot));
        elements.extend((1..=SPELL_SLOT_COUNT).map(UiElement::SpellSlot));
        elements.extend([
            UiElement::Wall,
            UiElement::WallUpgrade,
            UiElement::WallUpgradeConfirm,
        ]);
        elements
    }

    /// Built-in position, calibrated on a 16:9 BlueStacks layout
    pub fn default_point(self) -> Point {
        match self {
            UiElement::AttackButton => Point::new(0.04, 0.82),
            UiElement::AttackMenu => Point::new(0.12, 0.86),
            UiElement::FindMatch => Point::new(0.16, 0.78),
            UiElement::AttackStart | UiElement::AttackConfirm => Point::new(0.91, 0.88),
            UiElement::NextButton => Point::new(0.93, 0.70),
            UiElement::EndBattle => Point::new(0.04, 0.15),
            UiElement::EndBattleConfirm => Point::new(0.35, 0.55),
            UiElement::ReturnHome => Point::new(0.50, 0.88),
            UiElement::CloseWindow => Point::new(0.05, 0.05),
            UiElement::TroopSlot(n) => Point::new(0.06 + 0.08 * (n.max(1) - 1) as f64, 0.95),
            UiElement::SpellSlot(n) => Point::new(if n <= 1 { 0.86 } else { 0.94 }, 0.95),
            UiElement::Wall => Point::new(0.50, 0.50),
            UiElement::WallUpgrade => Point::new(0.60, 0.86),
            UiElement::WallUpgradeConfirm => Point::new(0.68, 0.78),
        }
    }

    /// Key prefix used by the operator console (`find_match` -> `find_match_x`)
    pub fn config_key(self) -> String {
        match self {
            UiElement::AttackButton => "attack_button".into(),
            UiElement::AttackMenu => "attack_menu".into(),
            UiElement::FindMatch => "find_match".into(),
            UiElement::AttackStart => "attack_start".into(),
            UiElement::AttackConfirm => "attack_confirm".into(),
            UiElement::NextButton => "next_button".into(),
            UiElement::EndBattle => "end_battle".into(),
            UiElement::EndBattleConfirm => "end_battle_confirm".into(),
            UiElement::ReturnHome => "return_home".into(),
            UiElement::CloseWindow => "close_window".into(),
            UiElement::TroopSlot(n) => format!("troop_slot_{n}"),
            UiElement::SpellSlot(n) => format!("spell_slot_{n}"),
            UiElement::Wall => "wall".into(),
            UiElement::WallUpgrade => "wall_upgrade".into(),
            UiElement::WallUpgradeConfirm => "wall_upgrade_confirm".into(),
        }
    }

    /// Inverse of [`UiElement::config_key`]
    pub fn from_config_key(key: &str) -> Option<UiElement> {
        UiElement::all()
            .into_iter()
            .find(|element| element.config_key() == key)
    }
}

impl fmt::Display for UiElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.config_key())
    }
}

/// Axis of a calibration override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Per-axis override of an element's built-in position
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

/// Resolves UI elements to screen percentages, honoring operator overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateMap {
    overrides: BTreeMap<UiElement, Calibration>,
}

impl CoordinateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of an element: configured axis if present, built-in otherwise
    pub fn resolve(&self, element: UiElement) -> Point {
        let base = element.default_point();
        match self.overrides.get(&element) {
            Some(calibration) => Point::new(
                calibration.x.unwrap_or(base.x),
                calibration.y.unwrap_or(base.y),
            ),
            None => base,
        }
    }

    /// Override one axis; values are clamped to [0,1]
    pub fn calibrate(&mut self, element: UiElement, axis: Axis, value: f64) {
        let value = value.clamp(0.0, 1.0);
        let calibration = self.overrides.entry(element).or_default();
        match axis {
            Axis::X => calibration.x = Some(value),
            Axis::Y => calibration.y = Some(value),
        }
    }
}

/// Fixed drop points: left and right funnel edges interleaved, then the center entry.
/// Interleaving guarantees both sides get units even when the slot budget is short.
pub const DEPLOY_PLAN: [Point; 7] = [
    Point::new(0.16, 0.36),
    Point::new(0.84, 0.36),
    Point::new(0.16, 0.46),
    Point::new(0.84, 0.46),
    Point::new(0.16, 0.56),
    Point::new(0.84, 0.56),
    Point::new(0.50, 0.70),
];

/// Hero slots sit on the right side of the attack bar
pub const HERO_SLOTS: [Point; 4] = [
    Point::new(0.70, 0.95),
    Point::new(0.76, 0.95),
    Point::new(0.82, 0.95),
    Point::new(0.88, 0.95),
];

/// Where heroes are released
pub const HERO_DROP: Point = Point::new(0.50, 0.68);

/// Where spells are released, slightly above the center
pub const SPELL_DROP: Point = Point::new(0.52, 0.58);

/// Settle time after a confirmation tap
pub const CONFIRM_DELAY: Duration = Duration::from_millis(1000);

/// Builds the tap sequences of each screen transition
pub struct InputGenerator<'a> {
    coords: &'a CoordinateMap,
}

impl<'a> InputGenerator<'a> {
    pub fn new(coords: &'a CoordinateMap) -> Self {
        Self { coords }
    }

    fn tap(&self, element: UiElement) -> FarmAction {
        FarmAction::Tap {
            element: Some(element),
            point: self.coords.resolve(element),
        }
    }

    /// Home village -> matchmaking.
    ///
    /// Some layouts show an extra "Attack!" before "Find a match" and another
    /// right after it; both are tapped unconditionally since a tap on an
    /// absent control is harmless.
    pub fn to_matchmaking(&self, after_attack_menu: Duration, after_find_match: Duration) -> Vec<FarmAction> {
        vec![
            self.tap(UiElement::AttackButton),
            FarmAction::Wait(after_attack_menu),
            self.tap(UiElement::AttackMenu),
            FarmAction::Wait(CONFIRM_DELAY),
            self.tap(UiElement::FindMatch),
            FarmAction::Wait(after_find_match),
            self.tap(UiElement::AttackStart),
            FarmAction::Wait(CONFIRM_DELAY),
        ]
    }

    /// Skip the current base
    pub fn next_village(&self, after_next: Duration) -> Vec<FarmAction> {
        vec![self.tap(UiElement::NextButton), FarmAction::Wait(after_next)]
    }

    /// Back out of an unsuccessful search
    pub fn abandon_search(&self) -> Vec<FarmAction> {
        vec![
            self.tap(UiElement::CloseWindow),
            FarmAction::Wait(Duration::from_secs(2)),
        ]
    }

    /// Enter the battle on the accepted base
    pub fn commit_attack(&self) -> Vec<FarmAction> {
        vec![
            self.tap(UiElement::AttackStart),
            FarmAction::Wait(Duration::from_secs(2)),
        ]
    }

    /// Surrender the battle and confirm; the victory panel follows
    pub fn end_battle(&self) -> Vec<FarmAction> {
        vec![
            self.tap(UiElement::EndBattle),
            FarmAction::Wait(CONFIRM_DELAY),
            self.tap(UiElement::EndBattleConfirm),
        ]
    }

    pub fn return_home(&self) -> Vec<FarmAction> {
        vec![
            self.tap(UiElement::ReturnHome),
            FarmAction::Wait(Duration::from_secs(3)),
        ]
    }

    /// Select a hero and release it, for every hero slot
    pub fn heroes(&self) -> Vec<FarmAction> {
        let mut actions = Vec::new();
        for slot in HERO_SLOTS {
            actions.push(FarmAction::Tap { element: None, point: slot });
            actions.push(FarmAction::Wait(Duration::from_millis(250)));
            actions.push(FarmAction::Tap { element: None, point: HERO_DROP });
            actions.push(FarmAction::Wait(Duration::from_millis(200)));
        }
        actions
    }

    /// Select each spell slot and cast it
    pub fn spells(&self) -> Vec<FarmAction> {
        let mut actions = Vec::new();
        for n in 1..=SPELL_SLOT_COUNT {
            actions.push(self.tap(UiElement::SpellSlot(n)));
            actions.push(FarmAction::Wait(Duration::from_millis(200)));
            actions.push(FarmAction::Tap { element: None, point: SPELL_DROP });
            actions.push(FarmAction::Wait(Duration::from_millis(150)));
        }
        actions
    }

    /// Select a wall, press upgrade and confirm
    pub fn upgrade_wall(&self) -> Vec<FarmAction> {
        vec![
            self.tap(UiElement::Wall),
            FarmAction::Wait(CONFIRM_DELAY),
            self.tap(UiElement::WallUpgrade),
            FarmAction::Wait(CONFIRM_DELAY),
            self.tap(UiElement::WallUpgradeConfirm),
            FarmAction::Wait(CONFIRM_DELAY),
        ]
    }
}
