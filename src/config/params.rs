//! Flat parameter view of [`RunConfig`]
//!
//! The operator console speaks in flat snake_case keys (`min_gold`,
//! `delay_before_ocr_ms`, `find_match_x`, ...). Incoming maps are parsed
//! into a [`ConfigPatch`] so a bad key never leaves the config half-updated.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::settings::{DeployMode, PauseMode, RunConfig, TroopType};
use super::ConfigError;
use crate::android::input::{Axis, UiElement, TROOP_SLOT_COUNT};

/// Longest duration accepted from the outside
const MAX_SECONDS: f64 = 86_400.0 * 7.0;

/// One validated change
#[derive(Debug, Clone, PartialEq)]
enum Change {
    MinGold(u64),
    MinElixir(u64),
    MinDarkElixir(u64),
    PauseMin(Duration),
    PauseMax(Duration),
    PauseMode(PauseMode),
    AfterAttackMenu(Duration),
    AfterFindMatch(Duration),
    AfterNextVillage(Duration),
    BeforeOcr(Duration),
    VictoryScreen(Duration),
    MaxSearches(u32),
    ForceAttackAfter(Duration),
    DeployLimit(Duration),
    SlotLimit(Duration),
    SlotCount(u8),
    DeployMode(DeployMode),
    MaxStalledChecks(u32),
    WaitAttack(Duration),
    TroopCropW(f64),
    TroopCropH(f64),
    TroopOffsetX(f64),
    TroopOffsetY(f64),
    VictoryRetries(u32),
    VictoryDebug(bool),
    TroopType(TroopType),
    AutoWallUpgrade(bool),
    Coordinate(UiElement, Axis, f64),
}

/// A set of validated changes, applied all at once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    changes: Vec<(String, Change)>,
}

impl ConfigPatch {
    /// Parse a parameter map. Unknown keys and bad values are returned
    /// separately and do not prevent the valid keys from being applied.
    pub fn from_params(params: &Map<String, Value>) -> (Self, Vec<ConfigError>) {
        let mut patch = ConfigPatch::default();
        let mut rejected = Vec::new();
        for (key, value) in params {
            match parse_change(key, value) {
                Ok(change) => patch.changes.push((key.clone(), change)),
                Err(e) => rejected.push(e),
            }
        }
        (patch, rejected)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Keys this patch changes
    pub fn keys(&self) -> Vec<&str> {
        self.changes.iter().map(|(key, _)| key.as_str()).collect()
    }
}

impl RunConfig {
    /// Apply a patch; fields it does not name are left untouched
    pub fn apply(&mut self, patch: &ConfigPatch) {
        for (_, change) in &patch.changes {
            match *change {
                Change::MinGold(v) => self.thresholds.min_gold = v,
                Change::MinElixir(v) => self.thresholds.min_elixir = v,
                Change::MinDarkElixir(v) => self.thresholds.min_dark_elixir = v,
                Change::PauseMin(v) => self.pause.min = v,
                Change::PauseMax(v) => self.pause.max = v,
                Change::PauseMode(v) => self.pause.mode = v,
                Change::AfterAttackMenu(v) => self.delays.after_attack_menu = v,
                Change::AfterFindMatch(v) => self.delays.after_find_match = v,
                Change::AfterNextVillage(v) => self.delays.after_next_village = v,
                Change::BeforeOcr(v) => self.delays.before_ocr = v,
                Change::VictoryScreen(v) => self.delays.victory_screen = v,
                Change::MaxSearches(v) => self.search.max_searches = v,
                Change::ForceAttackAfter(v) => self.search.force_attack_after = v,
                Change::DeployLimit(v) => self.deploy.total_limit = v,
                Change::SlotLimit(v) => self.deploy.slot_limit = v,
                Change::SlotCount(v) => self.deploy.slot_count = v,
                Change::DeployMode(v) => self.deploy.mode = v,
                Change::MaxStalledChecks(v) => self.deploy.max_stalled_checks = v,
                Change::WaitAttack(v) => self.deploy.wait_attack = v,
                Change::TroopCropW(v) => self.troop_ocr.crop_w = v,
                Change::TroopCropH(v) => self.troop_ocr.crop_h = v,
                Change::TroopOffsetX(v) => self.troop_ocr.offset_x = v,
                Change::TroopOffsetY(v) => self.troop_ocr.offset_y = v,
                Change::VictoryRetries(v) => self.victory.ocr_retries = v,
                Change::VictoryDebug(v) => self.victory.debug_capture = v,
                Change::TroopType(v) => self.troop_type = v,
                Change::AutoWallUpgrade(v) => self.auto_wall_upgrade = v,
                Change::Coordinate(element, axis, v) => self.coords.calibrate(element, axis, v),
            }
        }
    }

    /// Every parameter under its external name
    pub fn to_params(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };
        let ms = |d: Duration| Value::from(d.as_millis() as u64);
        let secs = |d: Duration| Value::from(d.as_secs_f64());

        put("min_gold", self.thresholds.min_gold.into());
        put("min_elixir", self.thresholds.min_elixir.into());
        put("min_dark_elixir", self.thresholds.min_dark_elixir.into());
        put("pause_min", secs(self.pause.min));
        put("pause_max", secs(self.pause.max));
        put("pause_mode", enum_value(&self.pause.mode));
        put("delay_after_attack_menu_ms", ms(self.delays.after_attack_menu));
        put("delay_after_find_match_ms", ms(self.delays.after_find_match));
        put("delay_after_next_village_ms", ms(self.delays.after_next_village));
        put("delay_before_ocr_ms", ms(self.delays.before_ocr));
        put("victory_screen_wait_s", secs(self.delays.victory_screen));
        put("max_searches", self.search.max_searches.into());
        put("force_attack_after_s", secs(self.search.force_attack_after));
        put("deploy_limit_s", secs(self.deploy.total_limit));
        put("deploy_slot_limit_s", secs(self.deploy.slot_limit));
        put("troop_slots_count", self.deploy.slot_count.into());
        put("deploy_mode", enum_value(&self.deploy.mode));
        put("max_stalled_checks", self.deploy.max_stalled_checks.into());
        put("wait_attack_s", secs(self.deploy.wait_attack));
        put("troop_ocr_crop_w", self.troop_ocr.crop_w.into());
        put("troop_ocr_crop_h", self.troop_ocr.crop_h.into());
        put("troop_ocr_offset_x", self.troop_ocr.offset_x.into());
        put("troop_ocr_offset_y", self.troop_ocr.offset_y.into());
        put("victory_ocr_retries", self.victory.ocr_retries.into());
        put("victory_ocr_debug", self.victory.debug_capture.into());
        put("troop_type", enum_value(&self.troop_type));
        put("auto_wall_upgrade", self.auto_wall_upgrade.into());

        for element in UiElement::all() {
            let point = self.coords.resolve(element);
            let key = element.config_key();
            put(&format!("{key}_x"), point.x.into());
            put(&format!("{key}_y"), point.y.into());
        }
        map
    }
}

fn enum_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn parse_change(key: &str, value: &Value) -> Result<Change, ConfigError> {
    let change = match key {
        "min_gold" => Change::MinGold(amount(key, value)?),
        "min_elixir" => Change::MinElixir(amount(key, value)?),
        "min_dark_elixir" => Change::MinDarkElixir(amount(key, value)?),
        "pause_min" => Change::PauseMin(seconds(key, value)?),
        "pause_max" => Change::PauseMax(seconds(key, value)?),
        "pause_mode" => Change::PauseMode(choice(key, value)?),
        "delay_after_attack_menu_ms" => Change::AfterAttackMenu(millis(key, value)?),
        "delay_after_find_match_ms" => Change::AfterFindMatch(millis(key, value)?),
        "delay_after_next_village_ms" => Change::AfterNextVillage(millis(key, value)?),
        "delay_before_ocr_ms" => Change::BeforeOcr(millis(key, value)?),
        "victory_screen_wait_s" => Change::VictoryScreen(seconds(key, value)?),
        "max_searches" => Change::MaxSearches(count(key, value)?),
        "force_attack_after_s" => Change::ForceAttackAfter(seconds(key, value)?),
        "deploy_limit_s" => Change::DeployLimit(seconds(key, value)?),
        "deploy_slot_limit_s" => Change::SlotLimit(seconds(key, value)?),
        "troop_slots_count" => {
            Change::SlotCount(count(key, value)?.clamp(1, TROOP_SLOT_COUNT as u32) as u8)
        }
        "deploy_mode" => Change::DeployMode(choice(key, value)?),
        "max_stalled_checks" => Change::MaxStalledChecks(count(key, value)?.max(1)),
        "wait_attack_s" => Change::WaitAttack(seconds(key, value)?),
        "troop_ocr_crop_w" => Change::TroopCropW(fraction(key, value)?),
        "troop_ocr_crop_h" => Change::TroopCropH(fraction(key, value)?),
        "troop_ocr_offset_x" => Change::TroopOffsetX(number(key, value)?.clamp(-1.0, 1.0)),
        "troop_ocr_offset_y" => Change::TroopOffsetY(number(key, value)?.clamp(-1.0, 1.0)),
        "victory_ocr_retries" => Change::VictoryRetries(count(key, value)?.clamp(1, 6)),
        "victory_ocr_debug" => Change::VictoryDebug(flag(key, value)?),
        "troop_type" => Change::TroopType(choice(key, value)?),
        "auto_wall_upgrade" => Change::AutoWallUpgrade(flag(key, value)?),
        _ => match coordinate_key(key) {
            Some((element, axis)) => Change::Coordinate(element, axis, fraction(key, value)?),
            None => return Err(ConfigError::UnknownKey(key.to_string())),
        },
    };
    Ok(change)
}

/// `find_match_x` -> (FindMatch, X)
fn coordinate_key(key: &str) -> Option<(UiElement, Axis)> {
    let (name, axis) = if let Some(name) = key.strip_suffix("_x") {
        (name, Axis::X)
    } else {
        (key.strip_suffix("_y")?, Axis::Y)
    };
    UiElement::from_config_key(name).map(|element| (element, axis))
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Finite number; numeric strings are accepted too
fn number(key: &str, value: &Value) -> Result<f64, ConfigError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(key, format!("expected a number, got {value}")))?;
    if !n.is_finite() {
        return Err(invalid(key, "must be finite"));
    }
    Ok(n)
}

fn non_negative(key: &str, value: &Value) -> Result<f64, ConfigError> {
    let n = number(key, value)?;
    if n < 0.0 {
        return Err(invalid(key, "must not be negative"));
    }
    Ok(n)
}

fn amount(key: &str, value: &Value) -> Result<u64, ConfigError> {
    Ok(non_negative(key, value)?.round() as u64)
}

fn count(key: &str, value: &Value) -> Result<u32, ConfigError> {
    let n = non_negative(key, value)?.round();
    if n > u32::MAX as f64 {
        return Err(invalid(key, "too large"));
    }
    Ok(n as u32)
}

fn seconds(key: &str, value: &Value) -> Result<Duration, ConfigError> {
    let n = non_negative(key, value)?;
    if n > MAX_SECONDS {
        return Err(invalid(key, "too large"));
    }
    Ok(Duration::from_secs_f64(n))
}

fn millis(key: &str, value: &Value) -> Result<Duration, ConfigError> {
    let n = non_negative(key, value)?;
    if n > MAX_SECONDS * 1000.0 {
        return Err(invalid(key, "too large"));
    }
    Ok(Duration::from_millis(n.round() as u64))
}

fn fraction(key: &str, value: &Value) -> Result<f64, ConfigError> {
    Ok(number(key, value)?.clamp(0.0, 1.0))
}

fn flag(key: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(false),
        Value::Number(n) if n.as_f64() == Some(1.0) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(true),
            "false" | "0" | "off" | "no" => Ok(false),
            _ => Err(invalid(key, format!("expected a boolean, got {value}"))),
        },
        _ => Err(invalid(key, format!("expected a boolean, got {value}"))),
    }
}

fn choice<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, ConfigError> {
    let normalized = match value {
        Value::String(s) => Value::String(s.trim().to_ascii_lowercase()),
        other => other.clone(),
    };
    serde_json::from_value(normalized).map_err(|_| invalid(key, format!("unsupported value {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::android::Point;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_partial_update_changes_only_named_fields() {
        let mut config = RunConfig::default();
        let before = config.to_params();

        let (patch, rejected) = ConfigPatch::from_params(&params(json!({
            "min_gold": 300000,
            "delay_before_ocr_ms": 800,
            "find_match_x": 0.2
        })));
        assert!(rejected.is_empty());
        config.apply(&patch);

        let after = config.to_params();
        let changed: Vec<&String> = after
            .iter()
            .filter(|(key, value)| before.get(*key) != Some(*value))
            .map(|(key, _)| key)
            .collect();
        assert_eq!(changed.len(), 3);
        assert_eq!(after["min_gold"], json!(300000));
        assert_eq!(after["delay_before_ocr_ms"], json!(800));
        assert_eq!(config.coords.resolve(UiElement::FindMatch), Point::new(0.2, 0.78));
    }

    #[test]
    fn test_empty_patch_is_a_no_op() {
        let mut config = RunConfig::default();
        let (patch, rejected) = ConfigPatch::from_params(&Map::new());
        assert!(patch.is_empty());
        assert!(rejected.is_empty());
        config.apply(&patch);
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_bad_keys_are_reported_and_skipped() {
        let mut config = RunConfig::default();
        let (patch, rejected) = ConfigPatch::from_params(&params(json!({
            "min_elixir": 250000,
            "min_gold": -5,
            "pause_mode": "sometimes",
            "warp_drive": true
        })));
        assert_eq!(patch.keys(), vec!["min_elixir"]);
        assert_eq!(rejected.len(), 3);
        assert!(rejected
            .iter()
            .any(|e| matches!(e, ConfigError::UnknownKey(k) if k == "warp_drive")));

        config.apply(&patch);
        assert_eq!(config.thresholds.min_elixir, 250_000);
        assert_eq!(config.thresholds.min_gold, 200_000);
    }

    #[test]
    fn test_values_are_clamped() {
        let mut config = RunConfig::default();
        let (patch, rejected) = ConfigPatch::from_params(&params(json!({
            "troop_slots_count": 40,
            "victory_ocr_retries": 0,
            "next_button_y": 1.4
        })));
        assert!(rejected.is_empty());
        config.apply(&patch);
        assert_eq!(config.deploy.slot_count, 11);
        assert_eq!(config.victory.ocr_retries, 1);
        assert_eq!(config.coords.resolve(UiElement::NextButton).y, 1.0);
    }

    #[test]
    fn test_lenient_value_forms() {
        let mut config = RunConfig::default();
        let (patch, rejected) = ConfigPatch::from_params(&params(json!({
            "min_gold": "150000",
            "auto_wall_upgrade": "on",
            "troop_type": "Archer",
            "pause_max": 30.5
        })));
        assert!(rejected.is_empty());
        config.apply(&patch);
        assert_eq!(config.thresholds.min_gold, 150_000);
        assert!(config.auto_wall_upgrade);
        assert_eq!(config.troop_type, TroopType::Archer);
        assert_eq!(config.pause.max, Duration::from_millis(30_500));
    }

    #[test]
    fn test_params_round_trip() {
        let mut config = RunConfig::default();
        config.thresholds.min_dark_elixir = 2_500;
        config.search.max_searches = 80;
        config.pause.mode = PauseMode::Random;
        config.coords.calibrate(UiElement::TroopSlot(3), Axis::Y, 0.9);
        let exported = config.to_params();

        let (patch, rejected) = ConfigPatch::from_params(&exported);
        assert!(rejected.is_empty(), "{rejected:?}");

        let mut restored = RunConfig::default();
        restored.apply(&patch);
        assert_eq!(restored.to_params(), exported);
    }

    #[test]
    fn test_coordinate_keys() {
        assert_eq!(
            coordinate_key("troop_slot_11_x"),
            Some((UiElement::TroopSlot(11), Axis::X))
        );
        assert_eq!(
            coordinate_key("end_battle_confirm_y"),
            Some((UiElement::EndBattleConfirm, Axis::Y))
        );
        assert_eq!(coordinate_key("min_gold"), None);
        assert_eq!(coordinate_key("wall"), None);
    }
}
