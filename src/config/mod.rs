//! Configuration module
//!
//! Handles run settings, their external parameter names and the shared
//! copy read by the run loop.

pub mod params;
pub mod settings;

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

pub use params::ConfigPatch;
pub use settings::{
    DelaySettings, DeployMode, DeploySettings, LootThresholds, PauseMode, PauseSettings,
    RunConfig, SearchSettings, TroopOcrGeometry, TroopType, VictorySettings,
};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown parameter: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config file must contain a JSON object")]
    NotAnObject,
}

/// Load a JSON parameter file on top of the defaults.
///
/// Returns the config together with the keys that were rejected.
pub fn load_file(path: &Path) -> Result<(RunConfig, Vec<ConfigError>), ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let Value::Object(map) = serde_json::from_str::<Value>(&text)? else {
        return Err(ConfigError::NotAnObject);
    };
    let (patch, rejected) = ConfigPatch::from_params(&map);
    let mut config = RunConfig::default();
    config.apply(&patch);
    Ok((config, rejected))
}

/// Configuration shared between the operator channel and the run loop.
///
/// The run loop takes a snapshot at the start of each phase, so an update
/// lands at the next phase boundary and never mid-phase.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<RunConfig>>,
}

impl SharedConfig {
    pub fn new(config: RunConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> RunConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge a parameter map; returns the applied keys and the rejections
    pub fn update(&self, params: &Map<String, Value>) -> (Vec<String>, Vec<ConfigError>) {
        let (patch, rejected) = ConfigPatch::from_params(params);
        if !patch.is_empty() {
            self.inner
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(&patch);
        }
        let applied = patch.keys().into_iter().map(String::from).collect();
        (applied, rejected)
    }

    /// Current parameters under their external names
    pub fn to_params(&self) -> Map<String, Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_params()
    }
}
