//! Configuration for the plethysmography batch pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workbook holding the per-animal metadata (IDs, weights, event times)
    pub info_path: PathBuf,

    /// Sheet of the metadata workbook to read
    pub sheet_name: String,

    /// Directory containing the raw `.smr`/`.smrx` recordings
    pub recordings_dir: PathBuf,

    /// Directory the feature workbook (and plots) are written to
    pub output_dir: PathBuf,

    /// Suffix for the output workbook name (`YYYYMMDD-<suffix>.xlsx`)
    pub suffix: String,

    /// Experimental events to slice out of each recording
    pub events: Vec<EventSpec>,

    /// Minutes of signal taken before every event window
    pub pre_interval_min: f64,

    /// Minutes of signal taken after a challenge event
    pub post_interval_min: f64,

    /// Epoch length in seconds for subdividing challenge windows
    pub epoch_length_secs: f64,

    /// Optional baseline feature workbook for percent-change columns
    #[serde(default)]
    pub baseline_path: Option<PathBuf>,

    /// Sheet of the baseline workbook to read
    #[serde(default = "default_sheet")]
    pub baseline_sheet: String,

    /// Breathing rate above which peaks count as sniffing (breaths/min)
    pub max_sniff_bpm: f64,

    /// Signal plot rendering
    #[serde(default)]
    pub plot: PlotConfig,
}

fn default_sheet() -> String {
    "Sheet1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        let cwd = PathBuf::from(".");

        Self {
            info_path: cwd.join("info_dir").join("time_sync.xlsx"),
            sheet_name: default_sheet(),
            recordings_dir: cwd.join("smr_files"),
            output_dir: cwd.join("output"),
            suffix: "resp_bx".to_string(),
            events: vec![EventSpec::new("event")],
            pre_interval_min: 5.0,
            post_interval_min: 5.0,
            epoch_length_secs: 20.0,
            baseline_path: None,
            baseline_sheet: default_sheet(),
            max_sniff_bpm: 150.0,
            plot: PlotConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    /// when no file exists yet.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;

        std::fs::write(&config_path, content)
            .map_err(|e| ConfigError::Io(config_path.clone(), e))?;

        Ok(())
    }

    /// Path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pleth-batch")
            .join("config.json")
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.events.is_empty() {
            return Err(ConfigError::NoEvents);
        }
        if self.pre_interval_min < 0.0 || self.post_interval_min < 0.0 {
            return Err(ConfigError::NegativeInterval);
        }
        if self.epoch_length_secs <= 0.0 {
            return Err(ConfigError::BadEpochLength(self.epoch_length_secs));
        }
        Ok(())
    }
}

/// One experimental event to analyze.
///
/// Challenge events additionally get a post-event window and have all of
/// their windows subdivided into fixed-length epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    /// Name of the event; the metadata workbook must carry
    /// `<name>_start` and `<name>_end` columns in seconds.
    pub name: String,
    #[serde(default)]
    pub challenge: bool,
}

impl EventSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            challenge: false,
        }
    }

    pub fn challenge(name: &str) -> Self {
        Self {
            name: name.to_string(),
            challenge: true,
        }
    }
}

/// Signal plot settings.
///
/// When `start_secs`/`end_secs` are set, analysis of every recording is
/// cropped to that range before processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start_secs: Option<f64>,
    #[serde(default)]
    pub end_secs: Option<f64>,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not access {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("could not parse configuration: {0}")]
    Parse(String),
    #[error("at least one event must be configured")]
    NoEvents,
    #[error("pre/post intervals must not be negative")]
    NegativeInterval,
    #[error("epoch length must be positive, got {0}")]
    BadEpochLength(f64),
}
