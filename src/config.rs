//! Controller settings.
//!
//! Strongly-typed configuration loaded with Figment from, in order of
//! precedence:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`cryoswitch.toml` next to the working directory, or an
//!    explicit path),
//! 3. environment variables prefixed with `CRYOSWITCH_`
//!    (e.g. `CRYOSWITCH_TIMEOUT_MS=2000`).
//!
//! Settings cover the ambient behavior of the driver: deadlines, settle
//! times, where the persistent artifacts live and which of them are
//! enabled. Per-hardware calibration lives in `constants.json`, not here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default settings file name.
pub const DEFAULT_CONFIG_FILE: &str = "cryoswitch.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Reply deadline for every transport exchange, milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Settle time between selecting an ADC channel and reading it.
    #[serde(default = "default_adc_settle_ms")]
    pub adc_settle_ms: u64,

    /// Settle time after programming the converter output voltage.
    #[serde(default = "default_converter_settle_ms")]
    pub converter_settle_ms: u64,

    /// Settle time after toggling a supply rail.
    #[serde(default = "default_supply_settle_ms")]
    pub supply_settle_ms: u64,

    /// Directory for waveform JSON files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Switch-state table location.
    #[serde(default = "default_states_file")]
    pub states_file: PathBuf,

    /// Pulse log location.
    #[serde(default = "default_pulse_log_file")]
    pub pulse_log_file: PathBuf,

    /// External calibration table; the built-in table is used when unset.
    #[serde(default)]
    pub constants_file: Option<PathBuf>,

    /// Persist switch states after every pulse.
    #[serde(default = "default_true")]
    pub track_states: bool,

    /// Append one line per pulse to the pulse log.
    #[serde(default = "default_true")]
    pub pulse_logging: bool,

    /// Write each pulse's waveform to its own JSON file.
    #[serde(default = "default_true")]
    pub log_waveforms: bool,

    /// Annotate pulses whose peak current stays below this, milliamps.
    #[serde(default = "default_warning_threshold_ma")]
    pub warning_threshold_ma: f64,

    /// Pulses shown by the history command when no count is given.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Relative tolerance for voltage read-back verification.
    #[serde(default = "default_voltage_tolerance")]
    pub voltage_tolerance: f64,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_adc_settle_ms() -> u64 {
    500
}

fn default_converter_settle_ms() -> u64 {
    2000
}

fn default_supply_settle_ms() -> u64 {
    1000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_states_file() -> PathBuf {
    PathBuf::from("states.json")
}

fn default_pulse_log_file() -> PathBuf {
    PathBuf::from("pulse_logging.txt")
}

fn default_true() -> bool {
    true
}

fn default_warning_threshold_ma() -> f64 {
    60.0
}

fn default_history_limit() -> usize {
    5
}

fn default_voltage_tolerance() -> f64 {
    0.15
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            adc_settle_ms: default_adc_settle_ms(),
            converter_settle_ms: default_converter_settle_ms(),
            supply_settle_ms: default_supply_settle_ms(),
            data_dir: default_data_dir(),
            states_file: default_states_file(),
            pulse_log_file: default_pulse_log_file(),
            constants_file: None,
            track_states: default_true(),
            pulse_logging: default_true(),
            log_waveforms: default_true(),
            warning_threshold_ma: default_warning_threshold_ma(),
            history_limit: default_history_limit(),
            voltage_tolerance: default_voltage_tolerance(),
        }
    }
}

impl Settings {
    /// Load settings, merging defaults, an optional TOML file and
    /// environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let toml_path = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(toml_path))
            .merge(Env::prefixed("CRYOSWITCH_"))
            .extract()?;
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn adc_settle(&self) -> Duration {
        Duration::from_millis(self.adc_settle_ms)
    }

    pub fn converter_settle(&self) -> Duration {
        Duration::from_millis(self.converter_settle_ms)
    }

    pub fn supply_settle(&self) -> Duration {
        Duration::from_millis(self.supply_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_hardware_expectations() {
        let settings = Settings::default();
        assert_eq!(settings.timeout(), Duration::from_secs(5));
        assert_eq!(settings.warning_threshold_ma, 60.0);
        assert!(settings.track_states);
        assert_eq!(settings.history_limit, 5);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cryoswitch.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "timeout_ms = 1200").unwrap();
        writeln!(file, "warning_threshold_ma = 40.0").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.timeout_ms, 1200);
        assert_eq!(settings.warning_threshold_ma, 40.0);
        // Untouched keys keep their defaults.
        assert_eq!(settings.adc_settle_ms, 500);
    }

    #[test]
    #[serial_test::serial]
    fn environment_overrides_file() {
        std::env::set_var("CRYOSWITCH_HISTORY_LIMIT", "9");
        let settings = Settings::load(None).unwrap();
        std::env::remove_var("CRYOSWITCH_HISTORY_LIMIT");
        assert_eq!(settings.history_limit, 9);
    }
}
