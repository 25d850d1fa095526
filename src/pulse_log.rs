//! Pulse event logging.
//!
//! Two artifacts are produced per successful actuation:
//!
//! - a one-line record appended to `pulse_logging.txt`, e.g.
//!   `Connect    -> Port:A-3, CurrentMax:72 Timestamp:1722945600`, with a
//!   ` *Warnings: Low current detected!` suffix when the peak stayed under
//!   the warning threshold;
//! - optionally, the full waveform serialized to its own timestamped JSON
//!   file named `<epoch>_<voltage>V_<port><contact>_<polarity>.json`.
//!
//! Both are append-only; nothing here rewrites history.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::board::Port;
use crate::error::{Result, SwitchError};

/// Warning annotation appended to low-current pulses.
pub const LOW_CURRENT_WARNING: &str = "Low current detected!";

/// Direction of a recorded pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseDirection {
    Connect,
    Disconnect,
}

impl PulseDirection {
    pub fn from_polarity(polarity: bool) -> Self {
        if polarity {
            PulseDirection::Connect
        } else {
            PulseDirection::Disconnect
        }
    }

    fn label(self) -> &'static str {
        match self {
            PulseDirection::Connect => "Connect",
            PulseDirection::Disconnect => "Disconnect",
        }
    }
}

/// One parsed line of the pulse log.
#[derive(Debug, Clone)]
pub struct PulseRecord {
    pub direction: PulseDirection,
    pub port: char,
    pub contact: u8,
    pub max_current_ma: f64,
    pub timestamp: i64,
    pub warning: Option<String>,
}

/// Append-only pulse log.
#[derive(Debug, Clone)]
pub struct PulseLog {
    path: PathBuf,
    warning_threshold_ma: f64,
}

impl PulseLog {
    pub fn new(path: impl Into<PathBuf>, warning_threshold_ma: f64) -> Self {
        Self {
            path: path.into(),
            warning_threshold_ma,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log file when it does not exist yet.
    pub fn init(&self) -> Result<()> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::File::create(&self.path)?;
        }
        Ok(())
    }

    /// Append one pulse record.
    pub fn append(
        &self,
        port: Port,
        contact: u8,
        polarity: bool,
        max_current_ma: f64,
        timestamp: i64,
    ) -> Result<()> {
        let direction = PulseDirection::from_polarity(polarity);
        let mut line = format!(
            "{:<11}-> Port:{}-{}, CurrentMax:{} Timestamp:{}",
            direction.label(),
            port,
            contact,
            max_current_ma.round() as i64,
            timestamp
        );
        if max_current_ma < self.warning_threshold_ma {
            line.push_str(&format!(" *Warnings: {LOW_CURRENT_WARNING}"));
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Most recent records, newest first, optionally filtered by port.
    pub fn history(&self, port: Option<Port>, limit: usize) -> Result<Vec<PulseRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in text.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_line(line)?;
            if let Some(filter) = port {
                if record.port != filter.letter() {
                    continue;
                }
            }
            records.push(record);
            if records.len() >= limit {
                break;
            }
        }
        Ok(records)
    }
}

fn parse_line(line: &str) -> Result<PulseRecord> {
    let malformed = || SwitchError::MalformedReply(line.to_string());

    let (direction_str, rest) = line.split_once("->").ok_or_else(malformed)?;
    let direction = match direction_str.trim() {
        "Connect" => PulseDirection::Connect,
        "Disconnect" => PulseDirection::Disconnect,
        _ => return Err(malformed()),
    };

    let rest = rest.trim();
    let port_part = rest
        .strip_prefix("Port:")
        .and_then(|r| r.split(',').next())
        .ok_or_else(malformed)?;
    let (port_str, contact_str) = port_part.split_once('-').ok_or_else(malformed)?;
    let port = port_str.chars().next().ok_or_else(malformed)?;
    let contact: u8 = contact_str.trim().parse().map_err(|_| malformed())?;

    let max_current_ma: f64 = field_after(rest, "CurrentMax:")
        .ok_or_else(malformed)?
        .parse()
        .map_err(|_| malformed())?;

    let timestamp: i64 = field_after(rest, "Timestamp:")
        .ok_or_else(malformed)?
        .parse()
        .map_err(|_| malformed())?;

    let warning = line.split_once('*').map(|(_, w)| {
        w.trim()
            .trim_start_matches("Warnings:")
            .trim()
            .to_string()
    });

    Ok(PulseRecord {
        direction,
        port,
        contact,
        max_current_ma,
        timestamp,
        warning,
    })
}

/// First token following `tag`, delimited by comma or whitespace.
fn field_after<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let start = text.find(tag)? + tag.len();
    text[start..]
        .split(|c: char| c == ',' || c.is_whitespace())
        .find(|token| !token.is_empty())
}

/// Full waveform of one pulse, serialized to its own JSON file.
///
/// Field names follow the established waveform file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformRecord {
    pub time: i64,
    /// Measured converter voltage at pulse time.
    pub voltage: f64,
    pub port: char,
    pub contact: u8,
    pub polarity: u8,
    /// Sampling frequency in hertz.
    #[serde(rename = "SF")]
    pub sampling_frequency: f64,
    /// Current samples in milliamps.
    pub data: Vec<f64>,
}

impl WaveformRecord {
    /// File name the record is stored under.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}V_{}{}_{}.json",
            self.time, self.voltage, self.port, self.contact, self.polarity
        )
    }

    /// Write the record into `dir`, creating it when needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

/// Index of the first sample above zero, for rising-edge display alignment.
///
/// Display-only: pulse results always carry the raw waveform, callers align
/// when rendering.
pub fn rising_edge_index(samples: &[f64]) -> usize {
    samples.iter().position(|&s| s > 0.0).unwrap_or(0)
}
