//! Error types for the crate.
//!
//! All failure categories the driver can hit are collected in one
//! discriminated enum, [`SwitchError`], built with `thiserror`. The variants
//! map onto the distinct failure classes of the hardware protocol:
//!
//! - **`CommunicationTimeout`**: no reply terminator arrived within the
//!   transport deadline. Never retried internally.
//! - **`ProtocolMismatch`**: the firmware echoed a command prefix (or value)
//!   that does not match what was sent. Surfaced to the caller so it can
//!   decide between logging and aborting.
//! - **`PortNotEnabled` / `ContactOutOfRange`**: addressing violations,
//!   raised before any transport I/O takes place.
//! - **`VoltageOutOfRange` / `OcpOutOfRange` / `PulseDurationOutOfRange` /
//!   `SamplingFrequencyOutOfRange` / `DacCodeOutOfRange`**: configuration
//!   values outside what the hardware supports. `DacCodeOutOfRange` is a
//!   hard precondition: an out-of-range register write could damage the
//!   converter stage.
//! - **`SwitchSelection`**: the relay-selection validation identifier echoed
//!   by the firmware disagrees with the addressed bit pattern; fatal for the
//!   pulse attempt.
//!
//! Callers pattern-match on the variant instead of inspecting sentinel
//! return values.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T, E = SwitchError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("communication timeout exceeded ({0:?})")]
    CommunicationTimeout(Duration),

    #[error("protocol mismatch: sent `{sent}`, firmware echoed `{received}`")]
    ProtocolMismatch { sent: String, received: String },

    #[error("malformed reply: `{0}`")]
    MalformedReply(String),

    #[error("port {0} not enabled on this board ({1} port(s) available)")]
    PortNotEnabled(char, u8),

    #[error("invalid port `{0}` (expected a letter A-D)")]
    InvalidPort(String),

    #[error("contact {0} out of range (1-6)")]
    ContactOutOfRange(u8),

    #[error("output voltage {value} V outside supported range ({min}-{max} V)")]
    VoltageOutOfRange { value: f64, min: f64, max: f64 },

    #[error("over-current threshold {value} mA outside supported range ({min}-{max} mA)")]
    OcpOutOfRange { value: f64, min: f64, max: f64 },

    #[error("pulse duration {value} ms outside supported range ({min}-{max} ms)")]
    PulseDurationOutOfRange { value: f64, min: f64, max: f64 },

    #[error("sampling frequency {value} kHz outside supported range ({min}-{max} kHz)")]
    SamplingFrequencyOutOfRange { value: f64, min: f64, max: f64 },

    #[error("computed DAC code {0} outside the valid register range")]
    DacCodeOutOfRange(i64),

    #[error("switch selection rejected: expected validation id {expected}, firmware returned {received}")]
    SwitchSelection { expected: u16, received: u16 },

    #[error("unknown switch model `{0}`")]
    UnknownSwitchModel(String),

    #[error("failed to enable output channels (expander status {0})")]
    OutputEnableFailed(u32),

    #[error("unknown hardware revision `{0}` (not present in the constants table)")]
    UnknownHardwareRevision(String),

    #[error("operation requires hardware revision {required} or later (board is revision {actual})")]
    UnsupportedRevision { required: u8, actual: u8 },

    #[error("device did not identify as a pulse controller: `{0}`")]
    UnexpectedIdentity(String),

    #[error("no pulse controller found (check USB connection, serial number or IP)")]
    DeviceNotFound,

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_serial::Error> for SwitchError {
    fn from(err: tokio_serial::Error) -> Self {
        SwitchError::Serial(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwitchError::ContactOutOfRange(9);
        assert_eq!(err.to_string(), "contact 9 out of range (1-6)");
    }

    #[test]
    fn test_selection_error_display() {
        let err = SwitchError::SwitchSelection {
            expected: 96,
            received: 0,
        };
        assert!(err.to_string().contains("expected validation id 96"));
    }
}
