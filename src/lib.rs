//! Driver for the QPhoX CryoSwitch cryogenic RF-switch controller.
//!
//! The controller is a USB/Ethernet pulse generator that actuates latching
//! cryogenic RF switches with precisely calibrated current pulses and
//! samples the resulting current waveform. This crate covers the full
//! driver stack:
//!
//! - [`transport`]: interchangeable serial, UDP and TCP byte channels plus
//!   a scripted mock for tests;
//! - [`protocol`]: the framed ASCII command grammar and packet-mode
//!   waveform framing;
//! - [`board`]: the board client with typed command families and the
//!   device identity read at connection time;
//! - [`calibration`]: per-hardware-revision constants and all unit
//!   conversions between firmware codes and physical units;
//! - [`controller`]: pulse orchestration, from relay selection and
//!   hardware validation through waveform capture and bookkeeping;
//! - [`state`] and [`pulse_log`]: the persisted switch-state table, the
//!   append-only pulse log and per-pulse waveform files.

pub mod board;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod pulse_log;
pub mod state;
pub mod transport;

pub use board::{DeviceInfo, Labphox, Port};
pub use config::Settings;
pub use controller::{SwitchController, SwitchModel};
pub use error::{Result, SwitchError};
