//! Mock transport and board emulator for tests.
//!
//! [`MockTransport`] is a scripted [`Transport`]: every write is recorded
//! for inspection and replies are served from a byte queue, optionally
//! split into small chunks to exercise frame reassembly. Tests that need a
//! whole command/response conversation attach a [`BoardEmulator`], a small
//! firmware stand-in that parses each command and answers the way the real
//! board does (identity strings, echoed values, relay validation ids,
//! packet-mode waveforms).
//!
//! The emulator computes relay validation identifiers independently from
//! the driver, so selection tests cross-check the two implementations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, SwitchError};
use crate::protocol::PACKET_SENTINEL;
use crate::transport::{Transport, TransportKind};

#[derive(Default)]
struct MockState {
    writes: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
    emulator: Option<Arc<Mutex<BoardEmulator>>>,
}

/// Inspection handle shared with the test after the transport has been
/// moved into a board client.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Raw bytes of every write issued so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Writes decoded as ASCII command strings.
    pub fn written_commands(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Forget writes recorded so far (e.g. after a setup sequence).
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Queue reply bytes for the next reads (scripted mode).
    pub fn push_reply(&self, bytes: &[u8]) {
        self.lock().pending.extend(bytes.iter().copied());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// In-memory [`Transport`] used by the test suite.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    chunk_size: usize,
}

impl MockTransport {
    /// Scripted transport: replies must be queued via [`MockHandle::push_reply`].
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: state.clone(),
                chunk_size: usize::MAX,
            },
            MockHandle { state },
        )
    }

    /// Transport answered by a firmware emulator.
    pub fn with_emulator(emulator: BoardEmulator) -> (Self, MockHandle, Arc<Mutex<BoardEmulator>>) {
        let emulator = Arc::new(Mutex::new(emulator));
        let state = Arc::new(Mutex::new(MockState {
            emulator: Some(emulator.clone()),
            ..MockState::default()
        }));
        (
            Self {
                state: state.clone(),
                chunk_size: usize::MAX,
            },
            MockHandle { state },
            emulator,
        )
    }

    /// Limit each `read_chunk` to at most `n` bytes.
    pub fn chunked(mut self, n: usize) -> Self {
        self.chunk_size = n.max(1);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.writes.push(bytes.to_vec());
        if let Some(emulator) = state.emulator.clone() {
            let reply = match emulator.lock() {
                Ok(mut guard) => guard.respond(bytes),
                Err(poisoned) => poisoned.into_inner().respond(bytes),
            };
            state.pending.extend(reply);
        }
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return Err(SwitchError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "mock transport has no scripted reply",
            )));
        }
        let n = self.chunk_size.min(state.pending.len());
        Ok(state.pending.drain(..n).collect())
    }

    async fn flush_input(&mut self) -> Result<()> {
        // Scripted replies are queued ahead of the exchange on purpose;
        // dropping them here would defeat the scripting, and emulator
        // replies are always drained by the exchange that caused them.
        Ok(())
    }
}

/// Firmware stand-in answering the board's command set.
///
/// Fields are public so tests can stage fault conditions (power supervisor
/// tripped, corrupted validation ids, custom waveforms) before an exchange.
pub struct BoardEmulator {
    pub name: String,
    pub hw_revision: String,
    pub serial_number: String,
    pub firmware: String,
    pub channels: u8,

    pub power_status: u8,
    pub ocp_status: u8,
    /// Code returned for ADC reads (`W:4:G`).
    pub adc_code: u32,
    /// Code returned for auxiliary-ADC reads (`W:W:G`).
    pub aux_adc_code: u32,
    /// Expander status returned when enabling outputs (0 = success).
    pub outputs_on_status: u32,
    /// Switch type selected via `W:6:S` (1 or 2).
    pub switch_type: u32,
    /// Sample bytes returned by packet-mode pulse commands.
    pub pulse_samples: Vec<u8>,
    /// Return a wrong relay validation id to simulate a selection fault.
    pub corrupt_validation: bool,
    /// Whether raising FORCE_PWR_EN restores the power supervisor.
    pub force_enable_recovers: bool,

    pub ip_le: u32,
    pub mask_le: u32,
}

impl Default for BoardEmulator {
    fn default() -> Self {
        Self {
            name: "Labphox".to_string(),
            hw_revision: "HW4".to_string(),
            serial_number: "QX0001".to_string(),
            firmware: "V1.3".to_string(),
            channels: 2,
            power_status: 1,
            ocp_status: 0,
            // Converter readback near 5 V with the HW4 divider.
            adc_code: 564,
            // 2.5 V reference against a 3.3 V rail: 2.5 * 4095 / 3.3.
            aux_adc_code: 3102,
            outputs_on_status: 0,
            switch_type: 1,
            pulse_samples: default_pulse_shape(),
            corrupt_validation: false,
            force_enable_recovers: true,
            ip_le: u32::from_le_bytes([192, 168, 1, 101]),
            mask_le: u32::from_le_bytes([255, 255, 255, 0]),
        }
    }
}

/// A plausible actuation waveform: fast rise, flat top, decay to zero.
fn default_pulse_shape() -> Vec<u8> {
    let mut samples = vec![0u8; 4];
    samples.extend([6, 14, 22, 27, 28, 28, 27, 27, 26, 26, 26, 25, 25, 25]);
    samples.extend([18, 9, 3, 0, 0]);
    samples
}

impl BoardEmulator {
    /// Parse one command and produce the board's reply bytes.
    pub fn respond(&mut self, cmd: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(cmd);
        let trimmed = text.trim_end_matches(';');
        let parts: Vec<&str> = trimmed.split(':').collect();
        if parts.len() < 3 {
            return b"ERR;".to_vec();
        }
        let (module, op) = (parts[1], parts[2]);
        let value = parts.get(3).copied().unwrap_or("");
        let echo = format!("{}:{}:{}", parts[0], module, op);

        match (module, op) {
            // Identity strings reply bare, without a command echo.
            ("2", "A") => format!("{};", self.name).into_bytes(),
            ("2", "B") => format!("{};", self.firmware).into_bytes(),
            ("2", "D") => format!("{};", self.hw_revision).into_bytes(),
            ("2", "E") => format!("{};", self.serial_number).into_bytes(),
            ("2", "F") => format!("CH {};", self.channels).into_bytes(),
            ("2", "G") => {
                let idx: u32 = value.parse().unwrap_or(0);
                format!("{}:{};", echo, 1111 * (idx + 1)).into_bytes()
            }

            // GPIO reads and writes.
            ("1", "H") => format!("{}:{};", echo, self.power_status).into_bytes(),
            ("1", "I") => format!("{}:{};", echo, self.ocp_status).into_bytes(),
            ("1", "D") => {
                if value == "1" && self.force_enable_recovers {
                    self.power_status = 1;
                }
                format!("{}:{};", echo, value).into_bytes()
            }

            // ADC and auxiliary ADC.
            ("4", "G") => format!("{}:{};", echo, self.adc_code).into_bytes(),
            ("W", "G") => format!("{}:{};", echo, self.aux_adc_code).into_bytes(),

            // Relay expanders: echo the bit-packed validation id.
            ("A" | "B" | "C" | "D", "C" | "D") => {
                let contact_idx: u32 = value.parse().unwrap_or(0);
                let polarity = op == "C";
                let mut id = self.validation_id(contact_idx, polarity);
                if self.corrupt_validation {
                    id ^= 0x01;
                }
                format!("{}:{};", echo, id).into_bytes()
            }

            // Expander power control.
            ("6", "O") => format!("{}:{};", echo, self.outputs_on_status).into_bytes(),
            ("6", "U") => format!("{}:0;", echo).into_bytes(),
            ("6", "S") => {
                self.switch_type = value.parse().unwrap_or(1);
                format!("{}:{};", echo, value).into_bytes()
            }

            // Application: packet-mode pulse plus plain sub-commands.
            ("3", "T") => {
                let mut reply = cmd.to_vec();
                reply.extend_from_slice(&self.pulse_samples);
                reply.extend_from_slice(&PACKET_SENTINEL);
                reply
            }

            // Ethernet settings, little-endian u32 on the wire.
            ("Q", "G") => format!("{}:{};", echo, self.ip_le).into_bytes(),
            ("Q", "I") => {
                self.ip_le = value.parse().unwrap_or(self.ip_le);
                format!("{}:{};", echo, value).into_bytes()
            }
            ("Q", "L") => format!("{}:{};", echo, self.mask_le).into_bytes(),
            ("Q", "K") => {
                self.mask_le = value.parse().unwrap_or(self.mask_le);
                format!("{}:{};", echo, value).into_bytes()
            }

            // Everything else (DACs, timer, resets, remaining GPIO) echoes
            // the written value.
            _ => format!("{}:{};", echo, value).into_bytes(),
        }
    }

    /// Bit-packed id the expander reports for a selected relay path,
    /// folded to a byte the way the firmware transmits it.
    fn validation_id(&self, contact_idx: u32, polarity: bool) -> u32 {
        let (shift_pattern, offset): (u32, u32) = match (self.switch_type, polarity) {
            (1, true) => (0b0110, 0),
            (1, false) => (0b1001, 0),
            (2, true) => (0b10, 4096),
            (2, false) => (0b01, 8192),
            _ => (0, 0),
        };
        let id = (shift_pattern << (2 * contact_idx)) + offset;
        (id & 255) | (id >> 8)
    }
}
