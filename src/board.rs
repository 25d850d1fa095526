//! Client for the Labphox pulse-controller board.
//!
//! [`Labphox`] owns a [`Transport`] exclusively and issues strictly
//! synchronous request/reply exchanges: one command goes out, then chunks
//! are read and accumulated until the reply terminator (or packet sentinel)
//! arrives or the deadline expires. The firmware's sub-modules are exposed
//! as typed method families (utility, DAC, ADC, GPIO, expander, timer,
//! application, reset, ethernet) mirroring the board's command map.
//!
//! Device identity (serial number, hardware revision, firmware version,
//! channel count) is read once at connection time and is immutable for the
//! session.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SwitchError};
use crate::protocol::{
    strip_packet_envelope, Command, FrameAccumulator, PacketAccumulator, Reply,
};
use crate::transport::{serial, SerialTransport, TcpTransport, Transport, UdpTransport};

/// Firmware major version this driver is written against.
pub const SUPPORTED_FW_VERSION: u32 = 3;

/// Default deadline for a complete reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One relay port (bank of six contacts) on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    A,
    B,
    C,
    D,
}

impl Port {
    pub const ALL: [Port; 4] = [Port::A, Port::B, Port::C, Port::D];

    pub fn letter(self) -> char {
        match self {
            Port::A => 'A',
            Port::B => 'B',
            Port::C => 'C',
            Port::D => 'D',
        }
    }

    /// One-based position used against the board's channel count.
    pub fn index(self) -> u8 {
        match self {
            Port::A => 1,
            Port::B => 2,
            Port::C => 3,
            Port::D => 4,
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'A' => Some(Port::A),
            'B' => Some(Port::B),
            'C' => Some(Port::C),
            'D' => Some(Port::D),
            _ => None,
        }
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl std::str::FromStr for Port {
    type Err = SwitchError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                Port::from_letter(c).ok_or_else(|| SwitchError::InvalidPort(s.to_string()))
            }
            _ => Err(SwitchError::InvalidPort(s.to_string())),
        }
    }
}

/// The board's two output DACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dac {
    /// Converter output-voltage DAC.
    Converter,
    /// Over-current protection threshold DAC.
    Ocp,
}

impl Dac {
    fn module(self) -> &'static str {
        match self {
            Dac::Converter => "5",
            Dac::Ocp => "8",
        }
    }
}

/// GPIO lines controllable through the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gpio {
    En3V3,
    En5V,
    /// Negative-supply charge pump.
    EnChargePump,
    ForcePowerEnable,
    PowerEnable,
    DcdcEnable,
    ChoppingEnable,
}

impl Gpio {
    fn op(self) -> &'static str {
        match self {
            Gpio::En3V3 => "A",
            Gpio::En5V => "B",
            Gpio::EnChargePump => "C",
            Gpio::ForcePowerEnable => "D",
            Gpio::PowerEnable => "E",
            Gpio::DcdcEnable => "F",
            Gpio::ChoppingEnable => "G",
        }
    }
}

/// Identity read from the board at connection time.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub hw_revision: String,
    /// Numeric revision, the trailing digit of `hw_revision`.
    pub hw_rev_n: u8,
    pub serial_number: String,
    pub firmware_version: u32,
    /// Number of relay ports populated on this board.
    pub channels: u8,
}

/// Connected board client.
pub struct Labphox {
    transport: Box<dyn Transport>,
    timeout: Duration,
    info: DeviceInfo,
}

impl std::fmt::Debug for Labphox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Labphox")
            .field("timeout", &self.timeout)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Labphox {
    /// Identify the board behind an already-open transport.
    pub async fn open(transport: Box<dyn Transport>, timeout: Duration) -> Result<Self> {
        let mut board = Self {
            transport,
            timeout,
            info: DeviceInfo {
                name: String::new(),
                hw_revision: String::new(),
                hw_rev_n: 0,
                serial_number: String::new(),
                firmware_version: 0,
                channels: 0,
            },
        };
        board.read_identity().await?;
        Ok(board)
    }

    /// Connect over USB serial.
    ///
    /// With an explicit port name that port is used directly. Otherwise the
    /// host's serial ports are scanned for the controller's USB product id;
    /// when `serial_number` is given, each candidate is opened and queried
    /// until the matching board is found.
    pub async fn open_usb(port: Option<&str>, serial_number: Option<&str>) -> Result<Self> {
        if let Some(port) = port {
            let transport = SerialTransport::open(port)?;
            return Self::open(Box::new(transport), DEFAULT_TIMEOUT).await;
        }

        let candidates = serial::discover_candidates()?;
        for candidate in &candidates {
            let transport = match SerialTransport::open(candidate) {
                Ok(t) => t,
                Err(err) => {
                    log::debug!("skipping {candidate}: {err}");
                    continue;
                }
            };
            match Self::open(Box::new(transport), DEFAULT_TIMEOUT).await {
                Ok(board) => match serial_number {
                    Some(sn) if board.info.serial_number != sn => continue,
                    _ => return Ok(board),
                },
                Err(err) => log::debug!("no controller on {candidate}: {err}"),
            }
        }
        Err(SwitchError::DeviceNotFound)
    }

    /// Connect over UDP (the firmware's default network transport).
    pub async fn open_udp(addr: Ipv4Addr, port: u16) -> Result<Self> {
        let transport = UdpTransport::connect((addr, port).into()).await?;
        Self::open(Box::new(transport), DEFAULT_TIMEOUT).await
    }

    /// Connect over TCP.
    pub async fn open_tcp(addr: Ipv4Addr, port: u16) -> Result<Self> {
        let transport = TcpTransport::new((addr, port).into());
        Self::open(Box::new(transport), DEFAULT_TIMEOUT).await
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn read_identity(&mut self) -> Result<()> {
        let name = self.utility_name().await?;
        if !name.to_ascii_uppercase().contains("LABP") {
            return Err(SwitchError::UnexpectedIdentity(name));
        }
        let hw_revision = self.utility_hw().await?;
        let serial_number = self.utility_serial_number().await?;
        let firmware_version = self.utility_firmware().await?;
        let channels = self.utility_channels().await?;

        let hw_rev_n = hw_revision
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .unwrap_or(0) as u8;

        if firmware_version != SUPPORTED_FW_VERSION {
            log::warn!(
                "board firmware version {firmware_version} differs from the supported version {SUPPORTED_FW_VERSION}"
            );
        }
        log::info!(
            "connected to {name} SN {serial_number}, {hw_revision} FW {firmware_version}, {channels} port(s)"
        );

        self.info = DeviceInfo {
            name,
            hw_revision,
            hw_rev_n,
            serial_number,
            firmware_version,
            channels,
        };
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exchange machinery
    // ------------------------------------------------------------------

    /// Issue a command and return its echo-validated reply.
    pub async fn raw_exchange(&mut self, cmd: Command) -> Result<Reply> {
        let rendered = cmd.render();
        self.transport.flush_input().await?;
        self.transport.write(rendered.as_bytes()).await?;
        let frame = read_frame(self.transport.as_mut(), self.timeout).await?;
        let reply = Reply::parse(&frame);
        if !reply.matches(&cmd) {
            return Err(SwitchError::ProtocolMismatch {
                sent: rendered,
                received: reply.raw,
            });
        }
        Ok(reply)
    }

    /// Issue a command whose reply is a bare string (identity queries).
    async fn raw_query(&mut self, cmd: Command) -> Result<String> {
        self.transport.flush_input().await?;
        self.transport.write(cmd.render().as_bytes()).await?;
        read_frame(self.transport.as_mut(), self.timeout).await
    }

    /// Issue a packet-mode command and return the raw payload bytes.
    async fn packet_exchange(&mut self, cmd: Command) -> Result<Vec<u8>> {
        let rendered = cmd.render();
        self.transport.flush_input().await?;
        self.transport.write(rendered.as_bytes()).await?;
        let payload = read_packet(self.transport.as_mut(), self.timeout).await?;
        Ok(strip_packet_envelope(
            payload,
            rendered.as_bytes(),
            self.transport.packet_preamble(),
        ))
    }

    /// Exchange expecting the firmware to echo the written value verbatim.
    async fn exchange_checked(&mut self, cmd: Command) -> Result<Reply> {
        let sent = cmd.render();
        let expected = cmd.value().to_string();
        let reply = self.raw_exchange(cmd).await?;
        if reply.value.trim() != expected {
            return Err(SwitchError::ProtocolMismatch {
                sent,
                received: reply.raw,
            });
        }
        Ok(reply)
    }

    // ------------------------------------------------------------------
    // Utility module (2)
    // ------------------------------------------------------------------

    pub async fn utility_name(&mut self) -> Result<String> {
        self.raw_query(Command::query("2", "A")).await
    }

    pub async fn utility_firmware(&mut self) -> Result<u32> {
        let raw = self.raw_query(Command::query("2", "B")).await?;
        // Firmware reports e.g. `V1.3`; the trailing field is the version
        // this driver tracks.
        raw.rsplit('.')
            .next()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or(SwitchError::MalformedReply(raw))
    }

    pub async fn utility_hw(&mut self) -> Result<String> {
        self.raw_query(Command::query("2", "D")).await
    }

    pub async fn utility_serial_number(&mut self) -> Result<String> {
        self.raw_query(Command::query("2", "E")).await
    }

    pub async fn utility_channels(&mut self) -> Result<u8> {
        let raw = self.raw_query(Command::query("2", "F")).await?;
        // Reply is `CH <n>`.
        raw.split_whitespace()
            .nth(1)
            .and_then(|v| v.parse::<u8>().ok())
            .ok_or(SwitchError::MalformedReply(raw))
    }

    pub async fn utility_connected(&mut self) -> Result<String> {
        let reply = self.raw_exchange(Command::query("2", "C")).await?;
        Ok(reply.value)
    }

    /// One word of the MCU's 96-bit unique id.
    pub async fn utility_uid(&mut self, word: u8) -> Result<u32> {
        let reply = self.raw_exchange(Command::write("2", "G", word)).await?;
        reply.value_u32()
    }

    pub async fn utility_sleep(&mut self, value: u32) -> Result<()> {
        self.raw_exchange(Command::write("2", "S", value)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // DAC modules (5 and 8)
    // ------------------------------------------------------------------

    pub async fn dac_on(&mut self, dac: Dac) -> Result<()> {
        self.raw_exchange(Command::write(dac.module(), "T", 1))
            .await?;
        Ok(())
    }

    pub async fn dac_off(&mut self, dac: Dac) -> Result<()> {
        self.raw_exchange(Command::write(dac.module(), "T", 0))
            .await?;
        Ok(())
    }

    pub async fn dac_set(&mut self, dac: Dac, code: u16) -> Result<()> {
        self.raw_exchange(Command::write(dac.module(), "S", code))
            .await?;
        Ok(())
    }

    pub async fn dac_buffer(&mut self, dac: Dac, value: u32) -> Result<()> {
        self.raw_exchange(Command::write(dac.module(), "B", value))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // ADC module (4) and auxiliary ADC (W)
    // ------------------------------------------------------------------

    pub async fn adc_start(&mut self) -> Result<()> {
        self.raw_exchange(Command::write("4", "T", 1)).await?;
        Ok(())
    }

    pub async fn adc_stop(&mut self) -> Result<()> {
        self.raw_exchange(Command::write("4", "T", 0)).await?;
        Ok(())
    }

    /// Select a channel and trigger one conversion.
    pub async fn adc_select(&mut self, channel: u8) -> Result<()> {
        self.raw_exchange(Command::write("4", "S", channel)).await?;
        Ok(())
    }

    pub async fn adc_get(&mut self) -> Result<u32> {
        let reply = self.raw_exchange(Command::query("4", "G")).await?;
        reply.value_u32()
    }

    pub async fn adc_channel(&mut self, channel: u8) -> Result<()> {
        self.raw_exchange(Command::write("4", "C", channel)).await?;
        Ok(())
    }

    pub async fn adc_interrupt(&mut self, enable: bool) -> Result<()> {
        self.raw_exchange(Command::write("4", "I", enable as u8))
            .await?;
        Ok(())
    }

    pub async fn adc_buffer(&mut self, value: u32) -> Result<u32> {
        let reply = self.raw_exchange(Command::write("4", "B", value)).await?;
        reply.value_u32()
    }

    pub async fn aux_adc_start(&mut self) -> Result<()> {
        self.raw_exchange(Command::write("W", "T", 1)).await?;
        Ok(())
    }

    pub async fn aux_adc_stop(&mut self) -> Result<()> {
        self.raw_exchange(Command::write("W", "T", 0)).await?;
        Ok(())
    }

    pub async fn aux_adc_select(&mut self, channel: u8) -> Result<()> {
        self.raw_exchange(Command::write("W", "S", channel)).await?;
        Ok(())
    }

    pub async fn aux_adc_get(&mut self) -> Result<u32> {
        let reply = self.raw_exchange(Command::query("W", "G")).await?;
        reply.value_u32()
    }

    // ------------------------------------------------------------------
    // GPIO module (1)
    // ------------------------------------------------------------------

    pub async fn gpio_set(&mut self, line: Gpio, level: bool) -> Result<()> {
        self.raw_exchange(Command::write("1", line.op(), level as u8))
            .await?;
        Ok(())
    }

    /// Output-supervisor status bit.
    pub async fn power_status(&mut self) -> Result<bool> {
        let reply = self.raw_exchange(Command::write("1", "H", 0)).await?;
        Ok(reply.value_u32()? != 0)
    }

    /// Over-current comparator output.
    pub async fn ocp_status(&mut self) -> Result<bool> {
        let reply = self.raw_exchange(Command::write("1", "I", 0)).await?;
        Ok(reply.value_u32()? != 0)
    }

    // ------------------------------------------------------------------
    // Relay expanders (port letters) and expander control (6)
    // ------------------------------------------------------------------

    /// Select a relay path for a connect pulse; the reply value carries the
    /// expander's validation id.
    pub async fn relay_connect(&mut self, port: Port, contact_idx: u8) -> Result<Reply> {
        self.raw_exchange(Command::write(port.letter().to_string(), "C", contact_idx))
            .await
    }

    /// Select a relay path for a disconnect pulse.
    pub async fn relay_disconnect(&mut self, port: Port, contact_idx: u8) -> Result<Reply> {
        self.raw_exchange(Command::write(port.letter().to_string(), "D", contact_idx))
            .await
    }

    /// Enable the output expanders; the returned status is 0 on success.
    pub async fn outputs_on(&mut self) -> Result<u32> {
        let reply = self.raw_exchange(Command::write("6", "O", 0)).await?;
        reply.value_u32()
    }

    /// De-select every relay channel.
    pub async fn outputs_off(&mut self) -> Result<()> {
        self.raw_exchange(Command::write("6", "U", 0)).await?;
        Ok(())
    }

    /// Program the expander for a switch model (wiring type code).
    pub async fn switch_type(&mut self, type_code: u32) -> Result<()> {
        self.raw_exchange(Command::write("6", "S", type_code))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timer module (0)
    // ------------------------------------------------------------------

    /// Program the pulse duration in timer ticks; the echo is re-checked
    /// because a mis-programmed pulse length stresses the switch coil.
    pub async fn timer_duration(&mut self, ticks: u32) -> Result<()> {
        self.exchange_checked(Command::write("0", "A", ticks))
            .await?;
        Ok(())
    }

    pub async fn timer_sampling(&mut self, divider: u32) -> Result<()> {
        self.raw_exchange(Command::write("0", "S", divider)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Application module (3)
    // ------------------------------------------------------------------

    /// Fire one calibrated pulse and stream back the sampled waveform.
    pub async fn app_pulse(&mut self) -> Result<Vec<u8>> {
        self.packet_exchange(Command::write("3", "T", 1)).await
    }

    pub async fn app_acquire(&mut self, value: u32) -> Result<()> {
        self.raw_exchange(Command::write("3", "Q", value)).await?;
        Ok(())
    }

    pub async fn app_voltage(&mut self, value: u32) -> Result<()> {
        self.raw_exchange(Command::write("3", "V", value)).await?;
        Ok(())
    }

    /// Route the internal test/discharge circuit (hardware revision 4+).
    pub async fn app_test_circuit(&mut self, enable: bool) -> Result<()> {
        self.raw_exchange(Command::write("3", "P", enable as u8))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reset module (7)
    // ------------------------------------------------------------------

    pub async fn reset(&mut self) -> Result<()> {
        self.raw_exchange(Command::query("7", "R")).await?;
        Ok(())
    }

    /// Reboot into the DFU bootloader for firmware upgrades.
    pub async fn boot_dfu(&mut self) -> Result<()> {
        self.raw_exchange(Command::query("7", "B")).await?;
        Ok(())
    }

    pub async fn soft_reset(&mut self) -> Result<()> {
        self.raw_exchange(Command::query("7", "S")).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ethernet module (Q)
    // ------------------------------------------------------------------

    pub async fn ip_address(&mut self) -> Result<Ipv4Addr> {
        let reply = self.raw_exchange(Command::write("Q", "G", 0)).await?;
        Ok(Ipv4Addr::from(reply.value_u32()?.to_le_bytes()))
    }

    pub async fn set_ip_address(&mut self, addr: Ipv4Addr) -> Result<()> {
        let value = u32::from_le_bytes(addr.octets());
        self.raw_exchange(Command::write("Q", "I", value)).await?;
        Ok(())
    }

    pub async fn subnet_mask(&mut self) -> Result<Ipv4Addr> {
        let reply = self.raw_exchange(Command::write("Q", "L", 0)).await?;
        Ok(Ipv4Addr::from(reply.value_u32()?.to_le_bytes()))
    }

    pub async fn set_subnet_mask(&mut self, mask: Ipv4Addr) -> Result<()> {
        let value = u32::from_le_bytes(mask.octets());
        self.raw_exchange(Command::write("Q", "K", value)).await?;
        Ok(())
    }
}

/// Accumulate chunks until the line terminator arrives or the deadline
/// expires. Shared by every transport backend.
pub(crate) async fn read_frame(transport: &mut dyn Transport, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut acc = FrameAccumulator::new();
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(SwitchError::CommunicationTimeout(timeout))?;
        let chunk = tokio::time::timeout(remaining, transport.read_chunk())
            .await
            .map_err(|_| SwitchError::CommunicationTimeout(timeout))??;
        if let Some(frame) = acc.push(&chunk) {
            return Ok(frame);
        }
    }
}

/// Accumulate chunks until the packet sentinel arrives.
pub(crate) async fn read_packet(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut acc = PacketAccumulator::new();
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(SwitchError::CommunicationTimeout(timeout))?;
        let chunk = tokio::time::timeout(remaining, transport.read_chunk())
            .await
            .map_err(|_| SwitchError::CommunicationTimeout(timeout))??;
        if let Some(payload) = acc.push(&chunk) {
            return Ok(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoardEmulator, MockTransport};

    async fn emulated_board() -> (Labphox, crate::transport::MockHandle) {
        let (transport, handle, _) = MockTransport::with_emulator(BoardEmulator::default());
        let board = Labphox::open(Box::new(transport), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        (board, handle)
    }

    #[tokio::test]
    async fn identity_read_at_connect() {
        let (board, _) = emulated_board().await;
        let info = board.info();
        assert_eq!(info.name, "Labphox");
        assert_eq!(info.serial_number, "QX0001");
        assert_eq!(info.hw_revision, "HW4");
        assert_eq!(info.hw_rev_n, 4);
        assert_eq!(info.firmware_version, 3);
        assert_eq!(info.channels, 2);
    }

    #[tokio::test]
    async fn rejects_foreign_device() {
        let mut emulator = BoardEmulator::default();
        emulator.name = "SomethingElse".to_string();
        let (transport, _, _) = MockTransport::with_emulator(emulator);
        let err = Labphox::open(Box::new(transport), DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::UnexpectedIdentity(_)));
    }

    #[tokio::test]
    async fn echo_mismatch_is_a_protocol_error() {
        let (mut board, handle) = emulated_board().await;
        // Scripted garbage reply for the next exchange: the emulator is
        // bypassed by pre-loading the read queue with a foreign echo.
        handle.push_reply(b"W:9:Z:1;");
        let err = board.raw_exchange(Command::write("1", "H", 0)).await;
        assert!(matches!(
            err,
            Err(SwitchError::ProtocolMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn power_status_parses_bit() {
        let (mut board, _) = emulated_board().await;
        assert!(board.power_status().await.unwrap());
    }

    #[tokio::test]
    async fn pulse_returns_payload_without_envelope() {
        let (mut board, _) = emulated_board().await;
        let samples = board.app_pulse().await.unwrap();
        // The emulator's default shape starts with four quiet samples and
        // must come back without the command echo or sentinel.
        assert_eq!(&samples[..4], &[0, 0, 0, 0]);
        assert!(samples.iter().any(|&s| s > 20));
    }

    #[tokio::test]
    async fn timer_duration_checks_echoed_value() {
        let (mut board, handle) = emulated_board().await;
        handle.push_reply(b"W:0:A:9;");
        let err = board.timer_duration(1600).await;
        assert!(matches!(err, Err(SwitchError::ProtocolMismatch { .. })));
    }

    #[tokio::test]
    async fn ip_address_is_little_endian_on_the_wire() {
        let (mut board, _) = emulated_board().await;
        let ip = board.ip_address().await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 101));
    }
}
