//! Switch actuation orchestration.
//!
//! [`SwitchController`] drives a connected board end-to-end: power-up
//! sequencing, converter and over-current configuration, relay selection
//! with hardware validation, calibrated pulse firing, waveform capture and
//! the bookkeeping that follows every pulse (state table, pulse log,
//! waveform file).
//!
//! Everything is synchronous request-then-reply; the only retries anywhere
//! are the bounded output-expander enable loop and the one-shot power
//! supervisor recovery before a pulse. Addressing and range violations are
//! rejected before any transport I/O.
//!
//! Pulse results are always the raw, unaligned waveform in milliamps;
//! rising-edge alignment (see [`crate::pulse_log::rising_edge_index`]) is a
//! display concern.

use std::time::Duration;

use chrono::Utc;

use crate::board::{Dac, DeviceInfo, Gpio, Labphox, Port};
use crate::calibration::{self, Calibration, ADC_REF_SAMPLES};
use crate::config::Settings;
use crate::error::{Result, SwitchError};
use crate::pulse_log::{PulseLog, PulseRecord, WaveformRecord};
use crate::state::{BoardState, StateStore};

/// MCU-internal temperature sensor channel.
const TEMPERATURE_ADC_CHANNEL: u8 = 16;

/// Auxiliary-ADC channel wired to the 2.5 V calibration reference.
const ADC_REF_CHANNEL: u8 = 8;

/// Timer ticks per millisecond of pulse duration.
const PULSE_TICKS_PER_MS: f64 = 100.0;

/// Fixed tick offset added to every programmed pulse duration.
const PULSE_TICK_OFFSET: f64 = 100.0;

/// Timer base clock in kHz, divided down to the sampling frequency.
const TIMER_BASE_KHZ: f64 = 84_000.0;

const AUX_ADC_WARMUP: Duration = Duration::from_millis(100);
const CHOPPING_RESET_SETTLE: Duration = Duration::from_millis(200);
const FORCE_ENABLE_SETTLE: Duration = Duration::from_millis(500);
const START_SETTLE: Duration = Duration::from_secs(1);
const RESET_SETTLE: Duration = Duration::from_secs(3);

/// Maximum attempts to enable the output expanders.
const OUTPUT_ENABLE_ATTEMPTS: u32 = 4;

/// Default pulse duration programmed at start-up, milliseconds.
const DEFAULT_PULSE_DURATION_MS: f64 = 15.0;

/// Default sampling frequency of the waveform ADC, hertz.
const DEFAULT_SAMPLING_FREQ_HZ: f64 = 28_000.0;

/// Supported cryogenic switch models.
///
/// The model determines the expander wiring type and therefore the
/// bit-packed validation id the firmware echoes on relay selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchModel {
    R583423141,
    R573423600,
}

impl SwitchModel {
    /// Wiring type code programmed into the expander control module.
    pub fn type_code(self) -> u32 {
        match self {
            SwitchModel::R583423141 => 1,
            SwitchModel::R573423600 => 2,
        }
    }

    fn validation_pattern(self, polarity: bool) -> (u32, u32) {
        match (self, polarity) {
            (SwitchModel::R583423141, true) => (0b0110, 0),
            (SwitchModel::R583423141, false) => (0b1001, 0),
            (SwitchModel::R573423600, true) => (0b10, 4096),
            (SwitchModel::R573423600, false) => (0b01, 8192),
        }
    }

    /// Validation id the firmware must echo for a selected relay path,
    /// folded to the byte the wire carries: `(id & 255) | (id >> 8)`.
    pub fn expected_validation(self, contact_idx: u8, polarity: bool) -> u16 {
        let (pattern, offset) = self.validation_pattern(polarity);
        let id = (pattern << (2 * contact_idx as u32)) + offset;
        ((id & 255) | (id >> 8)) as u16
    }
}

impl std::fmt::Display for SwitchModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchModel::R583423141 => write!(f, "R583423141"),
            SwitchModel::R573423600 => write!(f, "R573423600"),
        }
    }
}

impl std::str::FromStr for SwitchModel {
    type Err = SwitchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "R583423141" => Ok(SwitchModel::R583423141),
            "R573423600" => Ok(SwitchModel::R573423600),
            _ => Err(SwitchError::UnknownSwitchModel(s.to_string())),
        }
    }
}

/// High-level controller for one connected board.
#[derive(Debug)]
pub struct SwitchController {
    board: Labphox,
    cal: Calibration,
    settings: Settings,
    state_store: StateStore,
    pulse_log: PulseLog,
    model: SwitchModel,
    /// Configured converter set point, volts.
    converter_voltage: f64,
    /// Converter voltage measured at the last read-back.
    measured_converter_voltage: f64,
    pulse_duration_ms: f64,
    sampling_freq_hz: f64,
}

impl SwitchController {
    /// Wrap a connected board, load its revision's calibration table and
    /// prepare the persistence artifacts.
    pub async fn new(mut board: Labphox, settings: Settings) -> Result<Self> {
        let table = match &settings.constants_file {
            Some(path) => calibration::load_table(path)?,
            None => calibration::builtin_table()?,
        };
        let constants = calibration::for_revision(&table, &board.info().hw_revision)?;
        let mut cal = Calibration::new(constants);
        board.set_timeout(settings.timeout());

        if cal.constants.calibrate_adc && cal.constants.adc_cal_ref {
            let samples = measure_adc_reference(&mut board, &cal, &settings).await?;
            cal.apply_measured_reference(&samples);
        }

        let state_store = StateStore::new(&settings.states_file);
        let pulse_log = PulseLog::new(&settings.pulse_log_file, settings.warning_threshold_ma);
        if settings.track_states {
            state_store.ensure_board(&board.info().serial_number)?;
        }
        if settings.pulse_logging {
            pulse_log.init()?;
        }
        if settings.log_waveforms {
            std::fs::create_dir_all(&settings.data_dir)?;
        }

        Ok(Self {
            board,
            cal,
            settings,
            state_store,
            pulse_log,
            model: SwitchModel::R583423141,
            converter_voltage: 5.0,
            measured_converter_voltage: 0.0,
            pulse_duration_ms: DEFAULT_PULSE_DURATION_MS,
            sampling_freq_hz: DEFAULT_SAMPLING_FREQ_HZ,
        })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.board.info()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.cal
    }

    pub fn model(&self) -> SwitchModel {
        self.model
    }

    pub fn measured_converter_voltage(&self) -> f64 {
        self.measured_converter_voltage
    }

    pub fn sampling_frequency_hz(&self) -> f64 {
        self.sampling_freq_hz
    }

    pub fn pulse_duration_ms(&self) -> f64 {
        self.pulse_duration_ms
    }

    // ------------------------------------------------------------------
    // Power-up and supplies
    // ------------------------------------------------------------------

    /// Full power-up sequence: supplies, over-current protection, pulse
    /// timing, converter and output expanders.
    pub async fn start(&mut self) -> Result<()> {
        log::info!("initializing switch controller");
        self.board.adc_start().await?;

        self.board.gpio_set(Gpio::En3V3, true).await?;
        self.board.gpio_set(Gpio::En5V, true).await?;

        self.enable_ocp().await?;
        self.set_ocp_ma(80.0).await?;
        self.enable_chopping().await?;

        self.set_pulse_duration_ms(DEFAULT_PULSE_DURATION_MS).await?;

        self.enable_converter(None).await?;

        tokio::time::sleep(START_SETTLE).await;
        self.enable_output_channels().await?;
        self.select_switch_model(SwitchModel::R583423141).await?;

        if self.board.power_status().await? {
            log::info!("power status: ready");
        } else {
            log::warn!("power status: output voltage not enabled");
        }
        Ok(())
    }

    /// Drop to a safe idle state: converter at minimum and off, supplies
    /// disabled.
    pub async fn standby(&mut self) -> Result<()> {
        self.set_output_voltage(5.0).await?;
        self.disable_converter().await?;
        self.disable_negative_supply().await?;
        self.board.gpio_set(Gpio::En3V3, false).await?;
        self.board.gpio_set(Gpio::En5V, false).await?;
        Ok(())
    }

    /// Hardware reset; the board re-enumerates after a settle delay.
    pub async fn reset(&mut self) -> Result<()> {
        self.board.reset().await?;
        tokio::time::sleep(RESET_SETTLE).await;
        Ok(())
    }

    /// Reboot into the DFU bootloader for a firmware upgrade.
    pub async fn set_fw_upgrade_mode(&mut self) -> Result<()> {
        self.board.boot_dfu().await
    }

    pub async fn enable_negative_supply(&mut self) -> Result<f64> {
        self.board.gpio_set(Gpio::EnChargePump, true).await?;
        tokio::time::sleep(self.settings.supply_settle()).await;
        let bias = self.bias_voltage().await?;
        self.check_voltage(bias, -5.0, "bias");
        Ok(bias)
    }

    pub async fn disable_negative_supply(&mut self) -> Result<f64> {
        self.board.gpio_set(Gpio::EnChargePump, false).await?;
        self.bias_voltage().await
    }

    pub async fn enable_converter(&mut self, init_voltage: Option<f64>) -> Result<()> {
        let code = self.cal.output_voltage_to_dac_code(5.0)?;
        self.board.dac_set(Dac::Converter, code).await?;
        self.board.dac_on(Dac::Converter).await?;
        self.board.gpio_set(Gpio::PowerEnable, true).await?;
        self.board.gpio_set(Gpio::DcdcEnable, true).await?;

        let target = init_voltage.unwrap_or(self.converter_voltage);
        self.set_output_voltage(target).await?;
        Ok(())
    }

    pub async fn disable_converter(&mut self) -> Result<()> {
        let code = self.cal.output_voltage_to_dac_code(5.0)?;
        self.board.dac_set(Dac::Converter, code).await?;
        self.board.gpio_set(Gpio::DcdcEnable, false).await?;
        self.board.gpio_set(Gpio::PowerEnable, false).await?;
        Ok(())
    }

    /// Recover a tripped output supervisor: force-enable, settle, re-enable
    /// the converter. The one bounded recovery sequence in the driver.
    pub async fn reset_output_supervisor(&mut self) -> Result<()> {
        self.disable_converter().await?;
        self.board.gpio_set(Gpio::ForcePowerEnable, true).await?;
        tokio::time::sleep(FORCE_ENABLE_SETTLE).await;
        self.board.gpio_set(Gpio::ForcePowerEnable, false).await?;
        self.enable_converter(None).await
    }

    pub async fn power_status(&mut self) -> Result<bool> {
        self.board.power_status().await
    }

    pub async fn ocp_status(&mut self) -> Result<bool> {
        self.board.ocp_status().await
    }

    // ------------------------------------------------------------------
    // Converter voltage and over-current protection
    // ------------------------------------------------------------------

    /// Program the converter output voltage and verify it by read-back.
    ///
    /// Returns the measured voltage. Outside the supported range the call
    /// fails before any transport I/O. Above 10 V the negative supply is
    /// switched off (the charge pump only assists low-voltage operation).
    pub async fn set_output_voltage(&mut self, volts: f64) -> Result<f64> {
        let range = self.cal.constants.converter_output_voltage_range;
        if volts < range[0] || volts > range[1] {
            return Err(SwitchError::VoltageOutOfRange {
                value: volts,
                min: range[0],
                max: range[1],
            });
        }

        if volts > 10.0 {
            self.disable_negative_supply().await?;
        } else {
            self.enable_negative_supply().await?;
        }

        self.board.dac_on(Dac::Converter).await?;
        let code = self.cal.output_voltage_to_dac_code(volts)?;
        self.board.dac_set(Dac::Converter, code).await?;
        tokio::time::sleep(self.settings.converter_settle()).await;

        self.converter_voltage = volts;
        let measured = self.converter_voltage().await?;
        self.check_voltage(measured, volts, "converter");
        Ok(measured)
    }

    /// Measure the converter output voltage (destructive ADC read).
    pub async fn converter_voltage(&mut self) -> Result<f64> {
        let channel = self.cal.constants.converter_adc;
        let code = self.measure_adc(channel).await?;
        let voltage = self.cal.converter_voltage_from_code(code);
        self.measured_converter_voltage = voltage;
        Ok(voltage)
    }

    /// Measure the negative supply rail.
    pub async fn bias_voltage(&mut self) -> Result<f64> {
        let channel = self.cal.constants.bv_adc;
        let code = self.measure_adc(channel).await?;
        Ok(self.cal.bias_voltage_from_code(code))
    }

    /// Seed the OCP DAC and arm protection at 100 mA.
    pub async fn enable_ocp(&mut self) -> Result<()> {
        let code = self.cal.ocp_threshold_to_dac_code(50.0)?;
        self.board.dac_set(Dac::Ocp, code).await?;
        self.board.dac_on(Dac::Ocp).await?;
        self.set_ocp_ma(100.0).await
    }

    /// Program the over-current threshold in milliamps.
    pub async fn set_ocp_ma(&mut self, threshold_ma: f64) -> Result<()> {
        let range = self.cal.constants.ocp_range;
        if threshold_ma < range[0] || threshold_ma > range[1] {
            return Err(SwitchError::OcpOutOfRange {
                value: threshold_ma,
                min: range[0],
                max: range[1],
            });
        }
        let code = self.cal.ocp_threshold_to_dac_code(threshold_ma)?;
        self.board.dac_set(Dac::Ocp, code).await
    }

    /// Clear a latched over-current trip by cycling the chopping stage.
    pub async fn reset_ocp(&mut self) -> Result<()> {
        self.board.gpio_set(Gpio::ChoppingEnable, true).await?;
        tokio::time::sleep(CHOPPING_RESET_SETTLE).await;
        self.board.gpio_set(Gpio::ChoppingEnable, false).await
    }

    pub async fn enable_chopping(&mut self) -> Result<()> {
        self.board.gpio_set(Gpio::ChoppingEnable, true).await
    }

    pub async fn disable_chopping(&mut self) -> Result<()> {
        self.board.gpio_set(Gpio::ChoppingEnable, false).await
    }

    // ------------------------------------------------------------------
    // Pulse timing
    // ------------------------------------------------------------------

    pub async fn set_pulse_duration_ms(&mut self, ms: f64) -> Result<()> {
        let range = self.cal.constants.pulse_duration_range;
        if ms < range[0] || ms > range[1] {
            return Err(SwitchError::PulseDurationOutOfRange {
                value: ms,
                min: range[0],
                max: range[1],
            });
        }
        let ticks = (ms * PULSE_TICKS_PER_MS + PULSE_TICK_OFFSET).round() as u32;
        self.board.timer_duration(ticks).await?;
        self.pulse_duration_ms = ms;
        log::info!("pulse duration set to {ms} ms");
        Ok(())
    }

    pub async fn set_sampling_frequency_khz(&mut self, khz: f64) -> Result<()> {
        let range = self.cal.constants.sampling_frequency_range;
        if khz < range[0] || khz > range[1] {
            return Err(SwitchError::SamplingFrequencyOutOfRange {
                value: khz,
                min: range[0],
                max: range[1],
            });
        }
        let divider = (TIMER_BASE_KHZ / khz) as u32;
        self.board.timer_sampling(divider).await?;
        self.sampling_freq_hz = khz * 1000.0;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Switch actuation
    // ------------------------------------------------------------------

    /// Program the expander for a switch model.
    pub async fn select_switch_model(&mut self, model: SwitchModel) -> Result<()> {
        self.board.switch_type(model.type_code()).await?;
        self.model = model;
        Ok(())
    }

    /// Connect a contact to the port's common terminal.
    ///
    /// Returns the pulse current waveform in milliamps (raw, unaligned).
    pub async fn connect(&mut self, port: Port, contact: u8) -> Result<Vec<f64>> {
        self.validate_port_contact(port, contact)?;
        log::debug!("connecting port {port} contact {contact}");
        self.select_and_pulse(port, contact, true).await
    }

    /// Disconnect a contact from the port's common terminal.
    pub async fn disconnect(&mut self, port: Port, contact: u8) -> Result<Vec<f64>> {
        self.validate_port_contact(port, contact)?;
        log::debug!("disconnecting port {port} contact {contact}");
        self.select_and_pulse(port, contact, false).await
    }

    /// Disconnect every contact of a port in turn.
    pub async fn disconnect_all(&mut self, port: Port) -> Result<()> {
        for contact in 1..=6 {
            self.disconnect(port, contact).await?;
        }
        Ok(())
    }

    /// Connect a contact after disconnecting whichever other contacts the
    /// state table reports live on the same port.
    ///
    /// Already-connected contacts are skipped unless `force` is set.
    /// Returns the connect waveform, or `None` when no pulse was needed.
    pub async fn smart_connect(
        &mut self,
        port: Port,
        contact: u8,
        force: bool,
    ) -> Result<Option<Vec<f64>>> {
        self.validate_port_contact(port, contact)?;
        let sn = self.board.info().serial_number.clone();

        for other in 1..=6 {
            if other == contact {
                continue;
            }
            if self.state_store.contact_state(&sn, port, other)? == 1 {
                log::info!("disconnecting contact {other} before connecting {contact}");
                self.disconnect(port, other).await?;
            }
        }

        if self.state_store.contact_state(&sn, port, contact)? == 1 {
            log::info!("contact {contact} is already connected");
            if force {
                return Ok(Some(self.connect(port, contact).await?));
            }
            return Ok(None);
        }
        Ok(Some(self.connect(port, contact).await?))
    }

    /// Last-known contact states of this board.
    pub fn switch_states(&self) -> Result<Option<BoardState>> {
        self.state_store
            .board_state(&self.board.info().serial_number)
    }

    /// Recent pulse log entries, newest first.
    pub fn pulse_history(&self, port: Option<Port>, limit: Option<usize>) -> Result<Vec<PulseRecord>> {
        self.pulse_log
            .history(port, limit.unwrap_or(self.settings.history_limit))
    }

    fn validate_port_contact(&self, port: Port, contact: u8) -> Result<()> {
        let channels = self.board.info().channels;
        if port.index() > channels {
            return Err(SwitchError::PortNotEnabled(port.letter(), channels));
        }
        if !(1..=6).contains(&contact) {
            return Err(SwitchError::ContactOutOfRange(contact));
        }
        Ok(())
    }

    /// Select the relay path and verify the expander's echoed validation id.
    async fn select_output_channel(&mut self, port: Port, contact: u8, polarity: bool) -> Result<()> {
        let contact_idx = contact - 1;
        let reply = if polarity {
            self.board.relay_connect(port, contact_idx).await?
        } else {
            self.board.relay_disconnect(port, contact_idx).await?
        };
        let received = reply.value_u32()? as u16;
        let expected = self.model.expected_validation(contact_idx, polarity);
        if received != expected {
            return Err(SwitchError::SwitchSelection { expected, received });
        }
        Ok(())
    }

    /// Enable the output expanders, retrying a few times; the firmware
    /// occasionally reports a transient non-zero status right after
    /// power-up.
    pub async fn enable_output_channels(&mut self) -> Result<()> {
        let mut status = u32::MAX;
        for attempt in 1..=OUTPUT_ENABLE_ATTEMPTS {
            status = self.board.outputs_on().await?;
            if status == 0 {
                if attempt > 1 {
                    log::warn!("{attempt} attempts to enable output channels");
                }
                return Ok(());
            }
        }
        Err(SwitchError::OutputEnableFailed(status))
    }

    pub async fn disable_output_channels(&mut self) -> Result<()> {
        self.board.outputs_off().await
    }

    /// Fire one calibrated pulse and return the waveform in milliamps.
    ///
    /// A tripped power supervisor triggers the bounded recovery sequence
    /// first.
    pub async fn send_pulse(&mut self) -> Result<Vec<f64>> {
        if !self.board.power_status().await? {
            log::warn!("timing protection triggered, resetting output supervisor");
            self.reset_output_supervisor().await?;
        }
        let samples = self.board.app_pulse().await?;
        Ok(self.cal.samples_to_milliamps(&samples))
    }

    async fn select_and_pulse(&mut self, port: Port, contact: u8, polarity: bool) -> Result<Vec<f64>> {
        self.select_output_channel(port, contact, polarity).await?;

        let profile = self.send_pulse().await?;
        // Never hold current on the path after the pulse.
        self.disable_output_channels().await?;

        let timestamp = Utc::now().timestamp();
        let max_current = profile.iter().cloned().fold(0.0, f64::max);

        if self.settings.track_states {
            self.state_store.record(
                &self.board.info().serial_number,
                port,
                contact,
                polarity,
            )?;
        }
        if self.settings.pulse_logging {
            self.pulse_log
                .append(port, contact, polarity, max_current, timestamp)?;
        }
        if self.settings.log_waveforms {
            let record = WaveformRecord {
                time: timestamp,
                voltage: self.measured_converter_voltage,
                port: port.letter(),
                contact,
                polarity: polarity as u8,
                sampling_frequency: self.sampling_freq_hz,
                data: profile.clone(),
            };
            record.write_to(&self.settings.data_dir)?;
        }

        Ok(profile)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Route the internal test circuit and fire a discharge pulse
    /// (hardware revision 4 and later).
    pub async fn discharge(&mut self) -> Result<Vec<f64>> {
        self.require_revision(4)?;
        self.board.app_test_circuit(true).await?;
        let profile = self.send_pulse().await?;
        self.board.app_test_circuit(false).await?;
        Ok(profile)
    }

    /// Exercise the internal test load at the given voltage and report the
    /// measured discharge waveform; the previous set point is restored.
    pub async fn test_internals(&mut self, volts: f64) -> Result<Vec<f64>> {
        self.require_revision(4)?;
        let previous = self.converter_voltage;
        self.set_output_voltage(volts).await?;

        let v = self.measured_converter_voltage;
        let p = &self.cal.constants.polarization_params;
        let expected_ma = ((v - 2.2) / p[0] + (v - 3.0) / p[2] + v / p[1]) * 1000.0;
        log::info!("internal test at {v} V, expected current {expected_ma:.1} mA");

        let profile = self.discharge().await?;
        self.set_output_voltage(previous).await?;
        Ok(profile)
    }

    /// Expected polarization current for the present configuration, used
    /// as a display reference next to measured waveforms.
    pub fn polarization_current_ma(&self, load_resistance: Option<f64>) -> f64 {
        self.cal.polarization_current_ma(
            self.converter_voltage,
            self.measured_converter_voltage,
            load_resistance,
        )
    }

    /// MCU die temperature in degrees Celsius.
    pub async fn internal_temperature(&mut self) -> Result<f64> {
        let code = self.measure_adc(TEMPERATURE_ADC_CHANNEL).await?;
        Ok(self.cal.internal_temperature_from_code(code))
    }

    /// The MCU's 96-bit unique id as three words.
    pub async fn uids(&mut self) -> Result<[u32; 3]> {
        Ok([
            self.board.utility_uid(0).await?,
            self.board.utility_uid(1).await?,
            self.board.utility_uid(2).await?,
        ])
    }

    // ------------------------------------------------------------------
    // Network configuration
    // ------------------------------------------------------------------

    pub async fn ip_address(&mut self) -> Result<std::net::Ipv4Addr> {
        self.board.ip_address().await
    }

    pub async fn set_ip_address(&mut self, addr: std::net::Ipv4Addr) -> Result<()> {
        self.board.set_ip_address(addr).await
    }

    pub async fn subnet_mask(&mut self) -> Result<std::net::Ipv4Addr> {
        self.board.subnet_mask().await
    }

    pub async fn set_subnet_mask(&mut self, mask: std::net::Ipv4Addr) -> Result<()> {
        self.board.set_subnet_mask(mask).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Select an ADC channel, settle, and read one conversion.
    async fn measure_adc(&mut self, channel: u8) -> Result<u32> {
        self.board.adc_select(channel).await?;
        tokio::time::sleep(self.settings.adc_settle()).await;
        self.board.adc_get().await
    }

    fn check_voltage(&self, measured: f64, target: f64, label: &str) {
        let error = ((measured - target) / target).abs();
        if error > self.settings.voltage_tolerance {
            log::warn!("{label}: failed to reach {target} V, measured {measured:.2} V");
        } else {
            log::info!("{label}: voltage set to {measured:.2} V");
        }
    }

    fn require_revision(&self, required: u8) -> Result<()> {
        let actual = self.board.info().hw_rev_n;
        if actual < required {
            return Err(SwitchError::UnsupportedRevision { required, actual });
        }
        Ok(())
    }
}

/// Sample the 2.5 V calibration reference a fixed number of times.
async fn measure_adc_reference(
    board: &mut Labphox,
    cal: &Calibration,
    settings: &Settings,
) -> Result<Vec<f64>> {
    board.aux_adc_start().await?;
    tokio::time::sleep(AUX_ADC_WARMUP).await;
    let mut samples = Vec::with_capacity(ADC_REF_SAMPLES);
    for _ in 0..ADC_REF_SAMPLES {
        board.aux_adc_select(ADC_REF_CHANNEL).await?;
        tokio::time::sleep(settings.adc_settle()).await;
        let code = board.aux_adc_get().await?;
        samples.push(cal.adc_ref_from_cal_code(code));
    }
    Ok(samples)
}
