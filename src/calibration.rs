//! Calibration constants and unit conversions.
//!
//! Every quantity the firmware understands is an integer code; this module
//! owns the translation between codes and physical units (volts, milliamps,
//! degrees Celsius). The coefficients differ per hardware revision and are
//! loaded from `constants.json`, keyed by the revision string the board
//! reports at connection time. A copy of the table ships inside the binary
//! so the driver works without an external file.
//!
//! All conversions here are pure functions of the table plus the measured
//! ADC reference voltage; acquiring ADC samples is the board client's job.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchError};

/// Table shipped with the crate, mirroring `constants.json`.
const BUILTIN_CONSTANTS: &str = include_str!("../constants.json");

/// Number of samples averaged when measuring the ADC reference.
pub const ADC_REF_SAMPLES: usize = 5;

/// Acceptance band for the measured ADC reference voltage, volts.
pub const ADC_REF_BAND: (f64, f64) = (3.1, 3.5);

/// Nominal ADC reference voltage, volts.
pub const NOMINAL_ADC_REF: f64 = 3.3;

/// Per-revision calibration coefficients, as stored in `constants.json`.
///
/// Field names follow the vendor file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConstants {
    #[serde(rename = "ADC_12B_res")]
    pub adc_12b_res: f64,
    #[serde(rename = "ADC_8B_res")]
    pub adc_8b_res: f64,
    /// Whether this revision exposes the 2.5 V calibration reference.
    #[serde(rename = "ADC_cal_ref")]
    pub adc_cal_ref: bool,
    /// Run the reference calibration at startup.
    #[serde(rename = "calibrate_ADC")]
    pub calibrate_adc: bool,

    // Bias (negative supply) voltage divider.
    #[serde(rename = "bv_R1")]
    pub bv_r1: f64,
    #[serde(rename = "bv_R2")]
    pub bv_r2: f64,
    #[serde(rename = "bv_ADC")]
    pub bv_adc: u8,

    // Converter output measurement.
    pub converter_divider: f64,
    #[serde(rename = "converter_ADC")]
    pub converter_adc: u8,

    // Converter DAC feedback network.
    #[serde(rename = "converter_VREF")]
    pub converter_vref: f64,
    #[serde(rename = "converter_R1")]
    pub converter_r1: f64,
    #[serde(rename = "converter_R2")]
    pub converter_r2: f64,
    #[serde(rename = "converter_Rf")]
    pub converter_rf: f64,
    #[serde(rename = "converter_DAC_lower_bound")]
    pub converter_dac_lower_bound: i64,
    #[serde(rename = "converter_DAC_upper_bound")]
    pub converter_dac_upper_bound: i64,
    pub converter_correction_codes: [f64; 2],
    pub converter_output_voltage_range: [f64; 2],

    // Over-current protection.
    #[serde(rename = "OCP_gain")]
    pub ocp_gain: f64,
    #[serde(rename = "OCP_range")]
    pub ocp_range: [f64; 2],

    pub pulse_duration_range: [f64; 2],
    pub sampling_frequency_range: [f64; 2],

    // Current sense path.
    #[serde(rename = "current_sense_R")]
    pub current_sense_r: f64,
    pub current_gain: f64,

    /// Segment divisors of the polarization-current model.
    pub polarization_params: [f64; 3],
}

/// The full per-revision table.
pub type ConstantsTable = HashMap<String, CalibrationConstants>;

/// Parse the table shipped with the crate.
pub fn builtin_table() -> Result<ConstantsTable> {
    Ok(serde_json::from_str(BUILTIN_CONSTANTS)?)
}

/// Load a table from an external `constants.json`.
pub fn load_table(path: &Path) -> Result<ConstantsTable> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Look up the constants for a hardware revision.
pub fn for_revision(table: &ConstantsTable, hw_revision: &str) -> Result<CalibrationConstants> {
    table
        .get(hw_revision)
        .cloned()
        .ok_or_else(|| SwitchError::UnknownHardwareRevision(hw_revision.to_string()))
}

/// Calibration state for one connected board: the revision's constants plus
/// the ADC reference in use (nominal, or refined once at startup).
#[derive(Debug, Clone)]
pub struct Calibration {
    pub constants: CalibrationConstants,
    pub adc_ref: f64,
}

impl Calibration {
    pub fn new(constants: CalibrationConstants) -> Self {
        Self {
            constants,
            adc_ref: NOMINAL_ADC_REF,
        }
    }

    /// Average reference measurements and adopt them if inside the
    /// acceptance band; otherwise keep the nominal value.
    ///
    /// Returns the reference actually in use afterwards.
    pub fn apply_measured_reference(&mut self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return self.adc_ref;
        }
        let measured = samples.iter().sum::<f64>() / samples.len() as f64;
        if measured > ADC_REF_BAND.0 && measured < ADC_REF_BAND.1 {
            self.adc_ref = measured;
        } else {
            log::warn!(
                "measured ADC reference {measured:.4} V outside {:.1}-{:.1} V, keeping nominal {NOMINAL_ADC_REF} V",
                ADC_REF_BAND.0,
                ADC_REF_BAND.1
            );
        }
        self.adc_ref
    }

    /// ADC reference voltage inferred from one 2.5 V-channel sample.
    pub fn adc_ref_from_cal_code(&self, code: u32) -> f64 {
        let reference = 2.5 * self.constants.adc_12b_res / code as f64;
        (reference * 10_000.0).round() / 10_000.0
    }

    /// DAC register code producing the requested converter output voltage.
    ///
    /// Out-of-range codes are rejected outright: writing them could damage
    /// the converter stage.
    pub fn output_voltage_to_dac_code(&self, vout: f64) -> Result<u16> {
        let c = &self.constants;
        let raw = (c.converter_vref
            - (vout - c.converter_vref * (1.0 + c.converter_r1 / c.converter_r2))
                * (c.converter_rf / c.converter_r1))
            * (c.adc_12b_res / self.adc_ref);
        let code = (raw / c.converter_correction_codes[0] - c.converter_correction_codes[1]).trunc()
            as i64;
        if code < c.converter_dac_lower_bound || code > c.converter_dac_upper_bound {
            return Err(SwitchError::DacCodeOutOfRange(code));
        }
        Ok(code as u16)
    }

    /// Inverse of [`Self::output_voltage_to_dac_code`], exact up to the
    /// truncation of one DAC step.
    pub fn dac_code_to_output_voltage(&self, code: u16) -> f64 {
        let c = &self.constants;
        let raw = (code as f64 + c.converter_correction_codes[1]) * c.converter_correction_codes[0];
        let k = c.converter_vref * (1.0 + c.converter_r1 / c.converter_r2);
        k + (c.converter_vref - raw * self.adc_ref / c.adc_12b_res)
            / (c.converter_rf / c.converter_r1)
    }

    /// Output-voltage change corresponding to one DAC code step.
    pub fn dac_lsb_voltage(&self) -> f64 {
        let c = &self.constants;
        c.converter_correction_codes[0] * self.adc_ref
            / (c.adc_12b_res * (c.converter_rf / c.converter_r1))
    }

    /// DAC code for an over-current threshold in milliamps.
    pub fn ocp_threshold_to_dac_code(&self, threshold_ma: f64) -> Result<u16> {
        let c = &self.constants;
        let code = (threshold_ma
            * (c.current_sense_r * c.current_gain * c.adc_12b_res
                / (c.ocp_gain * 1000.0 * self.adc_ref)))
            .trunc() as i64;
        if code <= 0 || code >= 4095 {
            return Err(SwitchError::DacCodeOutOfRange(code));
        }
        Ok(code as u16)
    }

    /// Milliamps per count of an 8-bit pulse waveform sample.
    pub fn pulse_sample_gain_ma(&self) -> f64 {
        let c = &self.constants;
        1000.0 * self.adc_ref / (c.current_sense_r * c.current_gain * c.adc_8b_res)
    }

    /// Convert a raw pulse waveform to milliamps.
    pub fn samples_to_milliamps(&self, samples: &[u8]) -> Vec<f64> {
        let gain = self.pulse_sample_gain_ma();
        samples.iter().map(|&s| s as f64 * gain).collect()
    }

    /// Converter output voltage from a 12-bit ADC code.
    pub fn converter_voltage_from_code(&self, code: u32) -> f64 {
        let c = &self.constants;
        let gain = self.adc_ref * c.converter_divider / c.adc_12b_res;
        round2(code as f64 * gain)
    }

    /// Bias (negative supply) voltage from a 12-bit ADC code.
    pub fn bias_voltage_from_code(&self, code: u32) -> f64 {
        let c = &self.constants;
        let gain = self.adc_ref * ((c.bv_r2 + c.bv_r1) / c.bv_r1) / c.adc_12b_res;
        let offset = self.adc_ref * c.bv_r2 / c.bv_r1;
        round2(code as f64 * gain - offset)
    }

    /// Die temperature from the MCU's internal sensor channel.
    pub fn internal_temperature_from_code(&self, code: u32) -> f64 {
        let c = &self.constants;
        let vsense = self.adc_ref * code as f64 / c.adc_12b_res;
        const V25: f64 = 0.76;
        const AVG_SLOPE: f64 = 0.0025;
        (vsense - V25) / AVG_SLOPE + 25.0
    }

    /// Expected polarization (baseline) current in milliamps for the
    /// present converter configuration.
    ///
    /// Three-segment piecewise linear model; the segment is picked from the
    /// configured set voltage, the estimate is evaluated at the measured
    /// voltage. `load_resistance` adds the ohmic contribution of an
    /// external load when known. Display reference only, never a gate.
    pub fn polarization_current_ma(
        &self,
        set_voltage: f64,
        measured_voltage: f64,
        load_resistance: Option<f64>,
    ) -> f64 {
        let p = &self.constants.polarization_params;
        let v = measured_voltage;
        let mut amps = if set_voltage <= 10.0 {
            (v - 2.2) / p[0] + (v - 0.2 + 5.0) / p[1] + (v - 3.0) / p[2]
        } else if set_voltage < 15.0 {
            (v - 2.2) / p[0] + (v - 0.2) / p[1] + (v - 3.0) / p[2]
        } else {
            (v - 2.2) / p[0] + (v - 10.0) / p[1] + (v - 3.0) / p[2]
        };
        if let Some(r) = load_resistance {
            amps += v / r;
        }
        (amps * 1000.0 * 10.0).round() / 10.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw4() -> Calibration {
        let table = builtin_table().unwrap();
        Calibration::new(for_revision(&table, "HW4").unwrap())
    }

    #[test]
    fn builtin_table_parses_and_knows_shipped_revisions() {
        let table = builtin_table().unwrap();
        assert!(table.contains_key("HW3"));
        assert!(table.contains_key("HW4"));
    }

    #[test]
    fn unknown_revision_is_rejected() {
        let table = builtin_table().unwrap();
        let err = for_revision(&table, "HW9").unwrap_err();
        assert!(matches!(err, SwitchError::UnknownHardwareRevision(_)));
    }

    #[test]
    fn dac_code_round_trips_within_one_lsb() {
        let cal = hw4();
        let lsb = cal.dac_lsb_voltage();
        let mut v = cal.constants.converter_output_voltage_range[0];
        while v <= cal.constants.converter_output_voltage_range[1] {
            let code = cal.output_voltage_to_dac_code(v).unwrap();
            let recovered = cal.dac_code_to_output_voltage(code);
            assert!(
                (recovered - v).abs() <= lsb + 1e-9,
                "{v} V -> code {code} -> {recovered} V (lsb {lsb})"
            );
            v += 0.25;
        }
    }

    #[test]
    fn dac_code_rejected_outside_register_range() {
        let cal = hw4();
        // Far above the supported output range the feedback formula walks
        // the code below the lower register bound.
        let err = cal.output_voltage_to_dac_code(60.0).unwrap_err();
        assert!(matches!(err, SwitchError::DacCodeOutOfRange(_)));
    }

    #[test]
    fn ocp_code_scales_linearly() {
        let cal = hw4();
        let c50 = cal.ocp_threshold_to_dac_code(50.0).unwrap();
        let c100 = cal.ocp_threshold_to_dac_code(100.0).unwrap();
        assert!((c100 as i64 - 2 * c50 as i64).abs() <= 1);
    }

    #[test]
    fn pulse_samples_convert_with_8bit_gain() {
        let cal = hw4();
        let gain = cal.pulse_sample_gain_ma();
        let ma = cal.samples_to_milliamps(&[0, 1, 100]);
        assert_eq!(ma[0], 0.0);
        assert!((ma[1] - gain).abs() < 1e-12);
        assert!((ma[2] - 100.0 * gain).abs() < 1e-9);
    }

    #[test]
    fn measured_reference_adopted_only_inside_band() {
        let mut cal = hw4();
        cal.apply_measured_reference(&[3.29, 3.30, 3.31, 3.30, 3.30]);
        assert!((cal.adc_ref - 3.30).abs() < 1e-9);

        let mut cal = hw4();
        cal.apply_measured_reference(&[2.0, 2.0, 2.0, 2.0, 2.0]);
        assert_eq!(cal.adc_ref, NOMINAL_ADC_REF);
    }

    #[test]
    fn polarization_model_uses_set_voltage_breakpoints() {
        let cal = hw4();
        // Same measured voltage, different configured segment.
        let low = cal.polarization_current_ma(9.0, 9.0, None);
        let mid = cal.polarization_current_ma(12.0, 9.0, None);
        let high = cal.polarization_current_ma(20.0, 9.0, None);
        assert!(low > mid, "low segment includes the +5 V charge-pump term");
        assert!(mid > high);
    }

    #[test]
    fn polarization_model_adds_load_term() {
        let cal = hw4();
        let bare = cal.polarization_current_ma(9.0, 9.0, None);
        let loaded = cal.polarization_current_ma(9.0, 9.0, Some(480.0));
        assert!((loaded - bare - 9.0 / 480.0 * 1000.0).abs() < 0.2);
    }

    #[test]
    fn internal_temperature_at_calibration_point() {
        let cal = hw4();
        // VSENSE == 0.76 V corresponds to 25 degrees.
        let code = (0.76 * cal.constants.adc_12b_res / cal.adc_ref).round() as u32;
        let temp = cal.internal_temperature_from_code(code);
        assert!((temp - 25.0).abs() < 1.0);
    }
}
