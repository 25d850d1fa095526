//! End-to-end controller tests against the emulated board.
//!
//! Every test opens a board client over the mock transport, wraps it in a
//! `SwitchController` with persistence pointed at a temp directory, and
//! drives a real command/response conversation through the emulator.
//! Timers run on tokio's paused clock, so the hardware settle delays cost
//! no wall time.

use std::path::Path;

use tempfile::TempDir;

use cryoswitch::board::{Labphox, Port, DEFAULT_TIMEOUT};
use cryoswitch::pulse_log::PulseDirection;
use cryoswitch::transport::{BoardEmulator, MockHandle, MockTransport};
use cryoswitch::{Settings, SwitchController, SwitchError};

fn test_settings(dir: &Path) -> Settings {
    Settings {
        data_dir: dir.join("data"),
        states_file: dir.join("states.json"),
        pulse_log_file: dir.join("pulse_logging.txt"),
        ..Settings::default()
    }
}

async fn controller_with(emulator: BoardEmulator, dir: &Path) -> (SwitchController, MockHandle) {
    let (transport, handle, _) = MockTransport::with_emulator(emulator);
    let board = Labphox::open(Box::new(transport), DEFAULT_TIMEOUT)
        .await
        .unwrap();
    let controller = SwitchController::new(board, test_settings(dir)).await.unwrap();
    (controller, handle)
}

fn pulse_command_count(handle: &MockHandle) -> usize {
    handle
        .written_commands()
        .iter()
        .filter(|c| c.as_str() == "W:3:T:1;")
        .count()
}

#[tokio::test(start_paused = true)]
async fn connect_scenario_drives_the_full_sequence() {
    let dir = TempDir::new().unwrap();
    let (mut controller, handle) = controller_with(BoardEmulator::default(), dir.path()).await;
    controller.start().await.unwrap();
    handle.clear_writes();

    let profile = controller.connect(Port::A, 3).await.unwrap();

    // Relay select carries the zero-based contact index; the pulse follows
    // and the expanders are dropped right after.
    let commands = handle.written_commands();
    assert!(commands.contains(&"W:A:C:2;".to_string()), "{commands:?}");
    assert_eq!(pulse_command_count(&handle), 1);
    assert!(commands.contains(&"W:6:U:0;".to_string()));

    // The emulator's default waveform peaks at 28 counts; with the HW4
    // current-sense path one count is ~2.59 mA.
    let peak = profile.iter().cloned().fold(0.0, f64::max);
    assert!((peak - 72.0).abs() < 2.0, "peak {peak}");

    // Raw waveform: the quiet leading samples are preserved, not aligned
    // away.
    assert_eq!(profile[0], 0.0);

    // State table updated for this board's serial number.
    let state = controller.switch_states().unwrap().unwrap();
    assert_eq!(state["port_A"]["contact_3"], 1);
    assert_eq!(state["port_A"]["contact_2"], 0);

    // One log line, with the documented shape.
    let log = std::fs::read_to_string(dir.path().join("pulse_logging.txt")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(
        lines[0].starts_with("Connect    -> Port:A-3, CurrentMax:"),
        "{}",
        lines[0]
    );
    assert!(!lines[0].contains("Warnings"));

    // Full waveform serialized alongside.
    let waveforms: Vec<_> = std::fs::read_dir(dir.path().join("data"))
        .unwrap()
        .collect::<std::io::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(waveforms.len(), 1);
    let name = waveforms[0].file_name().into_string().unwrap();
    assert!(name.ends_with("_A3_1.json"), "{name}");
    let text = std::fs::read_to_string(waveforms[0].path()).unwrap();
    let record: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(record["data"].as_array().unwrap().len(), profile.len());
    assert_eq!(record["SF"], 28_000.0);
}

#[tokio::test(start_paused = true)]
async fn addressing_violations_fail_before_any_io() {
    let dir = TempDir::new().unwrap();
    let (mut controller, handle) = controller_with(BoardEmulator::default(), dir.path()).await;
    let before = handle.write_count();

    // Two channels populated: port C does not exist on this board.
    let err = controller.connect(Port::C, 3).await.unwrap_err();
    assert!(matches!(err, SwitchError::PortNotEnabled('C', 2)));

    let err = controller.connect(Port::A, 7).await.unwrap_err();
    assert!(matches!(err, SwitchError::ContactOutOfRange(7)));

    let err = controller.disconnect(Port::A, 0).await.unwrap_err();
    assert!(matches!(err, SwitchError::ContactOutOfRange(0)));

    assert_eq!(handle.write_count(), before, "no transport I/O expected");
}

#[tokio::test(start_paused = true)]
async fn out_of_range_configuration_is_rejected_without_io() {
    let dir = TempDir::new().unwrap();
    let (mut controller, handle) = controller_with(BoardEmulator::default(), dir.path()).await;
    let before = handle.write_count();

    let err = controller.set_output_voltage(4.0).await.unwrap_err();
    assert!(matches!(err, SwitchError::VoltageOutOfRange { .. }));
    let err = controller.set_output_voltage(31.0).await.unwrap_err();
    assert!(matches!(err, SwitchError::VoltageOutOfRange { .. }));

    let err = controller.set_ocp_ma(500.0).await.unwrap_err();
    assert!(matches!(err, SwitchError::OcpOutOfRange { .. }));

    let err = controller.set_pulse_duration_ms(500.0).await.unwrap_err();
    assert!(matches!(err, SwitchError::PulseDurationOutOfRange { .. }));

    let err = controller.set_sampling_frequency_khz(500.0).await.unwrap_err();
    assert!(matches!(
        err,
        SwitchError::SamplingFrequencyOutOfRange { .. }
    ));

    assert_eq!(handle.write_count(), before, "no transport I/O expected");
}

#[tokio::test(start_paused = true)]
async fn double_connect_is_idempotent_in_state_and_counted_in_log() {
    let dir = TempDir::new().unwrap();
    let (mut controller, _handle) = controller_with(BoardEmulator::default(), dir.path()).await;

    controller.connect(Port::A, 3).await.unwrap();
    controller.connect(Port::A, 3).await.unwrap();

    let state = controller.switch_states().unwrap().unwrap();
    assert_eq!(state["port_A"]["contact_3"], 1);

    // Exactly one line per successful pulse.
    let log = std::fs::read_to_string(dir.path().join("pulse_logging.txt")).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn selection_mismatch_aborts_before_the_pulse() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    emulator.corrupt_validation = true;
    let (mut controller, handle) = controller_with(emulator, dir.path()).await;
    handle.clear_writes();

    let err = controller.connect(Port::A, 3).await.unwrap_err();
    assert!(matches!(err, SwitchError::SwitchSelection { expected: 96, .. }));

    // The pulse was never fired and nothing was recorded.
    assert_eq!(pulse_command_count(&handle), 0);
    let state = controller.switch_states().unwrap().unwrap();
    assert_eq!(state["port_A"]["contact_3"], 0);
    let log = std::fs::read_to_string(dir.path().join("pulse_logging.txt")).unwrap();
    assert_eq!(log.lines().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn tripped_supervisor_triggers_bounded_recovery() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    emulator.power_status = 0;
    emulator.force_enable_recovers = true;
    let (mut controller, handle) = controller_with(emulator, dir.path()).await;
    handle.clear_writes();

    let profile = controller.connect(Port::A, 3).await.unwrap();
    assert!(!profile.is_empty());

    let commands = handle.written_commands();
    assert!(
        commands.contains(&"W:1:D:1;".to_string()),
        "force-enable expected in {commands:?}"
    );
    assert_eq!(pulse_command_count(&handle), 1);
}

#[tokio::test(start_paused = true)]
async fn low_current_pulse_is_annotated() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    // Peak of 15 counts is ~39 mA, below the 60 mA warning threshold.
    emulator.pulse_samples = vec![0, 0, 4, 9, 13, 15, 14, 13, 6, 1, 0];
    let (mut controller, _handle) = controller_with(emulator, dir.path()).await;

    controller.disconnect(Port::B, 1).await.unwrap();

    let log = std::fs::read_to_string(dir.path().join("pulse_logging.txt")).unwrap();
    let line = log.lines().next().unwrap();
    assert!(line.starts_with("Disconnect -> Port:B-1, CurrentMax:"), "{line}");
    assert!(line.ends_with("*Warnings: Low current detected!"), "{line}");
}

#[tokio::test(start_paused = true)]
async fn smart_connect_clears_other_live_contacts_first() {
    let dir = TempDir::new().unwrap();
    let (mut controller, handle) = controller_with(BoardEmulator::default(), dir.path()).await;

    controller.connect(Port::A, 2).await.unwrap();
    handle.clear_writes();

    let profile = controller.smart_connect(Port::A, 3, false).await.unwrap();
    assert!(profile.is_some());

    let commands = handle.written_commands();
    // Disconnect of the previously live contact 2 (zero-based 1), then the
    // connect of contact 3 (zero-based 2).
    assert!(commands.contains(&"W:A:D:1;".to_string()), "{commands:?}");
    assert!(commands.contains(&"W:A:C:2;".to_string()), "{commands:?}");
    assert_eq!(pulse_command_count(&handle), 2);

    let state = controller.switch_states().unwrap().unwrap();
    assert_eq!(state["port_A"]["contact_2"], 0);
    assert_eq!(state["port_A"]["contact_3"], 1);

    // Reconnecting the same contact without force is a no-op.
    handle.clear_writes();
    let profile = controller.smart_connect(Port::A, 3, false).await.unwrap();
    assert!(profile.is_none());
    assert_eq!(pulse_command_count(&handle), 0);

    // With force it pulses again.
    let profile = controller.smart_connect(Port::A, 3, true).await.unwrap();
    assert!(profile.is_some());
    assert_eq!(pulse_command_count(&handle), 1);
}

#[tokio::test(start_paused = true)]
async fn history_reads_back_what_was_pulsed() {
    let dir = TempDir::new().unwrap();
    let (mut controller, _handle) = controller_with(BoardEmulator::default(), dir.path()).await;

    controller.connect(Port::A, 1).await.unwrap();
    controller.connect(Port::B, 5).await.unwrap();
    controller.disconnect(Port::A, 1).await.unwrap();

    let history = controller.pulse_history(None, Some(10)).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].direction, PulseDirection::Disconnect);
    assert_eq!(history[0].port, 'A');

    let port_b = controller.pulse_history(Some(Port::B), Some(10)).unwrap();
    assert_eq!(port_b.len(), 1);
    assert_eq!(port_b[0].contact, 5);
}

#[tokio::test(start_paused = true)]
async fn adc_reference_calibration_adopts_in_band_measurements() {
    let dir = TempDir::new().unwrap();
    let (controller, _handle) = controller_with(BoardEmulator::default(), dir.path()).await;
    // 2.5 V reference code 3102 implies a 3.3003 V rail (rounded to 0.1 mV).
    assert!((controller.calibration().adc_ref - 3.3003).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn adc_reference_out_of_band_falls_back_to_nominal() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    // Code 4095 implies a 2.5 V rail, well outside the acceptance band.
    emulator.aux_adc_code = 4095;
    let (controller, _handle) = controller_with(emulator, dir.path()).await;
    assert_eq!(controller.calibration().adc_ref, 3.3);
}

#[tokio::test(start_paused = true)]
async fn discharge_requires_hardware_revision_four() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    emulator.hw_revision = "HW3".to_string();
    let (mut controller, _handle) = controller_with(emulator, dir.path()).await;

    let err = controller.discharge().await.unwrap_err();
    assert!(matches!(
        err,
        SwitchError::UnsupportedRevision {
            required: 4,
            actual: 3
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn unknown_hardware_revision_is_rejected_at_construction() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    emulator.hw_revision = "HW9".to_string();
    let (transport, _, _) = MockTransport::with_emulator(emulator);
    let board = Labphox::open(Box::new(transport), DEFAULT_TIMEOUT)
        .await
        .unwrap();
    let err = SwitchController::new(board, test_settings(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::UnknownHardwareRevision(_)));
}

#[tokio::test(start_paused = true)]
async fn internal_temperature_uses_the_sensor_formula() {
    let dir = TempDir::new().unwrap();
    let mut emulator = BoardEmulator::default();
    // VSENSE at the 25 degree calibration point.
    emulator.adc_code = 943;
    let (mut controller, _handle) = controller_with(emulator, dir.path()).await;

    let temp = controller.internal_temperature().await.unwrap();
    assert!((temp - 25.0).abs() < 1.5, "temp {temp}");
}
