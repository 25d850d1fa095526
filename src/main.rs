//! Command-line interface to the CryoSwitch controller.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use cryoswitch::pulse_log::rising_edge_index;
use cryoswitch::state::render_port_diagram;
use cryoswitch::transport::DEFAULT_ETH_PORT;
use cryoswitch::{Labphox, Port, Settings, SwitchController, SwitchModel};

#[derive(Parser)]
#[command(name = "cryoswitch", about = "Control a CryoSwitch pulse controller")]
struct Cli {
    /// Serial port of the board (e.g. /dev/ttyACM0, COM3).
    #[arg(long, conflicts_with = "ip")]
    port: Option<String>,

    /// IP address of the board (UDP; see --tcp).
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    /// Use TCP instead of UDP for a networked board.
    #[arg(long, requires = "ip")]
    tcp: bool,

    /// Board serial number to select among several USB boards.
    #[arg(long)]
    sn: Option<String>,

    /// Settings file (defaults to ./cryoswitch.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the full power-up sequence.
    Start,
    /// Connect a contact to a port's common terminal.
    Connect { port: Port, contact: u8 },
    /// Disconnect a contact from a port's common terminal.
    Disconnect { port: Port, contact: u8 },
    /// Connect a contact, disconnecting others first based on the
    /// recorded switch state.
    SmartConnect {
        port: Port,
        contact: u8,
        /// Re-pulse even when the state table says already connected.
        #[arg(long)]
        force: bool,
    },
    /// Disconnect all six contacts of a port.
    DisconnectAll { port: Port },
    /// Show the recorded switch state.
    State { port: Option<Port> },
    /// Show recent pulse log entries.
    History {
        port: Option<Port>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Set the converter output voltage.
    SetVoltage { volts: f64 },
    /// Select the switch model wired to the outputs.
    SetModel { model: SwitchModel },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    let board = if let Some(ip) = cli.ip {
        if cli.tcp {
            Labphox::open_tcp(ip, DEFAULT_ETH_PORT).await?
        } else {
            Labphox::open_udp(ip, DEFAULT_ETH_PORT).await?
        }
    } else {
        Labphox::open_usb(cli.port.as_deref(), cli.sn.as_deref()).await?
    };

    let info = board.info().clone();
    println!(
        "Connected to {} SN {}, {} FW {}, {} port(s)",
        info.name, info.serial_number, info.hw_revision, info.firmware_version, info.channels
    );

    let mut controller = SwitchController::new(board, settings).await?;

    match cli.command {
        CliCommand::Start => {
            controller.start().await?;
            println!("Controller ready");
        }
        CliCommand::Connect { port, contact } => {
            let profile = controller.connect(port, contact).await?;
            report_pulse(&profile);
        }
        CliCommand::Disconnect { port, contact } => {
            let profile = controller.disconnect(port, contact).await?;
            report_pulse(&profile);
        }
        CliCommand::SmartConnect {
            port,
            contact,
            force,
        } => match controller.smart_connect(port, contact, force).await? {
            Some(profile) => report_pulse(&profile),
            None => println!("Contact {contact} already connected, nothing to do"),
        },
        CliCommand::DisconnectAll { port } => {
            controller.disconnect_all(port).await?;
            println!("All contacts of port {port} disconnected");
        }
        CliCommand::State { port } => {
            let Some(state) = controller.switch_states()? else {
                bail!("no recorded state for this board yet");
            };
            let ports = match port {
                Some(p) => vec![p],
                None => Port::ALL
                    .into_iter()
                    .filter(|p| p.index() <= info.channels)
                    .collect(),
            };
            for p in ports {
                println!("{}", render_port_diagram(&state, p));
            }
        }
        CliCommand::History { port, limit } => {
            for record in controller.pulse_history(port, limit)? {
                let direction = match record.direction {
                    cryoswitch::pulse_log::PulseDirection::Connect => "Connect",
                    cryoswitch::pulse_log::PulseDirection::Disconnect => "Disconnect",
                };
                let warning = record
                    .warning
                    .map(|w| format!("  [{w}]"))
                    .unwrap_or_default();
                println!(
                    "{direction:<10} {}-{}  {:>5.0} mA  @{}{}",
                    record.port, record.contact, record.max_current_ma, record.timestamp, warning
                );
            }
        }
        CliCommand::SetVoltage { volts } => {
            let measured = controller.set_output_voltage(volts).await?;
            println!("Converter voltage measured at {measured:.2} V");
        }
        CliCommand::SetModel { model } => {
            controller.select_switch_model(model).await?;
            println!("Switch model set to {model}");
        }
    }

    Ok(())
}

fn report_pulse(profile: &[f64]) {
    let peak = profile.iter().cloned().fold(0.0, f64::max);
    let edge = rising_edge_index(profile);
    println!(
        "Pulse fired: {} samples, peak {:.1} mA, rising edge at sample {}",
        profile.len(),
        peak,
        edge
    );
}
