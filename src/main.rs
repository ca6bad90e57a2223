//! Command-line entry point: discover, probe and sweep VNA devices.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;

use vna_toolkit::export::{self, ExportOptions, FrequencyUnit, TouchstoneFormat};
use vna_toolkit::instrument::{InstrumentSession, MockVna};
use vna_toolkit::measurement::{CalibratedSweep, SParameter};
use vna_toolkit::protocol::{BinaryLayout, ProtocolVariant, SweepPlan};

/// USB vendor/product IDs of known VNA devices (STMicroelectronics CDC).
#[cfg(feature = "instrument_serial")]
const KNOWN_VID_PID: &[(u16, u16)] = &[(0x0483, 0x5740), (0x0483, 0x3748), (0x16c0, 0x0483)];

#[derive(Parser)]
#[command(name = "vna_toolkit", about = "VNA instrument communication toolkit", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    /// Legacy ASCII firmware.
    Text,
    /// Extended firmware with binary data blocks.
    Binary,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Ri,
    Ma,
    Db,
}

impl From<FormatArg> for TouchstoneFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Ri => TouchstoneFormat::Ri,
            FormatArg::Ma => TouchstoneFormat::MagnitudeAngle,
            FormatArg::Db => TouchstoneFormat::DbAngle,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports, marking likely VNA devices.
    ListPorts,

    /// Connect to a device and print its identity.
    Probe {
        /// Serial port path (e.g. /dev/ttyACM0, COM3).
        port: String,
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
        #[arg(long, value_enum, default_value = "text")]
        variant: VariantArg,
        /// TOML file describing the binary record layout.
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Run a sweep and optionally export it as Touchstone.
    Sweep {
        /// Serial port path; ignored with --mock.
        #[arg(default_value = "")]
        port: String,
        #[arg(long, default_value_t = 1_000_000)]
        start: u64,
        #[arg(long, default_value_t = 300_000_000)]
        stop: u64,
        #[arg(long, default_value_t = 101)]
        points: usize,
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
        #[arg(long, value_enum, default_value = "text")]
        variant: VariantArg,
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Write the (uncalibrated) sweep to this Touchstone file.
        #[arg(long)]
        export: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "ri")]
        format: FormatArg,
        /// Use the scripted mock instrument instead of hardware.
        #[arg(long)]
        mock: bool,
    },
}

fn resolve_variant(arg: VariantArg, profile: Option<&PathBuf>) -> Result<ProtocolVariant> {
    match arg {
        VariantArg::Text => {
            if profile.is_some() {
                bail!("--profile only applies to the binary protocol variant");
            }
            Ok(ProtocolVariant::TextV1)
        }
        VariantArg::Binary => {
            let layout = match profile {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("reading profile {}", path.display()))?;
                    toml::from_str::<BinaryLayout>(&text)
                        .with_context(|| format!("parsing profile {}", path.display()))?
                }
                None => BinaryLayout::default(),
            };
            Ok(ProtocolVariant::BinaryV2(layout))
        }
    }
}

#[cfg(feature = "instrument_serial")]
fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }

    for port in ports {
        let mut label = String::new();
        if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
            if KNOWN_VID_PID.contains(&(usb.vid, usb.pid)) {
                label = " [likely VNA]".to_string();
            } else if let Some(product) = &usb.product {
                if product.to_lowercase().contains("vna") {
                    label = " [likely VNA]".to_string();
                }
            }
        }
        println!("{}{label}", port.port_name);
    }
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
fn list_ports() -> Result<()> {
    bail!("serial support not enabled; rebuild with --features instrument_serial")
}

async fn connect_session(
    port: &str,
    baud: u32,
    variant: ProtocolVariant,
    mock: bool,
) -> Result<InstrumentSession> {
    if mock {
        return Ok(InstrumentSession::with_instrument(Box::new(MockVna::new(
            "mock",
        ))));
    }

    #[cfg(feature = "instrument_serial")]
    {
        let session = InstrumentSession::connect(port, baud, variant).await?;
        Ok(session)
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = (port, baud, variant);
        bail!("serial support not enabled; rebuild with --features instrument_serial")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::ListPorts => list_ports(),

        Command::Probe {
            port,
            baud,
            variant,
            profile,
        } => {
            let variant = resolve_variant(variant, profile.as_ref())?;
            let mut session = connect_session(&port, baud, variant, false).await?;
            println!(
                "{}: firmware {}",
                session.instrument().id(),
                session.instrument().firmware_version()
            );
            let limits = *session.instrument().limits();
            println!(
                "range {} - {} Hz, up to {} points",
                limits.min_hz, limits.max_hz, limits.max_points
            );
            session.close().await?;
            Ok(())
        }

        Command::Sweep {
            port,
            start,
            stop,
            points,
            baud,
            variant,
            profile,
            export: export_path,
            format,
            mock,
        } => {
            let variant = resolve_variant(variant, profile.as_ref())?;
            let mut session = connect_session(&port, baud, variant, mock).await?;
            let plan = SweepPlan::new(start, stop, points);

            info!("running {}-point sweep {}..{} Hz", points, start, stop);
            let sweep = session.run_sweep(&plan, SParameter::S11, None).await?;

            for sample in sweep.iter().take(5) {
                println!(
                    "{:>12} Hz  {:+.6} {:+.6}j",
                    sample.point.hz, sample.gamma.re, sample.gamma.im
                );
            }
            if sweep.len() > 5 {
                println!("... {} points total", sweep.len());
            }

            if let Some(path) = export_path {
                let calibrated = CalibratedSweep::from_uncorrected(&sweep);
                let options = ExportOptions {
                    unit: FrequencyUnit::Hz,
                    format: format.into(),
                    device_name: Some(session.instrument().id().to_string()),
                };
                export::write_file(&path, &calibrated, &options)?;
                println!("wrote {}", path.display());
            }

            session.close().await?;
            Ok(())
        }
    }
}
