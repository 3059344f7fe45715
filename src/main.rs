//! Command-line front-end for running I-V and P-I-V sweeps.
//!
//! Loads instrument addresses and default sweep parameters from a TOML
//! settings file (overridable via `SWEEP_DAQ_` environment variables and
//! CLI flags), runs one sweep, streams progress, and prints the collected
//! samples. Ctrl-C requests cooperative cancellation; the exit distinguishes
//! completed, aborted, and failed sweeps.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use sweep_daq::config::{MeasurementConfig, OpticalConfig, PowerRange, Settings};
use sweep_daq::instrument::{Keithley2400, MockLab, OpticalPowerMeter, Pm100d};
use sweep_daq::measurement::MeasurementResult;
use sweep_daq::sweep::{CancelToken, SweepController, SweepEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sweep_daq", about = "Run an I-V or P-I-V sweep")]
struct Cli {
    /// Settings file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the in-process simulated bench instead of VISA hardware.
    #[arg(long)]
    mock: bool,

    /// Device resistance for the simulated bench, in ohms.
    #[arg(long, default_value_t = 1000.0)]
    mock_resistance: f64,

    /// Start voltage in volts (overrides settings).
    #[arg(long)]
    start: Option<f64>,

    /// Stop voltage in volts (overrides settings).
    #[arg(long)]
    stop: Option<f64>,

    /// Number of forward-leg points (overrides settings).
    #[arg(long)]
    points: Option<usize>,

    /// Current compliance in amps (overrides settings).
    #[arg(long)]
    compliance: Option<f64>,

    /// Sweep forward then back to detect hysteresis.
    #[arg(long)]
    bidirectional: bool,

    /// Enable the optical channel at this wavelength in nanometers.
    #[arg(long)]
    wavelength_nm: Option<f64>,
}

impl Cli {
    fn sweep_config(&self, settings: &Settings) -> MeasurementConfig {
        let mut config = settings.sweep.clone();
        if let Some(start) = self.start {
            config.start_voltage = start;
        }
        if let Some(stop) = self.stop {
            config.stop_voltage = stop;
        }
        if let Some(points) = self.points {
            config.points = points;
        }
        if let Some(compliance) = self.compliance {
            config.compliance_a = compliance;
        }
        if self.bidirectional {
            config.bidirectional = true;
        }
        if let Some(wavelength_nm) = self.wavelength_nm {
            config.optical = Some(OpticalConfig {
                wavelength_nm,
                range: PowerRange::Auto,
            });
        }
        config
    }
}

async fn build_controller(cli: &Cli, settings: &Settings) -> Result<SweepController> {
    if cli.mock {
        let lab = MockLab::new(cli.mock_resistance);
        let source = Keithley2400::connect(Box::new(lab.source_transport()))
            .await
            .context("connecting simulated source meter")?;
        let power: Option<Box<dyn OpticalPowerMeter>> = if cli.wavelength_nm.is_some() {
            Some(Box::new(
                Pm100d::connect(Box::new(lab.power_transport()))
                    .await
                    .context("connecting simulated power meter")?,
            ))
        } else {
            None
        };
        return Ok(SweepController::new(Box::new(source), power));
    }
    build_visa_controller(settings).await
}

#[cfg(feature = "instrument_visa")]
async fn build_visa_controller(settings: &Settings) -> Result<SweepController> {
    use std::time::Duration;
    use sweep_daq::instrument::VisaTransport;

    let sm = &settings.source_meter;
    let transport = VisaTransport::open(&sm.resource, Duration::from_millis(sm.timeout_ms))?;
    let source = Keithley2400::connect(Box::new(transport))
        .await
        .with_context(|| format!("connecting source meter at {}", sm.resource))?;
    let power: Option<Box<dyn OpticalPowerMeter>> = match &settings.power_meter {
        Some(pm) => {
            let transport =
                VisaTransport::open(&pm.resource, Duration::from_millis(pm.timeout_ms))?;
            Some(Box::new(
                Pm100d::connect(Box::new(transport))
                    .await
                    .with_context(|| format!("connecting power meter at {}", pm.resource))?,
            ))
        }
        None => None,
    };
    Ok(SweepController::new(Box::new(source), power))
}

#[cfg(not(feature = "instrument_visa"))]
async fn build_visa_controller(_settings: &Settings) -> Result<SweepController> {
    bail!("built without VISA support; rerun with --mock or rebuild with --features instrument_visa")
}

fn print_result(result: &MeasurementResult) {
    let with_power = result.samples.iter().any(|s| s.power.is_some());
    if with_power {
        println!("Voltage(V)\tCurrent(mA)\tPower(mW)");
    } else {
        println!("Voltage(V)\tCurrent(mA)");
    }
    for sample in &result.samples {
        let flag = if sample.in_compliance { " [compliance]" } else { "" };
        match sample.power {
            Some(power) => println!(
                "{:.6}\t{:.6}\t{:.6}{flag}",
                sample.voltage,
                sample.current * 1e3,
                power * 1e3
            ),
            None => println!("{:.6}\t{:.6}{flag}", sample.voltage, sample.current * 1e3),
        }
    }
    if let Some(summary) = result.summary() {
        info!(
            samples = summary.samples,
            min_current_a = summary.min_current,
            max_current_a = summary.max_current,
            compliance_hits = summary.compliance_hits,
            "sweep summary"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let config = cli.sweep_config(&settings);

    let mut controller = build_controller(&cli, &settings).await?;
    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, stopping after the current point");
            ctrl_c_cancel.cancel();
        }
    });

    let mut handle = controller.start_with_cancel(config, cancel).await?;
    let mut outcome: Option<SweepEvent> = None;
    while let Some(event) = handle.next_event().await {
        match event {
            SweepEvent::Started { total_points } => {
                info!(total_points, "sweep started");
            }
            SweepEvent::Progress { index, total, sample } => {
                info!(
                    point = index + 1,
                    total,
                    voltage = sample.voltage,
                    current_a = sample.current,
                    "point collected"
                );
            }
            terminal => outcome = Some(terminal),
        }
    }
    controller.shutdown().await?;

    match outcome {
        Some(SweepEvent::Completed(result)) => {
            print_result(&result);
            info!("sweep finished");
            Ok(())
        }
        Some(SweepEvent::Aborted(result)) => {
            print_result(&result);
            warn!(collected = result.samples.len(), "sweep aborted on request");
            Ok(())
        }
        Some(SweepEvent::Failed { result, error }) => {
            print_result(&result);
            bail!("sweep failed: {error}");
        }
        _ => bail!("sweep ended without reporting an outcome"),
    }
}
