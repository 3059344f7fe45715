//! Source-meter sweep control and P-I-V data acquisition.
//!
//! This crate drives a Keithley 2400-series SourceMeter (and optionally a
//! Thorlabs PM100D optical power meter) over VISA/SCPI to perform I-V and
//! P-I-V voltage sweeps. It is organized in three layers:
//!
//! - [`instrument`]: session ownership, SCPI command formatting and reply
//!   parsing, behind hardware-agnostic traits. A full in-process mock bench
//!   ships with the crate for hardware-free operation and testing; the real
//!   VISA backend is behind the `instrument_visa` feature.
//! - [`sweep`]: the sequencer that turns a [`config::MeasurementConfig`]
//!   into an ordered stimulus sequence, drives the instruments point by
//!   point on a worker task, and notifies consumers over an event channel.
//! - [`measurement`]: the immutable per-sweep result handed to consumers
//!   (plotting, tables, exporters) once the sweep reaches a terminal state.
//!
//! # Example
//!
//! ```
//! use sweep_daq::config::MeasurementConfig;
//! use sweep_daq::instrument::{Keithley2400, MockLab};
//! use sweep_daq::sweep::{SweepController, SweepEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let lab = MockLab::new(1000.0);
//! let source = Keithley2400::connect(Box::new(lab.source_transport())).await?;
//! let mut controller = SweepController::new(Box::new(source), None);
//!
//! let config = MeasurementConfig {
//!     start_voltage: 0.0,
//!     stop_voltage: 1.0,
//!     points: 5,
//!     compliance_a: 0.01,
//!     bidirectional: false,
//!     optical: None,
//! };
//! let mut handle = controller.start(config).await?;
//! while let Some(event) = handle.next_event().await {
//!     if let SweepEvent::Completed(result) = event {
//!         assert_eq!(result.samples.len(), 5);
//!     }
//! }
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod sweep;

pub use config::{MeasurementConfig, OpticalConfig, PowerRange, Settings};
pub use error::{DaqError, DaqResult};
pub use measurement::{MeasurementResult, Sample, SweepStatus, SweepSummary};
pub use sweep::{CancelToken, SweepController, SweepEvent, SweepHandle};
