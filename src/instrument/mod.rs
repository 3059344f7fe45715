//! Instrument adapters and the transport seam beneath them.
//!
//! All hardware traffic goes through a [`Transport`], a thin async trait over
//! a VISA session (write / query / close). Device adapters own their
//! transport exclusively and translate between typed operations and SCPI
//! text; nothing outside this module addresses an instrument directly.
//!
//! Adapters implement one of two meta-instrument traits so the sweep layer
//! stays hardware-agnostic:
//!
//! - [`SourceMeter`]: voltage stimulus plus current readback (Keithley
//!   2400/2450).
//! - [`OpticalPowerMeter`]: wavelength-calibrated power readback (Thorlabs
//!   PM100D).

use crate::config::{OpticalConfig, PowerRange};
use crate::error::DaqResult;
use async_trait::async_trait;

pub mod keithley;
pub mod mock;
pub mod pm100d;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use keithley::Keithley2400;
pub use mock::{MockLab, MockTransport};
pub use pm100d::Pm100d;
#[cfg(feature = "instrument_visa")]
pub use visa::VisaTransport;

/// Raw session abstraction so device adapters can run against real VISA
/// hardware or an in-process mock.
#[async_trait]
pub trait Transport: Send {
    /// Sends a command with no reply expected.
    async fn write(&mut self, command: &str) -> DaqResult<()>;

    /// Sends a query and reads one line of reply, trimmed.
    async fn query(&mut self, command: &str) -> DaqResult<String>;

    /// Releases the underlying session. Idempotent.
    async fn close(&mut self) -> DaqResult<()>;
}

/// One source-meter readback: the applied voltage and measured current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceReading {
    /// Voltage reported by the instrument's sense circuit, in volts.
    pub voltage: f64,
    /// Measured current in amps.
    pub current: f64,
}

/// Meta-instrument trait for voltage-sourcing current meters.
#[async_trait]
pub trait SourceMeter: Send {
    /// Identification string captured at connect time (`*IDN?`).
    fn identity(&self) -> &str;

    /// Puts the instrument into voltage-source mode with the given current
    /// compliance and enables the output.
    async fn configure(&mut self, compliance_a: f64) -> DaqResult<()>;

    /// Applies `voltage` and triggers one measurement. Reports
    /// `DaqError::Compliance` (carrying the limited reading) when the
    /// instrument hit its current ceiling, `DaqError::Communication` on
    /// timeout or a malformed reply.
    async fn set_voltage_and_read(&mut self, voltage: f64) -> DaqResult<SourceReading>;

    /// Turns the output off and returns the instrument to a safe idle state.
    /// Called after every sweep, including failed and aborted ones.
    async fn finish(&mut self) -> DaqResult<()>;

    /// Releases the session. Calling it twice is a no-op, not an error.
    async fn disconnect(&mut self) -> DaqResult<()>;

    /// Whether a session is currently held.
    fn is_connected(&self) -> bool;
}

/// Meta-instrument trait for optical power meters.
#[async_trait]
pub trait OpticalPowerMeter: Send {
    /// Identification string captured at connect time.
    fn identity(&self) -> &str;

    /// Sets the calibration wavelength and range mode.
    async fn configure(&mut self, optical: &OpticalConfig) -> DaqResult<()>;

    /// Reads one power measurement in watts.
    async fn read_power(&mut self) -> DaqResult<f64>;

    /// Releases the session. Idempotent.
    async fn disconnect(&mut self) -> DaqResult<()>;
}

/// Formats a manual range command argument; `Auto` has no numeric form.
pub(crate) fn range_watts(range: PowerRange) -> Option<f64> {
    match range {
        PowerRange::Auto => None,
        PowerRange::Watts(w) => Some(w),
    }
}
