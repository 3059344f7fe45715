//! Keithley 2400/2450 SourceMeter adapter.
//!
//! Implements [`SourceMeter`] over any [`Transport`]. The command set follows
//! the 2400-series SCPI dialect: voltage-source mode with a current
//! compliance ceiling, auto current range, and `:READ?` replies of the form
//! `current,voltage[,...]` (unit suffixes tolerated). Compliance is detected
//! by querying the protection trip latch after each read and is reported to
//! the caller rather than clipped silently; a failed or garbled read is
//! always reported as a communication error before the trip latch is
//! consulted.

use super::{SourceMeter, SourceReading, Transport};
use crate::error::{DaqError, DaqResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Adapter for a Keithley 2400-series source meter. Sole owner of its
/// transport session.
pub struct Keithley2400 {
    transport: Option<Box<dyn Transport>>,
    identity: String,
}

impl Keithley2400 {
    /// Opens the adapter over an already-established transport, verifying
    /// the device answers an identification query.
    pub async fn connect(mut transport: Box<dyn Transport>) -> DaqResult<Self> {
        let identity = transport
            .query("*IDN?")
            .await
            .map_err(|e| DaqError::Connection(format!("source meter did not identify: {e}")))?;
        if identity.is_empty() {
            return Err(DaqError::Connection(
                "source meter returned an empty identification string".into(),
            ));
        }
        info!(identity = %identity, "connected to source meter");
        Ok(Self {
            transport: Some(transport),
            identity,
        })
    }

    fn session(&mut self) -> DaqResult<&mut Box<dyn Transport>> {
        self.transport
            .as_mut()
            .ok_or_else(|| DaqError::Connection("source meter is not connected".into()))
    }

    /// Parses a `:READ?` reply. The first field is current, the second the
    /// sensed voltage; the 2400 may append unit suffixes and extra fields.
    fn parse_reading(reply: &str) -> DaqResult<SourceReading> {
        let mut fields = reply.split(',');
        let current = Self::parse_field(fields.next(), reply, "A")?;
        let voltage = Self::parse_field(fields.next(), reply, "V")?;
        Ok(SourceReading { voltage, current })
    }

    fn parse_field(field: Option<&str>, reply: &str, unit: &str) -> DaqResult<f64> {
        field
            .map(|f| f.trim().trim_end_matches(unit))
            .and_then(|f| f.parse::<f64>().ok())
            .ok_or_else(|| {
                DaqError::Communication(format!("malformed :READ? reply '{reply}'"))
            })
    }

    /// Drains the instrument error queue head; a non-zero code means the
    /// last setup command was rejected.
    async fn check_setup_errors(&mut self) -> DaqResult<()> {
        let reply = self.session()?.query("SYST:ERR?").await?;
        let code: i64 = reply
            .split(',')
            .next()
            .and_then(|c| c.trim().parse().ok())
            .ok_or_else(|| {
                DaqError::Communication(format!("malformed SYST:ERR? reply '{reply}'"))
            })?;
        if code != 0 {
            return Err(DaqError::Configuration(format!(
                "instrument rejected setup: {reply}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceMeter for Keithley2400 {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn configure(&mut self, compliance_a: f64) -> DaqResult<()> {
        if !(compliance_a > 0.0) {
            return Err(DaqError::Configuration(format!(
                "compliance must be positive, got {compliance_a} A"
            )));
        }
        debug!(compliance_a, "configuring source meter for voltage sweep");
        let session = self.session()?;
        session.write("*RST").await?;
        session.write(":SOUR:FUNC:MODE VOLT").await?;
        session
            .write(&format!(":SENS:CURR:PROT:LEV {compliance_a}"))
            .await?;
        session.write(":SENS:CURR:RANG:AUTO 1").await?;
        session.write(":OUTP ON").await?;
        self.check_setup_errors().await
    }

    async fn set_voltage_and_read(&mut self, voltage: f64) -> DaqResult<SourceReading> {
        let session = self.session()?;
        session.write(&format!(":SOUR:VOLT {voltage}")).await?;
        let reply = session.query(":READ?").await?;
        let reading = Self::parse_reading(&reply)?;
        // Only a clean read gets as far as the trip latch; communication
        // failures above take precedence over compliance.
        let tripped = self.session()?.query(":SENS:CURR:PROT:TRIP?").await?;
        if tripped.trim() == "1" {
            return Err(DaqError::Compliance {
                voltage: reading.voltage,
                current: reading.current,
            });
        }
        Ok(reading)
    }

    async fn finish(&mut self) -> DaqResult<()> {
        let session = self.session()?;
        session.write(":OUTP OFF").await?;
        session.write(":SOUR:FUNC:MODE CURR").await?;
        // Hand the front panel back to the operator.
        session.write("SYSTEM:KEY 23").await
    }

    async fn disconnect(&mut self) -> DaqResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
            info!(identity = %self.identity, "disconnected from source meter");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some()
    }
}
