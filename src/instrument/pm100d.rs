//! Thorlabs PM100D optical power meter adapter.
//!
//! The PM100D speaks standard SCPI over USB-TMC: wavelength correction via
//! `SENS:CORR:WAV`, range selection via `SENS:POW:RANG`, and a one-shot
//! power measurement via `MEAS:POW?` returning watts.

use super::{range_watts, OpticalPowerMeter, Transport};
use crate::config::OpticalConfig;
use crate::error::{DaqError, DaqResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Adapter for a Thorlabs PM100D. Sole owner of its transport session.
pub struct Pm100d {
    transport: Option<Box<dyn Transport>>,
    identity: String,
}

impl Pm100d {
    /// Opens the adapter over an already-established transport, verifying
    /// the device answers an identification query.
    pub async fn connect(mut transport: Box<dyn Transport>) -> DaqResult<Self> {
        let identity = transport
            .query("*IDN?")
            .await
            .map_err(|e| DaqError::Connection(format!("power meter did not identify: {e}")))?;
        if identity.is_empty() {
            return Err(DaqError::Connection(
                "power meter returned an empty identification string".into(),
            ));
        }
        info!(identity = %identity, "connected to power meter");
        Ok(Self {
            transport: Some(transport),
            identity,
        })
    }

    fn session(&mut self) -> DaqResult<&mut Box<dyn Transport>> {
        self.transport
            .as_mut()
            .ok_or_else(|| DaqError::Connection("power meter is not connected".into()))
    }
}

#[async_trait]
impl OpticalPowerMeter for Pm100d {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn configure(&mut self, optical: &OpticalConfig) -> DaqResult<()> {
        debug!(
            wavelength_nm = optical.wavelength_nm,
            "configuring power meter"
        );
        let session = self.session()?;
        session
            .write(&format!("SENS:CORR:WAV {}", optical.wavelength_nm))
            .await?;
        match range_watts(optical.range) {
            None => session.write("SENS:POW:RANG:AUTO 1").await,
            Some(watts) => {
                session.write("SENS:POW:RANG:AUTO 0").await?;
                session
                    .write(&format!("SENS:POW:RANG:UPP {watts}"))
                    .await
            }
        }
    }

    async fn read_power(&mut self) -> DaqResult<f64> {
        let reply = self.session()?.query("MEAS:POW?").await?;
        reply.trim().parse::<f64>().map_err(|_| {
            DaqError::Communication(format!("malformed MEAS:POW? reply '{reply}'"))
        })
    }

    async fn disconnect(&mut self) -> DaqResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
            info!(identity = %self.identity, "disconnected from power meter");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerRange;
    use crate::instrument::MockLab;

    #[tokio::test]
    async fn configure_sets_wavelength_and_auto_range() {
        let lab = MockLab::new(1000.0);
        let mut meter = Pm100d::connect(Box::new(lab.power_transport()))
            .await
            .unwrap();
        meter
            .configure(&OpticalConfig {
                wavelength_nm: 633.0,
                range: PowerRange::Auto,
            })
            .await
            .unwrap();
        let log = lab.command_log().await;
        assert_eq!(log, vec!["*IDN?", "SENS:CORR:WAV 633", "SENS:POW:RANG:AUTO 1"]);
    }

    #[tokio::test]
    async fn manual_range_disables_auto() {
        let lab = MockLab::new(1000.0);
        let mut meter = Pm100d::connect(Box::new(lab.power_transport()))
            .await
            .unwrap();
        meter
            .configure(&OpticalConfig {
                wavelength_nm: 1550.0,
                range: PowerRange::Watts(0.001),
            })
            .await
            .unwrap();
        let log = lab.command_log().await;
        assert!(log.contains(&"SENS:POW:RANG:AUTO 0".to_string()));
        assert!(log.contains(&"SENS:POW:RANG:UPP 0.001".to_string()));
    }

    #[tokio::test]
    async fn reads_power_in_watts() {
        let lab = MockLab::new(1000.0);
        lab.set_responsivity(1.0).await;
        let mut source = lab.source_transport();
        source.write(":OUTP ON").await.unwrap();
        source.write(":SOUR:VOLT 2.0").await.unwrap();

        let mut meter = Pm100d::connect(Box::new(lab.power_transport()))
            .await
            .unwrap();
        let watts = meter.read_power().await.unwrap();
        assert!((watts - 0.002).abs() < 1e-12);
    }

    #[tokio::test]
    async fn disconnect_twice_is_a_no_op() {
        let lab = MockLab::new(1000.0);
        let mut meter = Pm100d::connect(Box::new(lab.power_transport()))
            .await
            .unwrap();
        meter.disconnect().await.unwrap();
        meter.disconnect().await.unwrap();
    }
}
