//! Sweep parameters and application settings.
//!
//! Two layers live here, mirroring the split between what a single sweep
//! needs ([`MeasurementConfig`]) and what the application needs to find its
//! instruments ([`Settings`]). Settings are loaded with `figment` from a TOML
//! file overlaid with `SWEEP_DAQ_`-prefixed environment variables, so a
//! deployment can pin resource addresses without editing files.

use crate::error::{DaqError, DaqResult};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Power-range selection for the optical channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerRange {
    /// Let the meter pick its own range.
    Auto,
    /// Fixed full-scale range in watts.
    Watts(f64),
}

/// Optical power channel configuration (Thorlabs PM100D).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalConfig {
    /// Calibration wavelength in nanometers.
    pub wavelength_nm: f64,
    /// Range mode for the power measurement.
    #[serde(default = "default_range")]
    pub range: PowerRange,
}

fn default_range() -> PowerRange {
    PowerRange::Auto
}

/// Parameters for one voltage sweep. Immutable once the sweep starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// First stimulus voltage of the forward leg, in volts.
    pub start_voltage: f64,
    /// Last stimulus voltage of the forward leg, in volts.
    pub stop_voltage: f64,
    /// Number of points on the forward leg. Must be at least 2.
    pub points: usize,
    /// Current compliance limit in amps. Must be positive.
    pub compliance_a: f64,
    /// Traverse the range forward then back to detect hysteresis.
    #[serde(default)]
    pub bidirectional: bool,
    /// Optional optical power channel; `None` for plain I-V sweeps.
    #[serde(default)]
    pub optical: Option<OpticalConfig>,
}

impl MeasurementConfig {
    /// Checks the configuration before any instrument contact.
    pub fn validate(&self) -> DaqResult<()> {
        if self.points < 2 {
            return Err(DaqError::Configuration(format!(
                "point count must be at least 2, got {}",
                self.points
            )));
        }
        if !self.start_voltage.is_finite() || !self.stop_voltage.is_finite() {
            return Err(DaqError::Configuration(
                "start and stop voltages must be finite".into(),
            ));
        }
        if self.start_voltage == self.stop_voltage {
            return Err(DaqError::Configuration(format!(
                "start and stop voltages must differ, both are {} V",
                self.start_voltage
            )));
        }
        if !(self.compliance_a > 0.0) {
            return Err(DaqError::Configuration(format!(
                "compliance must be positive, got {} A",
                self.compliance_a
            )));
        }
        if let Some(optical) = &self.optical {
            if !(optical.wavelength_nm > 0.0) {
                return Err(DaqError::Configuration(format!(
                    "wavelength must be positive, got {} nm",
                    optical.wavelength_nm
                )));
            }
            if let PowerRange::Watts(w) = optical.range {
                if !(w > 0.0) {
                    return Err(DaqError::Configuration(format!(
                        "manual power range must be positive, got {} W",
                        w
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total stimulus points including the reverse leg, which re-visits every
    /// forward point except the turnaround apex.
    pub fn total_points(&self) -> usize {
        if self.bidirectional {
            self.points * 2 - 1
        } else {
            self.points
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            start_voltage: 0.0,
            stop_voltage: 1.0,
            points: 101,
            compliance_a: 0.01,
            bidirectional: false,
            optical: None,
        }
    }
}

/// Address and timeout for one VISA instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// VISA resource string, e.g. `GPIB0::24::INSTR`.
    pub resource: String,
    /// Session timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Application settings: instrument addresses plus default sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Source meter address.
    pub source_meter: InstrumentSettings,
    /// Optical power meter address; omit when no optical channel is attached.
    #[serde(default)]
    pub power_meter: Option<InstrumentSettings>,
    /// Default sweep parameters, overridable per run.
    #[serde(default)]
    pub sweep: MeasurementConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_meter: InstrumentSettings {
                resource: "GPIB0::24::INSTR".into(),
                timeout_ms: default_timeout_ms(),
            },
            power_meter: None,
            sweep: MeasurementConfig::default(),
        }
    }
}

impl Settings {
    /// Loads settings from defaults, then the given TOML file (if any), then
    /// `SWEEP_DAQ_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> DaqResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment
            .merge(Env::prefixed("SWEEP_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> MeasurementConfig {
        MeasurementConfig {
            start_voltage: 0.0,
            stop_voltage: 1.0,
            points: 5,
            compliance_a: 0.01,
            bidirectional: false,
            optical: None,
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_single_point() {
        let cfg = MeasurementConfig {
            points: 1,
            ..valid_config()
        };
        assert!(matches!(cfg.validate(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn rejects_zero_span() {
        let cfg = MeasurementConfig {
            stop_voltage: 0.0,
            ..valid_config()
        };
        assert!(matches!(cfg.validate(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn rejects_non_positive_compliance() {
        for compliance_a in [0.0, -0.01, f64::NAN] {
            let cfg = MeasurementConfig {
                compliance_a,
                ..valid_config()
            };
            assert!(cfg.validate().is_err(), "compliance {compliance_a}");
        }
    }

    #[test]
    fn rejects_bad_wavelength() {
        let cfg = MeasurementConfig {
            optical: Some(OpticalConfig {
                wavelength_nm: 0.0,
                range: PowerRange::Auto,
            }),
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn total_points_counts_reverse_leg_without_apex() {
        let mut cfg = valid_config();
        assert_eq!(cfg.total_points(), 5);
        cfg.bidirectional = true;
        assert_eq!(cfg.total_points(), 9);
    }

    #[test]
    fn loads_settings_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[source_meter]
resource = "TCPIP0::192.168.1.50::INSTR"
timeout_ms = 2000

[power_meter]
resource = "USB0::0x1313::0x8078::P0000001::INSTR"

[sweep]
start_voltage = -1.0
stop_voltage = 1.0
points = 21
compliance_a = 0.005
bidirectional = true
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.source_meter.resource, "TCPIP0::192.168.1.50::INSTR");
        assert_eq!(settings.source_meter.timeout_ms, 2000);
        let pm = settings.power_meter.unwrap();
        assert_eq!(pm.timeout_ms, 5000);
        assert_eq!(settings.sweep.points, 21);
        assert!(settings.sweep.bidirectional);
    }

    #[test]
    fn defaults_apply_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
