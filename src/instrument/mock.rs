//! In-process simulated instruments for tests and hardware-free demos.
//!
//! [`MockLab`] models a resistive device under test shared by a simulated
//! Keithley 2400 and a simulated PM100D: the source meter drops its voltage
//! across a configurable resistance, and the power meter reports a power
//! proportional to the resulting current, the way a laser diode behind a
//! photodetector would. Fault injection hooks let tests script communication
//! failures at an exact point in a sweep.

use super::Transport;
use crate::error::{DaqError, DaqResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
struct LabState {
    resistance_ohms: f64,
    responsivity_w_per_a: f64,
    compliance_a: f64,
    source_voltage: f64,
    output_on: bool,
    tripped: bool,
    wavelength_nm: f64,
    // Fail the Nth ":READ?" (0-based); None disables fault injection.
    fail_read_at: Option<usize>,
    read_attempts: usize,
    setup_error: bool,
    log: Vec<String>,
}

impl LabState {
    fn measured_current(&self) -> (f64, bool) {
        if !self.output_on {
            return (0.0, false);
        }
        let ideal = self.source_voltage / self.resistance_ohms;
        if ideal.abs() > self.compliance_a {
            (self.compliance_a * ideal.signum(), true)
        } else {
            (ideal, false)
        }
    }
}

/// A simulated optical bench: one resistive device, one source meter port,
/// one power meter port.
#[derive(Clone)]
pub struct MockLab {
    state: Arc<Mutex<LabState>>,
}

impl MockLab {
    /// Creates a bench with the device resistance in ohms.
    pub fn new(resistance_ohms: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LabState {
                resistance_ohms,
                responsivity_w_per_a: 0.8,
                compliance_a: f64::INFINITY,
                source_voltage: 0.0,
                output_on: false,
                tripped: false,
                wavelength_nm: 0.0,
                fail_read_at: None,
                read_attempts: 0,
                setup_error: false,
                log: Vec::new(),
            })),
        }
    }

    /// Emitted optical power per amp of drive current, in W/A.
    pub async fn set_responsivity(&self, w_per_a: f64) {
        self.state.lock().await.responsivity_w_per_a = w_per_a;
    }

    /// Makes the Nth `:READ?` (0-based) fail with a simulated timeout.
    pub async fn fail_read_at(&self, index: usize) {
        self.state.lock().await.fail_read_at = Some(index);
    }

    /// Makes the source meter report a setup error on its next error query.
    pub async fn reject_setup(&self) {
        self.state.lock().await.setup_error = true;
    }

    /// Number of `:READ?` queries attempted so far.
    pub async fn read_attempts(&self) -> usize {
        self.state.lock().await.read_attempts
    }

    /// Wavelength most recently programmed on the power meter port, in nm.
    pub async fn wavelength_nm(&self) -> f64 {
        self.state.lock().await.wavelength_nm
    }

    /// Whether the simulated source output is currently enabled.
    pub async fn output_on(&self) -> bool {
        self.state.lock().await.output_on
    }

    /// Every command either port has received, in arrival order.
    pub async fn command_log(&self) -> Vec<String> {
        self.state.lock().await.log.clone()
    }

    /// Transport for the simulated Keithley 2400 port.
    pub fn source_transport(&self) -> MockTransport {
        MockTransport {
            role: Role::SourceMeter,
            state: Arc::clone(&self.state),
            closed: false,
        }
    }

    /// Transport for the simulated PM100D port.
    pub fn power_transport(&self) -> MockTransport {
        MockTransport {
            role: Role::PowerMeter,
            state: Arc::clone(&self.state),
            closed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    SourceMeter,
    PowerMeter,
}

/// One port of a [`MockLab`].
pub struct MockTransport {
    role: Role,
    state: Arc<Mutex<LabState>>,
    closed: bool,
}

impl MockTransport {
    fn numeric_arg(command: &str) -> DaqResult<f64> {
        command
            .rsplit(' ')
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| {
                DaqError::Communication(format!("mock: unparseable argument in '{command}'"))
            })
    }

    fn handle_source_write(&self, command: &str, state: &mut LabState) -> DaqResult<()> {
        if command == "*RST" {
            state.output_on = false;
            state.tripped = false;
            state.source_voltage = 0.0;
            state.compliance_a = f64::INFINITY;
        } else if command == ":OUTP ON" {
            state.output_on = true;
        } else if command == ":OUTP OFF" {
            state.output_on = false;
        } else if let Some(rest) = command.strip_prefix(":SOUR:VOLT ") {
            state.source_voltage = rest.parse::<f64>().map_err(|e| {
                DaqError::Communication(format!("mock: bad voltage '{rest}': {e}"))
            })?;
        } else if command.starts_with(":SENS:CURR:PROT:LEV ") {
            state.compliance_a = Self::numeric_arg(command)?;
        }
        // Mode, range and key commands are accepted silently.
        Ok(())
    }

    fn handle_source_query(&self, command: &str, state: &mut LabState) -> DaqResult<String> {
        match command {
            "*IDN?" => Ok("KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234567,C30".into()),
            ":READ?" => {
                let attempt = state.read_attempts;
                state.read_attempts += 1;
                if state.fail_read_at == Some(attempt) {
                    return Err(DaqError::Communication(
                        "mock: simulated read timeout".into(),
                    ));
                }
                let (current, tripped) = state.measured_current();
                state.tripped = tripped;
                Ok(format!("{:+.6E},{:+.6E}", current, state.source_voltage))
            }
            ":SENS:CURR:PROT:TRIP?" => Ok(if state.tripped { "1" } else { "0" }.into()),
            "SYST:ERR?" => {
                if state.setup_error {
                    state.setup_error = false;
                    Ok("-222,\"Parameter data out of range\"".into())
                } else {
                    Ok("0,\"No error\"".into())
                }
            }
            _ => Err(DaqError::Communication(format!(
                "mock: unknown source-meter query '{command}'"
            ))),
        }
    }

    fn handle_power_write(&self, command: &str, state: &mut LabState) -> DaqResult<()> {
        if command.starts_with("SENS:CORR:WAV ") {
            state.wavelength_nm = Self::numeric_arg(command)?;
        }
        // Range commands are accepted silently.
        Ok(())
    }

    fn handle_power_query(&self, command: &str, state: &mut LabState) -> DaqResult<String> {
        match command {
            "*IDN?" => Ok("Thorlabs,PM100D,P0000001,2.5.0".into()),
            "MEAS:POW?" => {
                let (current, _) = state.measured_current();
                let power = current.abs() * state.responsivity_w_per_a;
                Ok(format!("{power:+.6E}"))
            }
            _ => Err(DaqError::Communication(format!(
                "mock: unknown power-meter query '{command}'"
            ))),
        }
    }

    fn ensure_open(&self) -> DaqResult<()> {
        if self.closed {
            return Err(DaqError::Communication("mock: session is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, command: &str) -> DaqResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.log.push(command.to_string());
        match self.role {
            Role::SourceMeter => self.handle_source_write(command, &mut state),
            Role::PowerMeter => self.handle_power_write(command, &mut state),
        }
    }

    async fn query(&mut self, command: &str) -> DaqResult<String> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.log.push(command.to_string());
        match self.role {
            Role::SourceMeter => self.handle_source_query(command, &mut state),
            Role::PowerMeter => self.handle_power_query(command, &mut state),
        }
    }

    async fn close(&mut self) -> DaqResult<()> {
        self.closed = true;
        Ok(())
    }
}
