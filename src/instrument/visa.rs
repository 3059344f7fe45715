//! Real VISA transport backend (feature `instrument_visa`).
//!
//! Wraps a `visa-rs` session behind the [`Transport`] trait. VISA I/O is
//! synchronous, so calls run under `block_in_place` to keep the tokio
//! runtime responsive. Supports the usual resource strings:
//!
//! - `GPIB0::24::INSTR`
//! - `USB0::0x1313::0x8078::P0000001::INSTR`
//! - `TCPIP0::192.168.1.50::INSTR`

use super::Transport;
use crate::error::{DaqError, DaqResult};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use tokio::task;
use tracing::debug;
use visa_rs::prelude::*;

/// VISA-backed transport. One session per instrument, closed on drop.
pub struct VisaTransport {
    // The resource manager must outlive the sessions it opened.
    _rm: DefaultRM,
    instr: Option<visa_rs::Instrument>,
    resource: String,
}

impl VisaTransport {
    /// Opens a session to the given VISA resource string.
    pub fn open(resource: &str, timeout: Duration) -> DaqResult<Self> {
        let rm = DefaultRM::new()
            .map_err(|e| DaqError::Connection(format!("VISA resource manager: {e}")))?;
        let name = CString::new(resource)
            .map_err(|_| DaqError::Connection(format!("invalid resource string '{resource}'")))?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, timeout)
            .map_err(|e| DaqError::Connection(format!("cannot open '{resource}': {e}")))?;
        debug!(resource, "opened VISA session");
        Ok(Self {
            _rm: rm,
            instr: Some(instr),
            resource: resource.to_string(),
        })
    }

    fn session(&mut self) -> DaqResult<&mut visa_rs::Instrument> {
        self.instr.as_mut().ok_or_else(|| {
            DaqError::Communication(format!("VISA session '{}' is closed", self.resource))
        })
    }

    fn write_blocking(&mut self, command: &str) -> DaqResult<()> {
        let resource = self.resource.clone();
        let instr = self.session()?;
        instr
            .write_all(format!("{command}\n").as_bytes())
            .map_err(|e| DaqError::Communication(format!("write to '{resource}' failed: {e}")))
    }

    fn read_line_blocking(&mut self) -> DaqResult<String> {
        let resource = self.resource.clone();
        let instr = self.session()?;
        let mut line = String::new();
        let mut reader = BufReader::new(&*instr);
        reader
            .read_line(&mut line)
            .map_err(|e| DaqError::Communication(format!("read from '{resource}' failed: {e}")))?;
        Ok(line.trim().to_string())
    }
}

#[async_trait]
impl Transport for VisaTransport {
    async fn write(&mut self, command: &str) -> DaqResult<()> {
        task::block_in_place(|| self.write_blocking(command))
    }

    async fn query(&mut self, command: &str) -> DaqResult<String> {
        task::block_in_place(|| {
            self.write_blocking(command)?;
            self.read_line_blocking()
        })
    }

    async fn close(&mut self) -> DaqResult<()> {
        if let Some(instr) = self.instr.take() {
            debug!(resource = %self.resource, "closing VISA session");
            drop(instr);
        }
        Ok(())
    }
}
