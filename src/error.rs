//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, used across the
//! instrument adapters and the sweep sequencer. Using the `thiserror` crate,
//! it provides a centralized way to handle the distinct failure kinds a sweep
//! can encounter:
//!
//! - **`Connection`**: the resource address is unreachable or the device did
//!   not answer the identification query.
//! - **`Configuration`**: a parameter is semantically invalid (point count,
//!   compliance, wavelength) or rejected by the instrument. Caught before
//!   hardware contact where possible.
//! - **`Communication`**: timeout or malformed reply mid-sweep. Fatal to the
//!   current sweep; never retried silently.
//! - **`Compliance`**: the instrument limited itself at its configured
//!   current ceiling. Recoverable; the sequencer records the limited reading
//!   and continues.
//! - **`Busy`**: a second sweep was requested while one is running on the
//!   same instrument set.
//!
//! `Communication` takes precedence over `Compliance` when both could apply:
//! a failed or garbled read is reported as `Communication` before any
//! compliance status is consulted.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Resource unreachable or device silent at connect time.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Semantically invalid parameter, locally or instrument-rejected.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout or malformed reply. Fatal to the in-progress sweep.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Instrument hit its compliance limit; carries the limited reading so
    /// the sequencer can record it.
    #[error("Compliance limit reached at {voltage} V (measured {current} A)")]
    Compliance {
        /// Applied source voltage at the limited point.
        voltage: f64,
        /// Instrument-reported (limited) current in amps.
        current: f64,
    },

    /// A sweep is already running against this instrument set.
    #[error("A sweep is already in progress on this instrument")]
    Busy,

    /// Settings file could not be read or parsed.
    #[error("Config file error: {0}")]
    ConfigFile(#[from] figment::Error),

    /// Underlying I/O failure from the transport layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// True for errors the sequencer may record and move past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DaqError::Compliance { .. })
    }
}
