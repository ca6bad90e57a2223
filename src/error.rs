//! Custom error types for the toolkit.
//!
//! This module defines the primary error type, `VnaError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of failures a measurement session can produce,
//! from serial I/O problems to protocol violations and calibration
//! preconditions.
//!
//! ## Error Hierarchy
//!
//! `VnaError` is an enum that consolidates the error sources:
//!
//! - **`Connection`**: the serial port could not be opened, the requested baud
//!   rate was rejected, or the firmware did not answer the connect probe.
//! - **`Timeout`**: no byte at all arrived inside the bounded read window.
//!   Distinct from `Protocol(Incomplete)`, where data arrived but stopped
//!   short; incomplete-but-present data is still useful for diagnostics.
//! - **`Protocol`**: the firmware reply violated the wire format. The
//!   [`ProtocolError`] subtypes carry the failing record index and the
//!   expected/actual values so callers can show an actionable message.
//! - **`Range`**: sweep parameters that fail validation before any command is
//!   issued (zero points, inverted span, outside the instrument limits).
//! - **`SweepFailed`**: a point could not be acquired even after the bounded
//!   retry budget; names the failing index. A partial sweep is never returned
//!   as if complete.
//! - **`AxisMismatch`**: calibration inputs whose frequency axes differ.
//!   Checked eagerly, before any numeric work starts.
//! - **`Cancelled`**: a sweep was cancelled between points.
//!
//! Degenerate calibration points are deliberately NOT an error variant: they
//! are non-fatal diagnostics carried on the calibrated result (see
//! `calibration::DegenerateCalibrationPoint`).

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type VnaResult<T> = std::result::Result<T, VnaError>;

/// Wire-format violations reported by the protocol codec.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("checksum mismatch at record {index}: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        index: usize,
        expected: u8,
        actual: u8,
    },

    /// The response terminated early: data arrived, then stopped before the
    /// expected record count was reached. Counts are in records.
    #[error("incomplete response: expected {expected} records, received {received}")]
    Incomplete { expected: usize, received: usize },

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("record count mismatch: expected {expected}, got {actual}")]
    RecordCount { expected: usize, actual: usize },

    #[error("duplicate record index {0}")]
    DuplicateIndex(usize),
}

#[derive(Error, Debug)]
pub enum VnaError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Read timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid sweep parameters: {0}")]
    Range(String),

    #[error("Sweep failed at point {index} after {attempts} attempts: {source}")]
    SweepFailed {
        index: usize,
        attempts: u32,
        source: Box<VnaError>,
    },

    #[error("Frequency axis mismatch for '{standard}': {detail}")]
    AxisMismatch { standard: String, detail: String },

    #[error("Calibration standard missing or mistagged: {0}")]
    InvalidStandard(String),

    #[error("Sweep cancelled")]
    Cancelled,

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Serial port not connected")]
    NotConnected,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VnaError {
    /// Whether a bounded retry may help: timeouts and I/O hiccups are
    /// transient, everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, VnaError::Timeout { .. } | VnaError::Io(_))
    }

    /// The first frequency-point index the error implicates, if it carries
    /// one. Used by the sweep controller to name the failing point when a
    /// block fetch goes wrong partway through.
    pub fn point_index(&self) -> Option<usize> {
        match self {
            VnaError::Protocol(ProtocolError::Checksum { index, .. }) => Some(*index),
            VnaError::Protocol(ProtocolError::Incomplete { received, .. }) => Some(*received),
            VnaError::Protocol(ProtocolError::DuplicateIndex(index)) => Some(*index),
            VnaError::SweepFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}
