//! Instrument communication and calibration engine for low-cost vector
//! network analyzers.
//!
//! This library covers the path from serial port to corrected S-parameters:
//!
//! - [`adapters`]: byte-level serial transport (plus a scripted mock);
//! - [`protocol`]: the firmware command/response codec, one decoder per
//!   protocol variant;
//! - [`instrument`]: the capability interface, connection session and the
//!   sweep controller;
//! - [`calibration`]: Short/Open/Load(/Thru) error-box calibration;
//! - [`export`]: Touchstone serialization of calibrated results.
//!
//! Presentation concerns (plotting, Smith charts, report generation) live
//! outside this crate; they consume [`measurement::Sweep`] and
//! [`measurement::CalibratedSweep`] and nothing else.

pub mod adapters;
pub mod calibration;
pub mod error;
pub mod export;
pub mod instrument;
pub mod measurement;
pub mod protocol;
