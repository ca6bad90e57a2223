//! Measurement data model.
//!
//! The types here are created fresh per sweep request and are immutable once
//! fully populated: a [`Sweep`] is validated on construction and never
//! mutated afterwards, so it is safe to hand to multiple consumers.

mod sweep;

pub use sweep::{CalibratedSweep, Sweep};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Default reference impedance for calibrated results, in ohms.
pub const DEFAULT_REFERENCE_IMPEDANCE: f64 = 50.0;

/// One point on a sweep's frequency axis.
///
/// Points are ordered ascending and unique within a sweep; `index` is the
/// zero-based position on the axis and doubles as the record index on the
/// wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyPoint {
    /// Zero-based position on the sweep axis.
    pub index: usize,
    /// Frequency in Hz.
    pub hz: u64,
}

/// Measurement port of a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SParameter {
    /// Reflection at port 1.
    S11,
    /// Transmission from port 1 to port 2.
    S21,
}

impl std::fmt::Display for SParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SParameter::S11 => write!(f, "S11"),
            SParameter::S21 => write!(f, "S21"),
        }
    }
}

/// What a sweep represents.
///
/// A sweep comes off the instrument tagged [`SweepTag::Uncalibrated`]; the
/// caller re-tags it when it is used as a calibration standard or as the
/// device under test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepTag {
    Uncalibrated,
    Short,
    Open,
    Load,
    Thru,
    Dut,
}

impl std::fmt::Display for SweepTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SweepTag::Uncalibrated => "uncalibrated",
            SweepTag::Short => "short",
            SweepTag::Open => "open",
            SweepTag::Load => "load",
            SweepTag::Thru => "thru",
            SweepTag::Dut => "dut",
        };
        write!(f, "{name}")
    }
}

/// A single complex measurement associated with one frequency point and one
/// port.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexSample {
    /// The frequency point this sample belongs to.
    pub point: FrequencyPoint,
    /// Which S-parameter was measured.
    pub port: SParameter,
    /// The raw or corrected reflection/transmission coefficient.
    pub gamma: Complex64,
}
