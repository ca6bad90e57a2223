//! Instrument capability interface and drivers.
//!
//! [`Instrument`] is the capability set one firmware revision implements. An
//! implementation is selected once, at connect time, based on the probed
//! protocol variant — it is never re-dispatched per call. Drivers own their
//! adapter and codec exclusively, which is what makes command/response
//! traffic strictly sequential within a session.

mod mock;
mod nanovna;
mod session;
mod sweep;

pub use mock::MockVna;
pub use nanovna::NanoVna;
pub use session::{cancellation, CancelHandle, CancelSignal, InstrumentSession};
pub use sweep::{run_sweep, MAX_POINT_ATTEMPTS};

use async_trait::async_trait;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{VnaError, VnaResult};
use crate::measurement::{FrequencyPoint, SParameter};
use crate::protocol::SweepPlan;

/// How a firmware revision delivers sweep data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchMode {
    /// One data-fetch command returns the whole sweep.
    Block,
    /// Each frequency point is fetched with its own command.
    PerPoint,
}

/// The frequency span and point budget a device supports.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SweepLimits {
    pub min_hz: u64,
    pub max_hz: u64,
    pub max_points: usize,
}

impl SweepLimits {
    /// Check a requested plan against these limits before any command is
    /// issued.
    pub fn validate(&self, plan: &SweepPlan) -> VnaResult<()> {
        if plan.points < 1 {
            return Err(VnaError::Range("sweep must request at least 1 point".into()));
        }
        if plan.points > self.max_points {
            return Err(VnaError::Range(format!(
                "{} points requested, instrument supports at most {}",
                plan.points, self.max_points
            )));
        }
        if plan.start_hz >= plan.stop_hz {
            return Err(VnaError::Range(format!(
                "start frequency {} Hz must be below stop frequency {} Hz",
                plan.start_hz, plan.stop_hz
            )));
        }
        if plan.start_hz < self.min_hz || plan.stop_hz > self.max_hz {
            return Err(VnaError::Range(format!(
                "requested span {}..{} Hz outside instrument range {}..{} Hz",
                plan.start_hz, plan.stop_hz, self.min_hz, self.max_hz
            )));
        }
        Ok(())
    }
}

/// Firmware version as reported by the `version` command.
///
/// Ordering and equality compare the numeric triple only; the note (e.g.
/// `-rc1`) is carried for display.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub note: String,
}

impl FirmwareVersion {
    /// Lenient parse of `major.minor.revision[note]`; missing or unparseable
    /// components default to zero.
    pub fn parse(text: &str) -> Self {
        let mut version = FirmwareVersion::default();
        let mut parts = text.trim().splitn(3, '.');

        if let Some(major) = parts.next() {
            version.major = major.parse().unwrap_or(0);
        }
        if let Some(minor) = parts.next() {
            version.minor = minor.parse().unwrap_or(0);
        }
        if let Some(rest) = parts.next() {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            version.revision = digits.parse().unwrap_or(0);
            version.note = rest[digits.len()..].to_string();
        }
        version
    }

    /// Whether this looks like a real firmware report rather than a failed
    /// probe.
    pub fn is_valid(&self) -> bool {
        self.major > 0
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.revision)
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for FirmwareVersion {}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.revision, self.note)
    }
}

/// Capability set of one connected device/firmware revision.
#[async_trait]
pub trait Instrument: Send {
    /// Session identifier, used to tag log lines.
    fn id(&self) -> &str;

    fn firmware_version(&self) -> &FirmwareVersion;

    fn limits(&self) -> &SweepLimits;

    fn fetch_mode(&self) -> FetchMode;

    /// Free-form device information (board, features), for display.
    async fn info(&mut self) -> VnaResult<String>;

    /// Program a sweep configuration into the instrument.
    async fn set_sweep(&mut self, plan: &SweepPlan) -> VnaResult<()>;

    /// Read back the frequency axis of the configured sweep.
    async fn read_frequencies(&mut self) -> VnaResult<Vec<FrequencyPoint>>;

    /// Fetch the whole configured sweep for one port.
    async fn read_raw_data(&mut self, port: SParameter) -> VnaResult<Vec<Complex64>>;

    /// Fetch a single point. Only meaningful when [`Instrument::fetch_mode`]
    /// is [`FetchMode::PerPoint`].
    async fn read_point(&mut self, port: SParameter, index: usize) -> VnaResult<Complex64> {
        let _ = (port, index);
        Err(VnaError::Instrument(
            "per-point fetch not supported by this firmware".to_string(),
        ))
    }

    /// Release the underlying connection.
    async fn close(&mut self) -> VnaResult<()>;
}
