//! Wire protocol codec for the instrument firmware.
//!
//! Commands are short ASCII verbs terminated by a carriage return; what comes
//! back depends on the firmware revision. The revision is modeled as a small
//! closed set of [`ProtocolVariant`]s selected once at connect time — one
//! decoder per variant, never runtime type inspection of the hardware:
//!
//! - [`ProtocolVariant::TextV1`] — legacy firmware, line-oriented ASCII
//!   responses (`version`, `sweep`, `frequencies`, `data <ch>`).
//! - [`ProtocolVariant::BinaryV2`] — extended firmware, same command verbs
//!   but data fetches answer with a fixed-stride binary block described by a
//!   configurable [`BinaryLayout`].
//!
//! The codec is stateless per call except for the instrument's current sweep
//! configuration, which it must know to validate record counts and to pair
//! decoded samples with frequencies.

pub mod binary;
pub mod text;

pub use binary::{BinaryLayout, ChecksumMode, FieldWidth};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, VnaError, VnaResult};
use crate::measurement::{FrequencyPoint, SParameter};

/// Command terminator expected by the firmware.
pub const COMMAND_TERMINATOR: &str = "\r";

/// Prompt the firmware prints when it is ready for the next command.
pub const PROMPT: &str = "ch> ";

/// Firmware protocol revision, selected at connect time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProtocolVariant {
    /// Legacy ASCII-only firmware.
    TextV1,
    /// Extended firmware with binary data blocks.
    BinaryV2(BinaryLayout),
}

/// A requested frequency sweep: `points` samples across `[start_hz, stop_hz]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub start_hz: u64,
    pub stop_hz: u64,
    pub points: usize,
}

impl SweepPlan {
    pub fn new(start_hz: u64, stop_hz: u64, points: usize) -> Self {
        Self {
            start_hz,
            stop_hz,
            points,
        }
    }

    /// The frequency axis this plan produces: linear steps from start to
    /// stop, endpoints included.
    pub fn axis(&self) -> Vec<FrequencyPoint> {
        let n = self.points;
        (0..n)
            .map(|index| {
                let hz = if n == 1 {
                    self.start_hz
                } else {
                    let span = self.stop_hz - self.start_hz;
                    self.start_hz + span * index as u64 / (n as u64 - 1)
                };
                FrequencyPoint { index, hz }
            })
            .collect()
    }
}

/// Protocol codec: encodes commands, decodes responses, tracks the sweep
/// configuration currently programmed into the instrument.
#[derive(Clone, Debug)]
pub struct Codec {
    variant: ProtocolVariant,
    plan: Option<SweepPlan>,
}

impl Codec {
    pub fn new(variant: ProtocolVariant) -> Self {
        Self {
            variant,
            plan: None,
        }
    }

    pub fn variant(&self) -> &ProtocolVariant {
        &self.variant
    }

    /// Record the sweep configuration the instrument was just given.
    pub fn set_plan(&mut self, plan: SweepPlan) {
        self.plan = Some(plan);
    }

    pub fn plan(&self) -> Option<&SweepPlan> {
        self.plan.as_ref()
    }

    fn plan_or_err(&self) -> VnaResult<&SweepPlan> {
        self.plan.as_ref().ok_or_else(|| {
            VnaError::Instrument("no sweep configured: issue a sweep command first".to_string())
        })
    }

    // --- command encoding -------------------------------------------------

    pub fn encode_version(&self) -> Vec<u8> {
        text::encode_command("version")
    }

    pub fn encode_info(&self) -> Vec<u8> {
        text::encode_command("info")
    }

    pub fn encode_sweep(&self, plan: &SweepPlan) -> Vec<u8> {
        text::encode_command(&format!(
            "sweep {} {} {}",
            plan.start_hz, plan.stop_hz, plan.points
        ))
    }

    pub fn encode_frequencies(&self) -> Vec<u8> {
        text::encode_command("frequencies")
    }

    pub fn encode_data(&self, port: SParameter) -> Vec<u8> {
        let channel = match port {
            SParameter::S11 => 0,
            SParameter::S21 => 1,
        };
        text::encode_command(&format!("data {channel}"))
    }

    // --- response decoding ------------------------------------------------

    /// Expected payload line count for an ASCII response to `frequencies` or
    /// `data`, from the configured plan.
    pub fn expected_lines(&self) -> VnaResult<usize> {
        Ok(self.plan_or_err()?.points)
    }

    /// Expected byte length of a binary data block, if this variant uses one.
    pub fn binary_block_len(&self) -> VnaResult<Option<usize>> {
        match &self.variant {
            ProtocolVariant::TextV1 => Ok(None),
            ProtocolVariant::BinaryV2(layout) => {
                Ok(Some(layout.block_len(self.plan_or_err()?.points)))
            }
        }
    }

    /// Decode a `frequencies` response (always line-oriented ASCII).
    pub fn decode_frequencies(&self, lines: &[String]) -> VnaResult<Vec<FrequencyPoint>> {
        let plan = self.plan_or_err()?;
        text::decode_frequencies(lines, plan.points).map_err(VnaError::from)
    }

    /// Decode a data fetch response into one complex sample per frequency
    /// point. `raw` is the payload after the echoed command line.
    pub fn decode_sweep_data(&self, raw: &[u8]) -> VnaResult<Vec<Complex64>> {
        let plan = self.plan_or_err()?;
        match &self.variant {
            ProtocolVariant::TextV1 => {
                let lines = text::payload_lines(raw);
                text::decode_data(&lines, plan.points).map_err(VnaError::from)
            }
            ProtocolVariant::BinaryV2(layout) => {
                binary::decode_block(layout, raw, plan.points).map_err(VnaError::from)
            }
        }
    }
}

/// Validate a decoded frequency axis against the plan that requested it:
/// exact count, strictly ascending, spanning [start, stop].
pub fn validate_axis(points: &[FrequencyPoint], plan: &SweepPlan) -> VnaResult<()> {
    if points.len() != plan.points {
        return Err(ProtocolError::RecordCount {
            expected: plan.points,
            actual: points.len(),
        }
        .into());
    }
    for pair in points.windows(2) {
        if pair[1].hz <= pair[0].hz {
            return Err(ProtocolError::Malformed(format!(
                "frequency axis not ascending at index {}",
                pair[1].index
            ))
            .into());
        }
    }
    // Endpoints must land on the requested span.
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        if first.hz != plan.start_hz || last.hz != plan.stop_hz {
            return Err(ProtocolError::Malformed(format!(
                "axis spans {}..{} Hz, requested {}..{} Hz",
                first.hz, last.hz, plan.start_hz, plan.stop_hz
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_axis_endpoints() {
        let plan = SweepPlan::new(1_000_000, 2_000_000, 11);
        let axis = plan.axis();
        assert_eq!(axis.len(), 11);
        assert_eq!(axis[0].hz, 1_000_000);
        assert_eq!(axis[10].hz, 2_000_000);
        assert!(axis.windows(2).all(|p| p[1].hz > p[0].hz));
    }

    #[test]
    fn test_single_point_axis() {
        let plan = SweepPlan::new(5_000_000, 6_000_000, 1);
        let axis = plan.axis();
        assert_eq!(axis.len(), 1);
        assert_eq!(axis[0].hz, 5_000_000);
    }

    #[test]
    fn test_encode_sweep_command() {
        let codec = Codec::new(ProtocolVariant::TextV1);
        let bytes = codec.encode_sweep(&SweepPlan::new(50_000, 900_000_000, 101));
        assert_eq!(bytes, b"sweep 50000 900000000 101\r");
    }

    #[test]
    fn test_decode_requires_plan() {
        let codec = Codec::new(ProtocolVariant::TextV1);
        assert!(codec.decode_sweep_data(b"0.1 0.2\r\n").is_err());
    }

    #[test]
    fn test_validate_axis_span() {
        let plan = SweepPlan::new(1_000, 2_000, 2);
        let good = vec![
            FrequencyPoint { index: 0, hz: 1_000 },
            FrequencyPoint { index: 1, hz: 2_000 },
        ];
        assert!(validate_axis(&good, &plan).is_ok());

        let short_span = vec![
            FrequencyPoint { index: 0, hz: 1_000 },
            FrequencyPoint { index: 1, hz: 1_500 },
        ];
        assert!(validate_axis(&short_span, &plan).is_err());
    }
}
