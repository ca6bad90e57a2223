//! Sweep containers: raw instrument sweeps and calibrated results.

use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::{ComplexSample, FrequencyPoint, SParameter, SweepTag, DEFAULT_REFERENCE_IMPEDANCE};
use crate::calibration::DegenerateCalibrationPoint;
use crate::error::{VnaError, VnaResult};

/// An ordered sequence of complex samples, one per frequency point, for a
/// single measurement port.
///
/// Invariant, enforced on construction: the frequency axis is strictly
/// ascending with unique frequencies, and there is exactly one sample per
/// point. All sweeps combined in one calibration run must share an identical
/// axis; [`Sweep::check_axis`] verifies that before any numeric work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sweep {
    tag: SweepTag,
    port: SParameter,
    points: Vec<FrequencyPoint>,
    samples: Vec<Complex64>,
    acquired_at: DateTime<Utc>,
}

impl Sweep {
    /// Build a sweep, validating the axis invariant.
    pub fn new(
        tag: SweepTag,
        port: SParameter,
        points: Vec<FrequencyPoint>,
        samples: Vec<Complex64>,
    ) -> VnaResult<Self> {
        if points.len() != samples.len() {
            return Err(VnaError::Range(format!(
                "{} frequency points but {} samples",
                points.len(),
                samples.len()
            )));
        }
        if points.is_empty() {
            return Err(VnaError::Range("sweep has no points".to_string()));
        }
        for (i, pair) in points.windows(2).enumerate() {
            if pair[1].hz <= pair[0].hz {
                return Err(VnaError::Range(format!(
                    "frequency axis not strictly ascending at index {}: {} Hz then {} Hz",
                    i + 1,
                    pair[0].hz,
                    pair[1].hz
                )));
            }
        }
        for (i, point) in points.iter().enumerate() {
            if point.index != i {
                return Err(VnaError::Range(format!(
                    "frequency point at position {i} carries index {}",
                    point.index
                )));
            }
        }
        Ok(Self {
            tag,
            port,
            points,
            samples,
            acquired_at: Utc::now(),
        })
    }

    /// The same sweep under a new tag, e.g. after measuring a Short standard.
    pub fn retagged(mut self, tag: SweepTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn tag(&self) -> SweepTag {
        self.tag
    }

    pub fn port(&self) -> SParameter {
        self.port
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[FrequencyPoint] {
        &self.points
    }

    pub fn samples(&self) -> &[Complex64] {
        &self.samples
    }

    /// When acquisition of the final point completed.
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Iterate samples with their frequency point and port attached.
    pub fn iter(&self) -> impl Iterator<Item = ComplexSample> + '_ {
        self.points
            .iter()
            .zip(self.samples.iter())
            .map(|(point, gamma)| ComplexSample {
                point: *point,
                port: self.port,
                gamma: *gamma,
            })
    }

    /// Whether `other` shares this sweep's exact frequency axis.
    pub fn same_axis(&self, other: &Sweep) -> bool {
        self.points == other.points
    }

    /// Verify the shared-axis invariant against a reference sweep, naming the
    /// offending standard on failure. No numeric work may run before this.
    pub fn check_axis(&self, reference: &Sweep, standard: &str) -> VnaResult<()> {
        if self.points.len() != reference.points.len() {
            return Err(VnaError::AxisMismatch {
                standard: standard.to_string(),
                detail: format!(
                    "expected {} points, got {}",
                    reference.points.len(),
                    self.points.len()
                ),
            });
        }
        for (mine, theirs) in self.points.iter().zip(reference.points.iter()) {
            if mine != theirs {
                return Err(VnaError::AxisMismatch {
                    standard: standard.to_string(),
                    detail: format!(
                        "frequency differs at index {}: {} Hz vs {} Hz",
                        theirs.index, mine.hz, theirs.hz
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Corrected S-parameters plus the shared frequency axis.
///
/// This is the artifact handed to the Touchstone exporter and to the
/// presentation layer. It is derived, read-only, and safe to share across
/// consumers. Points the calibration engine could not solve confidently are
/// listed in `diagnostics`; their values are best-effort.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibratedSweep {
    points: Vec<FrequencyPoint>,
    s11: Vec<Complex64>,
    s21: Option<Vec<Complex64>>,
    reference_impedance: f64,
    diagnostics: Vec<DegenerateCalibrationPoint>,
}

impl CalibratedSweep {
    pub(crate) fn new(
        points: Vec<FrequencyPoint>,
        s11: Vec<Complex64>,
        s21: Option<Vec<Complex64>>,
        diagnostics: Vec<DegenerateCalibrationPoint>,
    ) -> Self {
        Self {
            points,
            s11,
            s21,
            reference_impedance: DEFAULT_REFERENCE_IMPEDANCE,
            diagnostics,
        }
    }

    /// Wrap a raw reflection sweep without applying any correction, e.g. for
    /// exporting an uncalibrated quick look. The result carries no
    /// diagnostics and the default reference impedance.
    pub fn from_uncorrected(sweep: &Sweep) -> Self {
        Self {
            points: sweep.points().to_vec(),
            s11: sweep.samples().to_vec(),
            s21: None,
            reference_impedance: DEFAULT_REFERENCE_IMPEDANCE,
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[FrequencyPoint] {
        &self.points
    }

    pub fn s11(&self) -> &[Complex64] {
        &self.s11
    }

    /// Corrected transmission, present only for two-port calibrations.
    pub fn s21(&self) -> Option<&[Complex64]> {
        self.s21.as_deref()
    }

    pub fn reference_impedance(&self) -> f64 {
        self.reference_impedance
    }

    /// Frequency points the engine flagged as low-confidence.
    pub fn diagnostics(&self) -> &[DegenerateCalibrationPoint] {
        &self.diagnostics
    }

    pub fn is_flagged(&self, index: usize) -> bool {
        self.diagnostics.iter().any(|d| d.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(hzs: &[u64]) -> Vec<FrequencyPoint> {
        hzs.iter()
            .enumerate()
            .map(|(index, &hz)| FrequencyPoint { index, hz })
            .collect()
    }

    #[test]
    fn test_sweep_rejects_descending_axis() {
        let points = vec![
            FrequencyPoint { index: 0, hz: 2_000_000 },
            FrequencyPoint { index: 1, hz: 1_000_000 },
        ];
        let samples = vec![Complex64::new(0.0, 0.0); 2];
        let err = Sweep::new(SweepTag::Uncalibrated, SParameter::S11, points, samples);
        assert!(matches!(err, Err(VnaError::Range(_))));
    }

    #[test]
    fn test_sweep_rejects_length_mismatch() {
        let points = axis(&[1_000_000, 2_000_000, 3_000_000]);
        let samples = vec![Complex64::new(0.0, 0.0); 2];
        let err = Sweep::new(SweepTag::Uncalibrated, SParameter::S11, points, samples);
        assert!(matches!(err, Err(VnaError::Range(_))));
    }

    #[test]
    fn test_check_axis_names_standard_and_index() {
        let a = Sweep::new(
            SweepTag::Short,
            SParameter::S11,
            axis(&[1_000_000, 2_000_000]),
            vec![Complex64::new(-1.0, 0.0); 2],
        )
        .unwrap();
        let b = Sweep::new(
            SweepTag::Open,
            SParameter::S11,
            axis(&[1_000_000, 2_500_000]),
            vec![Complex64::new(1.0, 0.0); 2],
        )
        .unwrap();

        match b.check_axis(&a, "open") {
            Err(VnaError::AxisMismatch { standard, detail }) => {
                assert_eq!(standard, "open");
                assert!(detail.contains("index 1"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!a.same_axis(&b));
    }

    #[test]
    fn test_retag_preserves_data() {
        let sweep = Sweep::new(
            SweepTag::Uncalibrated,
            SParameter::S11,
            axis(&[1_000_000]),
            vec![Complex64::new(0.5, -0.5)],
        )
        .unwrap();
        let retagged = sweep.retagged(SweepTag::Dut);
        assert_eq!(retagged.tag(), SweepTag::Dut);
        assert_eq!(retagged.samples()[0], Complex64::new(0.5, -0.5));
    }
}
