//! Vector calibration engine.
//!
//! Converts raw (error-laden) reflection measurements into corrected
//! S-parameters through the classic error-box model. For each frequency
//! point the raw measurement `m` relates to the true reflection coefficient
//! `Γ` through a bilinear transform with three unknowns — directivity `e00`,
//! source match `e11` and the combined term `Δe = e00·e11 − e10e01` (with
//! `e10e01` the reflection tracking):
//!
//! ```text
//! m = (e00 − Δe·Γ) / (1 − e11·Γ)
//! ```
//!
//! Measuring three known standards (Short, Open, Load) gives three linear
//! equations per point, `e00 − Γᵢ·Δe + mᵢΓᵢ·e11 = mᵢ`, solved as a 3×3
//! complex system — per frequency point, never globally, since the error
//! terms are frequency dependent. Correction then inverts the transform:
//!
//! ```text
//! Γ = (m − e00) / (m·e11 − Δe)
//! ```
//!
//! A Thru standard extends the model with transmission terms for two-port
//! (enhanced response) correction of S21.
//!
//! The engine has no I/O and no shared mutable state; `apply` is pure —
//! the same raw sweep and error model always produce the same result.

use log::{info, warn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{VnaError, VnaResult};
use crate::measurement::{CalibratedSweep, FrequencyPoint, SweepTag};
use crate::measurement::{SParameter, Sweep};

/// Relative pivot threshold below which the standards no longer separate and
/// the per-point system is treated as degenerate.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Ideal reflection coefficients of the calibration standards.
///
/// Defaults describe an ideal kit: Short = −1, Open = +1, Load = 0 (a
/// perfect 50 Ω termination). Characterized kits can override any of them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalKit {
    pub short: Complex64,
    pub open: Complex64,
    pub load: Complex64,
}

impl Default for CalKit {
    fn default() -> Self {
        Self {
            short: Complex64::new(-1.0, 0.0),
            open: Complex64::new(1.0, 0.0),
            load: Complex64::new(0.0, 0.0),
        }
    }
}

/// Non-fatal diagnostic: the solve (or correction) at one frequency point
/// was numerically degenerate and its corrected value is best-effort only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DegenerateCalibrationPoint {
    /// Index on the shared frequency axis.
    pub index: usize,
    /// Magnitude of the vanishing pivot or denominator.
    pub magnitude: f64,
}

/// One-port error terms for a single frequency point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnePortTerms {
    /// Directivity, e00.
    pub directivity: Complex64,
    /// Source match, e11.
    pub source_match: Complex64,
    /// Combined term Δe = e00·e11 − e10e01.
    pub delta_e: Complex64,
}

impl OnePortTerms {
    /// Reflection tracking, e10e01, recovered from the stored terms.
    pub fn reflection_tracking(&self) -> Complex64 {
        self.directivity * self.source_match - self.delta_e
    }
}

/// Transmission error terms for a single frequency point, derived from the
/// Thru standard.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwoPortTerms {
    /// Leakage with no connection, e30. Zero unless an isolation measurement
    /// is supplied.
    pub isolation: Complex64,
    /// Transmission tracking, e10e32.
    pub transmission_tracking: Complex64,
}

/// Per-frequency-point error coefficients derived from the reference
/// standards. Owned by the calibration layer; consumers only ever see the
/// [`CalibratedSweep`] produced by [`apply`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorModel {
    points: Vec<FrequencyPoint>,
    one_port: Vec<OnePortTerms>,
    two_port: Option<Vec<TwoPortTerms>>,
    degenerate: Vec<DegenerateCalibrationPoint>,
}

impl ErrorModel {
    /// The zero-error model: applying it returns the raw sweep unchanged.
    pub fn identity(points: Vec<FrequencyPoint>) -> Self {
        let one_port = points
            .iter()
            .map(|_| OnePortTerms {
                directivity: Complex64::new(0.0, 0.0),
                source_match: Complex64::new(0.0, 0.0),
                // e10e01 = 1 and e00 = e11 = 0 gives Δe = −1.
                delta_e: Complex64::new(-1.0, 0.0),
            })
            .collect();
        Self {
            points,
            one_port,
            two_port: None,
            degenerate: Vec::new(),
        }
    }

    pub fn points(&self) -> &[FrequencyPoint] {
        &self.points
    }

    pub fn is_two_port(&self) -> bool {
        self.two_port.is_some()
    }

    /// Points whose solve was degenerate at build time.
    pub fn degenerate_points(&self) -> &[DegenerateCalibrationPoint] {
        &self.degenerate
    }

    // Only used for axis comparison; sample values are irrelevant. The
    // model's own axis was validated when its source sweeps were built.
    #[allow(clippy::unwrap_used)]
    fn reference_axis(&self) -> Sweep {
        Sweep::new(
            SweepTag::Uncalibrated,
            SParameter::S11,
            self.points.clone(),
            vec![Complex64::new(0.0, 0.0); self.points.len()],
        )
        .unwrap()
    }
}

fn expect_tag(sweep: &Sweep, tag: SweepTag) -> VnaResult<()> {
    if sweep.tag() != tag {
        return Err(VnaError::InvalidStandard(format!(
            "expected a sweep tagged '{tag}', got '{}'",
            sweep.tag()
        )));
    }
    Ok(())
}

/// Solve `a · x = b` for a 3×3 complex system by Gaussian elimination with
/// partial pivoting. On a near-singular system, returns the magnitude of the
/// offending pivot as the error value.
fn solve3(mut a: [[Complex64; 3]; 3], mut b: [Complex64; 3]) -> Result<[Complex64; 3], f64> {
    let scale = a
        .iter()
        .flatten()
        .map(|c| c.norm())
        .fold(1.0f64, f64::max);

    for col in 0..3 {
        let (pivot_row, pivot_mag) = (col..3)
            .map(|row| (row, a[row][col].norm()))
            .max_by(|x, y| x.1.total_cmp(&y.1))
            .unwrap_or((col, 0.0));

        if pivot_mag < PIVOT_TOLERANCE * scale {
            return Err(pivot_mag);
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                let sub = factor * a[col][k];
                a[row][k] -= sub;
            }
            let sub = factor * b[col];
            b[row] -= sub;
        }
    }

    let mut x = [Complex64::new(0.0, 0.0); 3];
    for row in (0..3).rev() {
        let mut sum = b[row];
        for k in (row + 1)..3 {
            let sub = a[row][k] * x[k];
            sum -= sub;
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}

/// Derive the per-point error model from the measured reference standards.
///
/// All sweeps must share an identical frequency axis; mismatches fail with
/// `AxisMismatch` naming the offending standard before any numeric work.
/// Near-singular points (e.g. a malfunctioning Short whose raw measurement
/// coincides with the Open's) are flagged and given best-effort
/// response-only terms rather than NaN.
pub fn build_error_model(
    kit: &CalKit,
    short: &Sweep,
    open: &Sweep,
    load: &Sweep,
    thru: Option<&Sweep>,
) -> VnaResult<ErrorModel> {
    expect_tag(short, SweepTag::Short)?;
    expect_tag(open, SweepTag::Open)?;
    expect_tag(load, SweepTag::Load)?;

    open.check_axis(short, "open")?;
    load.check_axis(short, "load")?;
    if let Some(thru) = thru {
        expect_tag(thru, SweepTag::Thru)?;
        thru.check_axis(short, "thru")?;
    }

    let n = short.len();
    let mut one_port = Vec::with_capacity(n);
    let mut degenerate = Vec::new();

    for index in 0..n {
        let measurements = [
            (kit.short, short.samples()[index]),
            (kit.open, open.samples()[index]),
            (kit.load, load.samples()[index]),
        ];

        let mut a = [[Complex64::new(0.0, 0.0); 3]; 3];
        let mut b = [Complex64::new(0.0, 0.0); 3];
        for (row, (gamma, m)) in measurements.iter().enumerate() {
            a[row][0] = Complex64::new(1.0, 0.0);
            a[row][1] = -gamma;
            a[row][2] = m * gamma;
            b[row] = *m;
        }

        match solve3(a, b) {
            Ok([directivity, delta_e, source_match]) => {
                one_port.push(OnePortTerms {
                    directivity,
                    source_match,
                    delta_e,
                });
            }
            Err(magnitude) => {
                degenerate.push(DegenerateCalibrationPoint { index, magnitude });
                one_port.push(response_only_terms(kit, short.samples()[index], open.samples()[index], load.samples()[index]));
            }
        }
    }

    if !degenerate.is_empty() {
        warn!(
            "error model degenerate at {} of {} points (first at index {})",
            degenerate.len(),
            n,
            degenerate[0].index
        );
    }

    let two_port = thru.map(|thru| {
        thru.samples()
            .iter()
            .map(|&s21| TwoPortTerms {
                isolation: Complex64::new(0.0, 0.0),
                transmission_tracking: s21,
            })
            .collect()
    });

    info!(
        "error model built: {n} points, {}",
        if two_port.is_some() { "two-port" } else { "one-port" }
    );

    Ok(ErrorModel {
        points: short.points().to_vec(),
        one_port,
        two_port,
        degenerate,
    })
}

/// Best-effort terms when the full solve is degenerate: take the Load as
/// directivity, ignore source match, and derive tracking from the Open.
fn response_only_terms(
    kit: &CalKit,
    _short: Complex64,
    open: Complex64,
    load: Complex64,
) -> OnePortTerms {
    let directivity = load;
    let span = open - load;
    let tracking = if kit.open.norm() > 0.0 {
        span / kit.open
    } else {
        span
    };
    OnePortTerms {
        directivity,
        source_match: Complex64::new(0.0, 0.0),
        delta_e: -tracking,
    }
}

/// Apply a built error model to raw DUT measurements.
///
/// Pure: the same model and sweeps always yield an identical result. The
/// DUT axes are checked against the model's before any arithmetic. Points
/// where the correction denominator vanishes are flagged and carry the raw
/// value as a best-effort placeholder.
pub fn apply(
    model: &ErrorModel,
    dut_s11: &Sweep,
    dut_s21: Option<&Sweep>,
) -> VnaResult<CalibratedSweep> {
    expect_tag(dut_s11, SweepTag::Dut)?;
    if model.points.is_empty() {
        return Err(VnaError::InvalidStandard(
            "error model has no frequency points".to_string(),
        ));
    }
    let reference = model.reference_axis();
    dut_s11.check_axis(&reference, "dut")?;

    let two_port = match (dut_s21, &model.two_port) {
        (None, _) => None,
        (Some(s21), Some(terms)) => {
            expect_tag(s21, SweepTag::Dut)?;
            s21.check_axis(&reference, "dut s21")?;
            Some((s21, terms.as_slice()))
        }
        (Some(_), None) => {
            return Err(VnaError::InvalidStandard(
                "S21 correction requested but the error model has no thru terms".to_string(),
            ));
        }
    };

    let mut diagnostics = model.degenerate.clone();
    let mut s11 = Vec::with_capacity(dut_s11.len());

    for (index, (&m, terms)) in dut_s11
        .samples()
        .iter()
        .zip(model.one_port.iter())
        .enumerate()
    {
        let denominator = m * terms.source_match - terms.delta_e;
        if denominator.norm() < PIVOT_TOLERANCE {
            if !diagnostics.iter().any(|d| d.index == index) {
                diagnostics.push(DegenerateCalibrationPoint {
                    index,
                    magnitude: denominator.norm(),
                });
            }
            s11.push(m);
        } else {
            s11.push((m - terms.directivity) / denominator);
        }
    }

    let s21 = match two_port {
        None => None,
        Some((raw, terms)) => {
            let mut corrected = Vec::with_capacity(raw.len());
            for (index, (&m21, term)) in raw.samples().iter().zip(terms.iter()).enumerate() {
                if term.transmission_tracking.norm() < PIVOT_TOLERANCE {
                    if !diagnostics.iter().any(|d| d.index == index) {
                        diagnostics.push(DegenerateCalibrationPoint {
                            index,
                            magnitude: term.transmission_tracking.norm(),
                        });
                    }
                    corrected.push(m21);
                    continue;
                }

                // Enhanced response: normalize by the tracking, then undo the
                // source-match ripple using the one-port terms and the DUT's
                // own raw reflection.
                let one_port = &model.one_port[index];
                let normalized = (m21 - term.isolation) / term.transmission_tracking;
                let denominator =
                    dut_s11.samples()[index] * one_port.source_match - one_port.delta_e;
                if denominator.norm() < PIVOT_TOLERANCE {
                    corrected.push(normalized);
                } else {
                    corrected.push(normalized * one_port.reflection_tracking() / denominator);
                }
            }
            Some(corrected)
        }
    };

    diagnostics.sort_by_key(|d| d.index);
    Ok(CalibratedSweep::new(
        model.points.to_vec(),
        s11,
        s21,
        diagnostics,
    ))
}

/// Session-scoped calibration state: collects standard measurements,
/// invalidates the derived model whenever one is re-measured, and applies
/// the model to DUT sweeps.
///
/// Explicitly owned by the caller so independent sessions (multi-port
/// instruments, tests) never interfere.
pub struct CalibrationSession {
    kit: CalKit,
    short: Option<Sweep>,
    open: Option<Sweep>,
    load: Option<Sweep>,
    thru: Option<Sweep>,
    model: Option<ErrorModel>,
}

impl CalibrationSession {
    pub fn new(kit: CalKit) -> Self {
        Self {
            kit,
            short: None,
            open: None,
            load: None,
            thru: None,
            model: None,
        }
    }

    /// Store a measured standard; the slot is chosen by the sweep's tag.
    /// Any previously built model is discarded.
    pub fn set_standard(&mut self, sweep: Sweep) -> VnaResult<()> {
        let slot = match sweep.tag() {
            SweepTag::Short => &mut self.short,
            SweepTag::Open => &mut self.open,
            SweepTag::Load => &mut self.load,
            SweepTag::Thru => &mut self.thru,
            other => {
                return Err(VnaError::InvalidStandard(format!(
                    "'{other}' is not a calibration standard"
                )));
            }
        };
        *slot = Some(sweep);
        if self.model.take().is_some() {
            info!("calibration model invalidated by re-measured standard");
        }
        Ok(())
    }

    /// Whether Short, Open and Load have all been measured.
    pub fn is_complete(&self) -> bool {
        self.short.is_some() && self.open.is_some() && self.load.is_some()
    }

    /// Build (or rebuild) the error model from the collected standards.
    pub fn build(&mut self) -> VnaResult<&ErrorModel> {
        let short = self
            .short
            .as_ref()
            .ok_or(VnaError::InvalidStandard("short not measured".to_string()))?;
        let open = self
            .open
            .as_ref()
            .ok_or(VnaError::InvalidStandard("open not measured".to_string()))?;
        let load = self
            .load
            .as_ref()
            .ok_or(VnaError::InvalidStandard("load not measured".to_string()))?;

        let model = build_error_model(&self.kit, short, open, load, self.thru.as_ref())?;
        Ok(self.model.insert(model))
    }

    pub fn model(&self) -> Option<&ErrorModel> {
        self.model.as_ref()
    }

    /// Correct a DUT measurement with the built model.
    pub fn apply(&self, dut_s11: &Sweep, dut_s21: Option<&Sweep>) -> VnaResult<CalibratedSweep> {
        let model = self.model.as_ref().ok_or(VnaError::InvalidStandard(
            "no error model built: measure Short, Open and Load first".to_string(),
        ))?;
        apply(model, dut_s11, dut_s21)
    }
}
