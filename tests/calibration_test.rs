//! Calibration engine properties: known-reference recovery, identity model,
//! axis preconditions and degenerate-standard handling.

use num_complex::Complex64;
use std::f64::consts::TAU;

use vna_toolkit::calibration::{
    apply, build_error_model, CalKit, CalibrationSession, ErrorModel,
};
use vna_toolkit::error::VnaError;
use vna_toolkit::measurement::{FrequencyPoint, SParameter, Sweep, SweepTag};

fn axis(n: usize) -> Vec<FrequencyPoint> {
    (0..n)
        .map(|index| FrequencyPoint {
            index,
            hz: 1_000_000 + index as u64 * 500_000,
        })
        .collect()
}

/// The true (injected) error terms at one frequency point.
struct TrueErrors {
    e00: Complex64,
    e11: Complex64,
    e10e01: Complex64,
}

fn true_errors(hz: u64) -> TrueErrors {
    let theta = TAU * hz as f64 / 1.0e9;
    TrueErrors {
        e00: Complex64::from_polar(0.05, theta),
        e11: Complex64::from_polar(0.15, -theta / 2.0),
        e10e01: Complex64::from_polar(0.95, theta / 3.0),
    }
}

/// Forward model: what the reflectometer reads for a true coefficient.
fn measure(errors: &TrueErrors, gamma: Complex64) -> Complex64 {
    errors.e00 + errors.e10e01 * gamma / (Complex64::new(1.0, 0.0) - errors.e11 * gamma)
}

fn standard_sweep(tag: SweepTag, points: &[FrequencyPoint], gamma: Complex64) -> Sweep {
    let samples = points
        .iter()
        .map(|p| measure(&true_errors(p.hz), gamma))
        .collect();
    Sweep::new(SweepTag::Uncalibrated, SParameter::S11, points.to_vec(), samples)
        .unwrap()
        .retagged(tag)
}

/// A frequency-dependent DUT worth recovering.
fn dut_gamma(hz: u64) -> Complex64 {
    Complex64::from_polar(0.6, -TAU * hz as f64 / 4.0e8)
}

#[test]
fn known_reference_scenario_recovers_injected_dut() {
    let kit = CalKit::default();
    let points = axis(21);

    let short = standard_sweep(SweepTag::Short, &points, kit.short);
    let open = standard_sweep(SweepTag::Open, &points, kit.open);
    let load = standard_sweep(SweepTag::Load, &points, kit.load);

    let dut_samples: Vec<Complex64> = points
        .iter()
        .map(|p| measure(&true_errors(p.hz), dut_gamma(p.hz)))
        .collect();
    let dut = Sweep::new(SweepTag::Uncalibrated, SParameter::S11, points.clone(), dut_samples)
        .unwrap()
        .retagged(SweepTag::Dut);

    let model = build_error_model(&kit, &short, &open, &load, None).unwrap();
    assert!(model.degenerate_points().is_empty());

    let calibrated = apply(&model, &dut, None).unwrap();
    assert!(calibrated.diagnostics().is_empty());
    assert_eq!(calibrated.len(), 21);
    assert_eq!(calibrated.reference_impedance(), 50.0);

    for (point, &corrected) in points.iter().zip(calibrated.s11()) {
        let truth = dut_gamma(point.hz);
        let diff = (corrected - truth).norm();
        assert!(diff < 1e-9, "index {}: error {diff}", point.index);
    }
}

#[test]
fn apply_is_pure() {
    let kit = CalKit::default();
    let points = axis(5);
    let short = standard_sweep(SweepTag::Short, &points, kit.short);
    let open = standard_sweep(SweepTag::Open, &points, kit.open);
    let load = standard_sweep(SweepTag::Load, &points, kit.load);
    let dut = standard_sweep(SweepTag::Dut, &points, Complex64::new(0.3, 0.3));

    let model = build_error_model(&kit, &short, &open, &load, None).unwrap();
    let first = apply(&model, &dut, None).unwrap();
    let second = apply(&model, &dut, None).unwrap();
    assert_eq!(first.s11(), second.s11());
}

#[test]
fn identity_model_returns_sweep_unchanged() {
    let points = axis(11);
    let samples: Vec<Complex64> = points
        .iter()
        .map(|p| dut_gamma(p.hz))
        .collect();
    let dut = Sweep::new(
        SweepTag::Uncalibrated,
        SParameter::S11,
        points.clone(),
        samples.clone(),
    )
    .unwrap()
    .retagged(SweepTag::Dut);

    let model = ErrorModel::identity(points);
    let calibrated = apply(&model, &dut, None).unwrap();

    for (original, corrected) in samples.iter().zip(calibrated.s11()) {
        assert!((original - corrected).norm() < 1e-12);
    }
}

#[test]
fn mismatched_axes_fail_before_numeric_work() {
    let kit = CalKit::default();
    let points = axis(5);
    let short = standard_sweep(SweepTag::Short, &points, kit.short);
    let open = standard_sweep(SweepTag::Open, &points, kit.open);

    // Load measured on a shifted axis.
    let shifted: Vec<FrequencyPoint> = (0..5)
        .map(|index| FrequencyPoint {
            index,
            hz: 2_000_000 + index as u64 * 500_000,
        })
        .collect();
    let load = standard_sweep(SweepTag::Load, &shifted, kit.load);

    match build_error_model(&kit, &short, &open, &load, None) {
        Err(VnaError::AxisMismatch { standard, .. }) => assert_eq!(standard, "load"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn degenerate_standards_flag_every_point_without_nan() {
    let kit = CalKit::default();
    let points = axis(7);

    // A broken Short that measures identically to the Open.
    let open = standard_sweep(SweepTag::Open, &points, kit.open);
    let broken_short = standard_sweep(SweepTag::Short, &points, kit.open);
    let load = standard_sweep(SweepTag::Load, &points, kit.load);

    let model = build_error_model(&kit, &broken_short, &open, &load, None).unwrap();
    assert_eq!(model.degenerate_points().len(), 7);

    let dut = standard_sweep(SweepTag::Dut, &points, Complex64::new(0.2, -0.1));
    let calibrated = apply(&model, &dut, None).unwrap();

    for index in 0..7 {
        assert!(calibrated.is_flagged(index));
        let value = calibrated.s11()[index];
        assert!(value.re.is_finite() && value.im.is_finite());
    }
}

#[test]
fn two_port_thru_correction_recovers_transmission() {
    let kit = CalKit::default();
    let points = axis(9);

    let short = standard_sweep(SweepTag::Short, &points, kit.short);
    let open = standard_sweep(SweepTag::Open, &points, kit.open);
    let load = standard_sweep(SweepTag::Load, &points, kit.load);

    // Transmission tracking the thru standard sees (true thru S21 = 1).
    let tracking =
        |hz: u64| Complex64::from_polar(0.8, -TAU * hz as f64 / 2.0e9);
    let thru_samples: Vec<Complex64> = points.iter().map(|p| tracking(p.hz)).collect();
    let thru = Sweep::new(SweepTag::Uncalibrated, SParameter::S21, points.clone(), thru_samples)
        .unwrap()
        .retagged(SweepTag::Thru);

    // DUT with known S21; its raw transmission rides on the tracking term
    // and the source-match ripple against the DUT's own reflection.
    let true_s21 = |hz: u64| Complex64::from_polar(0.5, TAU * hz as f64 / 1.5e9);
    let dut_s11_samples: Vec<Complex64> = points
        .iter()
        .map(|p| measure(&true_errors(p.hz), dut_gamma(p.hz)))
        .collect();
    let dut_s21_samples: Vec<Complex64> = points
        .iter()
        .map(|p| {
            let errors = true_errors(p.hz);
            let ripple = Complex64::new(1.0, 0.0) - errors.e11 * dut_gamma(p.hz);
            tracking(p.hz) * true_s21(p.hz) / ripple
        })
        .collect();

    let dut_s11 = Sweep::new(
        SweepTag::Uncalibrated,
        SParameter::S11,
        points.clone(),
        dut_s11_samples,
    )
    .unwrap()
    .retagged(SweepTag::Dut);
    let dut_s21 = Sweep::new(
        SweepTag::Uncalibrated,
        SParameter::S21,
        points.clone(),
        dut_s21_samples,
    )
    .unwrap()
    .retagged(SweepTag::Dut);

    let model = build_error_model(&kit, &short, &open, &load, Some(&thru)).unwrap();
    assert!(model.is_two_port());

    let calibrated = apply(&model, &dut_s11, Some(&dut_s21)).unwrap();
    let corrected = calibrated.s21().unwrap();

    for (point, &value) in points.iter().zip(corrected) {
        let truth = true_s21(point.hz);
        let diff = (value - truth).norm();
        assert!(diff < 1e-9, "index {}: error {diff}", point.index);
    }
}

#[test]
fn session_invalidates_model_when_standard_remeasured() {
    let kit = CalKit::default();
    let points = axis(5);
    let mut session = CalibrationSession::new(kit);

    session
        .set_standard(standard_sweep(SweepTag::Short, &points, kit.short))
        .unwrap();
    session
        .set_standard(standard_sweep(SweepTag::Open, &points, kit.open))
        .unwrap();
    assert!(!session.is_complete());

    session
        .set_standard(standard_sweep(SweepTag::Load, &points, kit.load))
        .unwrap();
    assert!(session.is_complete());

    session.build().unwrap();
    assert!(session.model().is_some());

    // Re-measuring a standard discards the model.
    session
        .set_standard(standard_sweep(SweepTag::Short, &points, kit.short))
        .unwrap();
    assert!(session.model().is_none());

    // A DUT sweep is not a standard.
    let err = session.set_standard(standard_sweep(SweepTag::Dut, &points, kit.load));
    assert!(matches!(err, Err(VnaError::InvalidStandard(_))));
}

#[test]
fn s21_correction_without_thru_terms_is_rejected() {
    let kit = CalKit::default();
    let points = axis(3);
    let short = standard_sweep(SweepTag::Short, &points, kit.short);
    let open = standard_sweep(SweepTag::Open, &points, kit.open);
    let load = standard_sweep(SweepTag::Load, &points, kit.load);
    let model = build_error_model(&kit, &short, &open, &load, None).unwrap();

    let dut_s11 = standard_sweep(SweepTag::Dut, &points, Complex64::new(0.1, 0.0));
    let dut_s21 = Sweep::new(
        SweepTag::Uncalibrated,
        SParameter::S21,
        points.clone(),
        vec![Complex64::new(0.5, 0.0); 3],
    )
    .unwrap()
    .retagged(SweepTag::Dut);

    let err = apply(&model, &dut_s11, Some(&dut_s21)).unwrap_err();
    assert!(matches!(err, VnaError::InvalidStandard(_)));
}
