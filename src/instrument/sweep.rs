//! Sweep controller: orchestrates one frequency sweep over an instrument.
//!
//! The controller validates the plan, programs the instrument, fetches the
//! frequency axis and the measurement data, and retries transient I/O
//! failures a bounded number of times. A partial sweep is never returned as
//! if complete: any point that cannot be acquired fails the whole sweep with
//! the failing index named.

use log::{debug, warn};
use num_complex::Complex64;

use super::{CancelSignal, FetchMode, Instrument};
use crate::error::{VnaError, VnaResult};
use crate::measurement::{SParameter, Sweep, SweepTag};
use crate::protocol::{validate_axis, SweepPlan};

/// Attempts per point (or per block) before the sweep is failed.
pub const MAX_POINT_ATTEMPTS: u32 = 3;

fn check_cancel(cancel: Option<&CancelSignal>) -> VnaResult<()> {
    match cancel {
        Some(signal) if signal.is_cancelled() => Err(VnaError::Cancelled),
        _ => Ok(()),
    }
}

/// Run one sweep: `plan.points` samples of `port` across the plan's span.
///
/// The returned sweep is tagged [`SweepTag::Uncalibrated`]; the caller
/// assigns the standard tag when the sweep is used for calibration.
/// Cancellation is honored between protocol exchanges, never mid-point.
pub async fn run_sweep(
    instrument: &mut dyn Instrument,
    plan: &SweepPlan,
    port: SParameter,
    cancel: Option<&CancelSignal>,
) -> VnaResult<Sweep> {
    instrument.limits().validate(plan)?;
    check_cancel(cancel)?;

    instrument.set_sweep(plan).await?;
    check_cancel(cancel)?;

    // Frequency axis, retried like any other exchange.
    let points = {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match instrument.read_frequencies().await {
                Ok(points) => break points,
                Err(e) if e.is_transient() && attempt < MAX_POINT_ATTEMPTS => {
                    warn!(
                        "[{}] frequency axis read failed (attempt {attempt}): {e}",
                        instrument.id()
                    );
                }
                Err(e) => return Err(e),
            }
        }
    };
    validate_axis(&points, plan)?;
    check_cancel(cancel)?;

    let samples = match instrument.fetch_mode() {
        FetchMode::Block => fetch_block(instrument, plan, port, cancel).await?,
        FetchMode::PerPoint => fetch_per_point(instrument, plan, port, cancel).await?,
    };

    debug!(
        "[{}] sweep complete: {} points, {}..{} Hz",
        instrument.id(),
        plan.points,
        plan.start_hz,
        plan.stop_hz
    );
    Sweep::new(SweepTag::Uncalibrated, port, points, samples)
}

async fn fetch_block(
    instrument: &mut dyn Instrument,
    plan: &SweepPlan,
    port: SParameter,
    cancel: Option<&CancelSignal>,
) -> VnaResult<Vec<Complex64>> {
    let mut attempt = 0;
    loop {
        check_cancel(cancel)?;
        attempt += 1;
        match instrument.read_raw_data(port).await {
            Ok(samples) => {
                if samples.len() != plan.points {
                    return Err(VnaError::SweepFailed {
                        index: samples.len().min(plan.points),
                        attempts: attempt,
                        source: Box::new(VnaError::Instrument(format!(
                            "decoder returned {} samples for a {}-point sweep",
                            samples.len(),
                            plan.points
                        ))),
                    });
                }
                return Ok(samples);
            }
            Err(e) if e.is_transient() && attempt < MAX_POINT_ATTEMPTS => {
                warn!(
                    "[{}] {port} block fetch failed (attempt {attempt}): {e}",
                    instrument.id()
                );
            }
            Err(e) => {
                let index = e.point_index().unwrap_or(0);
                return Err(VnaError::SweepFailed {
                    index,
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
        }
    }
}

async fn fetch_per_point(
    instrument: &mut dyn Instrument,
    plan: &SweepPlan,
    port: SParameter,
    cancel: Option<&CancelSignal>,
) -> VnaResult<Vec<Complex64>> {
    let mut samples = Vec::with_capacity(plan.points);

    for index in 0..plan.points {
        check_cancel(cancel)?;

        let mut attempt = 0;
        let sample = loop {
            attempt += 1;
            match instrument.read_point(port, index).await {
                Ok(sample) => break sample,
                Err(e) if e.is_transient() && attempt < MAX_POINT_ATTEMPTS => {
                    warn!(
                        "[{}] point {index} failed (attempt {attempt}): {e}",
                        instrument.id()
                    );
                }
                Err(e) => {
                    return Err(VnaError::SweepFailed {
                        index,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        };
        samples.push(sample);
    }

    Ok(samples)
}
