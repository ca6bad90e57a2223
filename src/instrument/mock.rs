//! Scripted instrument for tests and offline demos.
//!
//! `MockVna` implements the full [`Instrument`] capability set without any
//! transport underneath: measurements come from a configurable response
//! function, optionally with injected noise and per-point transient
//! failures. It reports [`FetchMode::PerPoint`], which makes it the natural
//! test double for the controller's retry and cancellation paths.

use async_trait::async_trait;
use num_complex::Complex64;
use rand::Rng;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::time::Duration;

use super::{FetchMode, FirmwareVersion, Instrument, SweepLimits};
use crate::error::{VnaError, VnaResult};
use crate::measurement::{FrequencyPoint, SParameter};
use crate::protocol::SweepPlan;

type ResponseFn = dyn Fn(SParameter, u64) -> Complex64 + Send + Sync;

/// A scripted VNA with no hardware behind it.
pub struct MockVna {
    id: String,
    version: FirmwareVersion,
    limits: SweepLimits,
    plan: Option<SweepPlan>,
    response: Box<ResponseFn>,
    /// Remaining injected timeouts, per point index.
    failures: HashMap<usize, u32>,
    noise: Option<f64>,
    closed: bool,
}

impl MockVna {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: FirmwareVersion::parse("1.0.0"),
            limits: SweepLimits {
                min_hz: 50_000,
                max_hz: 900_000_000,
                max_points: 101,
            },
            plan: None,
            response: Box::new(default_response),
            failures: HashMap::new(),
            noise: None,
            closed: false,
        }
    }

    pub fn with_limits(mut self, limits: SweepLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Replace the response function mapping (port, frequency) to a raw
    /// measurement.
    pub fn with_response(
        mut self,
        response: impl Fn(SParameter, u64) -> Complex64 + Send + Sync + 'static,
    ) -> Self {
        self.response = Box::new(response);
        self
    }

    /// Make the next `times` fetches of point `index` time out.
    pub fn fail_point(mut self, index: usize, times: u32) -> Self {
        self.failures.insert(index, times);
        self
    }

    /// Add uniform measurement noise of the given amplitude.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = Some(amplitude);
        self
    }

    /// Whether [`Instrument::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn sample(&self, port: SParameter, hz: u64) -> Complex64 {
        let mut value = (self.response)(port, hz);
        if let Some(amplitude) = self.noise {
            let mut rng = rand::thread_rng();
            value += Complex64::new(
                rng.gen_range(-amplitude..amplitude),
                rng.gen_range(-amplitude..amplitude),
            );
        }
        value
    }

    fn plan_or_err(&self) -> VnaResult<SweepPlan> {
        self.plan
            .ok_or_else(|| VnaError::Instrument("no sweep configured".to_string()))
    }
}

/// A plausible one-port device: partial reflection with a phase that winds
/// with frequency.
fn default_response(port: SParameter, hz: u64) -> Complex64 {
    let phase = -TAU * hz as f64 / 1.0e9;
    match port {
        SParameter::S11 => Complex64::from_polar(0.4, phase),
        SParameter::S21 => Complex64::from_polar(0.9, phase / 2.0),
    }
}

#[async_trait]
impl Instrument for MockVna {
    fn id(&self) -> &str {
        &self.id
    }

    fn firmware_version(&self) -> &FirmwareVersion {
        &self.version
    }

    fn limits(&self) -> &SweepLimits {
        &self.limits
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::PerPoint
    }

    async fn info(&mut self) -> VnaResult<String> {
        Ok(format!("MockVna {} (scripted instrument)", self.version))
    }

    async fn set_sweep(&mut self, plan: &SweepPlan) -> VnaResult<()> {
        self.plan = Some(*plan);
        Ok(())
    }

    async fn read_frequencies(&mut self) -> VnaResult<Vec<FrequencyPoint>> {
        Ok(self.plan_or_err()?.axis())
    }

    async fn read_raw_data(&mut self, port: SParameter) -> VnaResult<Vec<Complex64>> {
        let plan = self.plan_or_err()?;
        Ok(plan
            .axis()
            .into_iter()
            .map(|point| self.sample(port, point.hz))
            .collect())
    }

    async fn read_point(&mut self, port: SParameter, index: usize) -> VnaResult<Complex64> {
        let plan = self.plan_or_err()?;
        if index >= plan.points {
            return Err(VnaError::Instrument(format!(
                "point {index} outside configured {}-point sweep",
                plan.points
            )));
        }

        if let Some(remaining) = self.failures.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(VnaError::Timeout {
                    waited: Duration::from_millis(10),
                });
            }
        }

        let hz = plan.axis()[index].hz;
        Ok(self.sample(port, hz))
    }

    async fn close(&mut self) -> VnaResult<()> {
        self.closed = true;
        Ok(())
    }
}
