//! Touchstone (`.sNp`) serialization.
//!
//! One header comment block, one option line declaring frequency unit,
//! parameter type, value format and reference impedance, then one data line
//! per frequency point in ascending order. A one-port result produces `.s1p`
//! lines (S11 only); a two-port result produces `.s2p` lines with S12
//! mirrored from S21 and S22 zero, matching what a 1.5-port instrument can
//! actually measure.
//!
//! A minimal standards-compliant reader is included so saved sweeps can be
//! loaded back and round-trips can be verified.

use chrono::Utc;
use num_complex::Complex64;
use std::path::Path;

use crate::error::{ProtocolError, VnaError, VnaResult};
use crate::measurement::CalibratedSweep;

/// Value format of the data columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchstoneFormat {
    /// Real and imaginary parts.
    Ri,
    /// Linear magnitude and angle in degrees.
    MagnitudeAngle,
    /// Magnitude in dB and angle in degrees.
    DbAngle,
}

impl TouchstoneFormat {
    fn token(self) -> &'static str {
        match self {
            TouchstoneFormat::Ri => "RI",
            TouchstoneFormat::MagnitudeAngle => "MA",
            TouchstoneFormat::DbAngle => "DB",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "RI" => Some(TouchstoneFormat::Ri),
            "MA" => Some(TouchstoneFormat::MagnitudeAngle),
            "DB" => Some(TouchstoneFormat::DbAngle),
            _ => None,
        }
    }

    fn pair(self, value: Complex64) -> (f64, f64) {
        match self {
            TouchstoneFormat::Ri => (value.re, value.im),
            TouchstoneFormat::MagnitudeAngle => (value.norm(), value.arg().to_degrees()),
            TouchstoneFormat::DbAngle => {
                (20.0 * value.norm().log10(), value.arg().to_degrees())
            }
        }
    }

    fn value(self, first: f64, second: f64) -> Complex64 {
        match self {
            TouchstoneFormat::Ri => Complex64::new(first, second),
            TouchstoneFormat::MagnitudeAngle => {
                Complex64::from_polar(first, second.to_radians())
            }
            TouchstoneFormat::DbAngle => {
                Complex64::from_polar(10f64.powf(first / 20.0), second.to_radians())
            }
        }
    }
}

/// Frequency unit of the first data column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrequencyUnit {
    Hz,
    Khz,
    Mhz,
    Ghz,
}

impl FrequencyUnit {
    fn token(self) -> &'static str {
        match self {
            FrequencyUnit::Hz => "Hz",
            FrequencyUnit::Khz => "kHz",
            FrequencyUnit::Mhz => "MHz",
            FrequencyUnit::Ghz => "GHz",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "HZ" => Some(FrequencyUnit::Hz),
            "KHZ" => Some(FrequencyUnit::Khz),
            "MHZ" => Some(FrequencyUnit::Mhz),
            "GHZ" => Some(FrequencyUnit::Ghz),
            _ => None,
        }
    }

    fn scale(self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::Khz => 1e3,
            FrequencyUnit::Mhz => 1e6,
            FrequencyUnit::Ghz => 1e9,
        }
    }
}

/// Exporter settings.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub unit: FrequencyUnit,
    pub format: TouchstoneFormat,
    /// Named in the header comment block.
    pub device_name: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            unit: FrequencyUnit::Hz,
            format: TouchstoneFormat::Ri,
            device_name: None,
        }
    }
}

/// Serialize a calibrated sweep to Touchstone text.
pub fn serialize(sweep: &CalibratedSweep, options: &ExportOptions) -> String {
    let mut out = String::new();
    let points = sweep.points();
    let device = options.device_name.as_deref().unwrap_or("Unknown");

    out.push_str("! Touchstone file exported from vna_toolkit\n");
    out.push_str(&format!("! Device: {device}\n"));
    out.push_str(&format!(
        "! Export date: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        out.push_str(&format!(
            "! Frequency range: {:.3} - {:.3} MHz\n",
            first.hz as f64 / 1e6,
            last.hz as f64 / 1e6
        ));
    }
    out.push_str(&format!("! Number of points: {}\n", points.len()));
    out.push_str("!\n");
    out.push_str(&format!(
        "# {} S {} R {}\n",
        options.unit.token(),
        options.format.token(),
        sweep.reference_impedance()
    ));

    let scale = options.unit.scale();
    for (index, point) in points.iter().enumerate() {
        let mut line = format!("{:.9e}", point.hz as f64 / scale);

        let mut push_pair = |line: &mut String, value: Complex64| {
            let (first, second) = options.format.pair(value);
            line.push_str(&format!(" {first:.9e} {second:.9e}"));
        };

        push_pair(&mut line, sweep.s11()[index]);
        if let Some(s21) = sweep.s21() {
            push_pair(&mut line, s21[index]);
            // 1.5-port hardware: S12 mirrored, S22 unmeasured.
            push_pair(&mut line, s21[index]);
            push_pair(&mut line, Complex64::new(0.0, 0.0));
        }

        line.push('\n');
        out.push_str(&line);
    }

    out
}

/// Serialize and write to disk. The conventional extension is `.s1p` for
/// one-port data and `.s2p` for two-port data.
pub fn write_file(
    path: impl AsRef<Path>,
    sweep: &CalibratedSweep,
    options: &ExportOptions,
) -> VnaResult<()> {
    std::fs::write(path, serialize(sweep, options))?;
    Ok(())
}

/// A parsed Touchstone file: the frequency axis plus one row of S-parameter
/// values per point.
#[derive(Clone, Debug)]
pub struct ParsedTouchstone {
    pub unit: FrequencyUnit,
    pub format: TouchstoneFormat,
    pub reference_impedance: f64,
    pub freqs_hz: Vec<f64>,
    /// One entry per point; each holds the S-parameters in file column
    /// order (S11 [, S21, S12, S22]).
    pub records: Vec<Vec<Complex64>>,
}

fn malformed(detail: impl Into<String>) -> VnaError {
    VnaError::Protocol(ProtocolError::Malformed(detail.into()))
}

/// Parse Touchstone text. Comment lines and blank lines are skipped; if no
/// option line is present the standard defaults apply (GHz, MA, 50 Ω).
pub fn parse(text: &str) -> VnaResult<ParsedTouchstone> {
    let mut unit = FrequencyUnit::Ghz;
    let mut format = TouchstoneFormat::MagnitudeAngle;
    let mut reference_impedance = 50.0;
    let mut saw_options = false;

    let mut freqs_hz = Vec::new();
    let mut records: Vec<Vec<Complex64>> = Vec::new();
    let mut pairs_per_record: Option<usize> = None;

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = match raw_line.find('!') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(option_body) = line.strip_prefix('#') {
            if saw_options {
                // Touchstone allows only one option line; ignore repeats.
                continue;
            }
            saw_options = true;
            let mut tokens = option_body.split_whitespace();
            while let Some(token) = tokens.next() {
                if let Some(parsed) = FrequencyUnit::from_token(token) {
                    unit = parsed;
                } else if token.eq_ignore_ascii_case("S") {
                    // Parameter type: only S-parameters are supported.
                } else if let Some(parsed) = TouchstoneFormat::from_token(token) {
                    format = parsed;
                } else if token.eq_ignore_ascii_case("R") {
                    let z0: f64 = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| malformed("option line: missing impedance after R"))?;
                    reference_impedance = z0;
                } else {
                    return Err(malformed(format!(
                        "option line: unrecognized token '{token}'"
                    )));
                }
            }
            continue;
        }

        let fields: Vec<f64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| malformed(format!("line {}: non-numeric field", line_no + 1)))?;

        if fields.len() < 3 || fields.len() % 2 == 0 {
            return Err(malformed(format!(
                "line {}: expected a frequency plus value pairs, got {} fields",
                line_no + 1,
                fields.len()
            )));
        }

        let pairs = (fields.len() - 1) / 2;
        match pairs_per_record {
            None => pairs_per_record = Some(pairs),
            Some(expected) if expected != pairs => {
                return Err(malformed(format!(
                    "line {}: {} value pairs, previous lines had {}",
                    line_no + 1,
                    pairs,
                    expected
                )));
            }
            Some(_) => {}
        }

        freqs_hz.push(fields[0] * unit.scale());
        let record = fields[1..]
            .chunks_exact(2)
            .map(|pair| format.value(pair[0], pair[1]))
            .collect();
        records.push(record);
    }

    if records.is_empty() {
        return Err(malformed("no data lines"));
    }

    Ok(ParsedTouchstone {
        unit,
        format,
        reference_impedance,
        freqs_hz,
        records,
    })
}
