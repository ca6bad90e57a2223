//! Decoder for the legacy line-oriented ASCII firmware.
//!
//! Responses are the echoed command, a payload of one line per frequency
//! point, then the `ch> ` prompt. `frequencies` lines carry one integer Hz
//! value; `data` lines carry a real/imaginary pair already scaled to
//! reflection-coefficient units by the firmware.

use num_complex::Complex64;
use prse::try_parse;

use crate::error::ProtocolError;
use crate::measurement::FrequencyPoint;
use crate::protocol::{COMMAND_TERMINATOR, PROMPT};

/// Frame a command verb for the wire.
pub fn encode_command(verb: &str) -> Vec<u8> {
    format!("{verb}{COMMAND_TERMINATOR}").into_bytes()
}

/// Split a raw response payload into trimmed non-empty lines, dropping any
/// prompt fragment the read picked up.
pub fn payload_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && line != PROMPT.trim())
        .collect()
}

/// Strip the echoed command from the head of a response, if present.
pub fn strip_echo<'a>(lines: &'a [String], command: &str) -> &'a [String] {
    match lines.first() {
        Some(first) if first == command.trim_end() => &lines[1..],
        _ => lines,
    }
}

/// Parse the payload of a `version` reply, e.g. `version 1.2.3`.
pub fn parse_version_payload(line: &str) -> Result<String, ProtocolError> {
    let line = line.trim();
    let version: String = try_parse!(line, "version {}")
        .map_err(|_| ProtocolError::Malformed(format!("unrecognized version reply: '{line}'")))?;
    Ok(version)
}

/// Decode a `frequencies` response: one integer Hz per line.
pub fn decode_frequencies(
    lines: &[String],
    expected: usize,
) -> Result<Vec<FrequencyPoint>, ProtocolError> {
    if lines.len() < expected {
        return Err(ProtocolError::Incomplete {
            expected,
            received: lines.len(),
        });
    }
    if lines.len() > expected {
        return Err(ProtocolError::RecordCount {
            expected,
            actual: lines.len(),
        });
    }

    let mut points = Vec::with_capacity(expected);
    for (index, line) in lines.iter().enumerate() {
        let hz: u64 = try_parse!(line.trim(), "{}").map_err(|_| {
            ProtocolError::Malformed(format!("frequency line {index}: '{line}'"))
        })?;
        points.push(FrequencyPoint { index, hz });
    }
    Ok(points)
}

/// Decode a `data` response: one `re im` pair per line.
pub fn decode_data(lines: &[String], expected: usize) -> Result<Vec<Complex64>, ProtocolError> {
    if lines.len() < expected {
        return Err(ProtocolError::Incomplete {
            expected,
            received: lines.len(),
        });
    }
    if lines.len() > expected {
        return Err(ProtocolError::RecordCount {
            expected,
            actual: lines.len(),
        });
    }

    let mut samples = Vec::with_capacity(expected);
    for (index, line) in lines.iter().enumerate() {
        let (re, im): (f64, f64) = try_parse!(line.trim(), "{} {}").map_err(|_| {
            ProtocolError::Malformed(format!("data line {index}: '{line}'"))
        })?;
        if !re.is_finite() || !im.is_finite() {
            return Err(ProtocolError::Malformed(format!(
                "non-finite sample at line {index}: '{line}'"
            )));
        }
        samples.push(Complex64::new(re, im));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_payload_lines_drops_prompt() {
        let raw = b"data 0\r\n0.1 -0.2\r\n0.3 0.4\r\nch> ";
        let parsed = payload_lines(raw);
        assert_eq!(parsed, lines(&["data 0", "0.1 -0.2", "0.3 0.4"]));
    }

    #[test]
    fn test_strip_echo() {
        let all = lines(&["data 0", "0.1 -0.2"]);
        assert_eq!(strip_echo(&all, "data 0"), &lines(&["0.1 -0.2"])[..]);
        // No echo present: nothing stripped.
        assert_eq!(strip_echo(&all[1..], "data 0").len(), 1);
    }

    #[test]
    fn test_parse_version_payload() {
        assert_eq!(
            parse_version_payload("version 1.2.3").unwrap(),
            "1.2.3".to_string()
        );
        assert!(parse_version_payload("bogus").is_err());
    }

    #[test]
    fn test_decode_frequencies() {
        let parsed = decode_frequencies(&lines(&["1000000", "2000000"]), 2).unwrap();
        assert_eq!(parsed[0], FrequencyPoint { index: 0, hz: 1_000_000 });
        assert_eq!(parsed[1], FrequencyPoint { index: 1, hz: 2_000_000 });
    }

    #[test]
    fn test_decode_data_short_response_is_incomplete() {
        let err = decode_data(&lines(&["0.1 0.2"]), 3).unwrap_err();
        match err {
            ProtocolError::Incomplete { expected, received } => {
                assert_eq!(expected, 3);
                assert_eq!(received, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_data_malformed_line() {
        let err = decode_data(&lines(&["0.1 0.2", "zero point one"]), 2).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_data_values() {
        let parsed = decode_data(&lines(&["0.5 -0.25", "-1.0 0.0"]), 2).unwrap();
        assert_eq!(parsed[0], Complex64::new(0.5, -0.25));
        assert_eq!(parsed[1], Complex64::new(-1.0, 0.0));
    }
}
