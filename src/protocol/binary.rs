//! Decoder for the extended firmware's fixed-stride binary data blocks.
//!
//! The record layout differs across firmware revisions, so it is data, not
//! code: a [`BinaryLayout`] names the field width, whether a record carries
//! its point index, the checksum scheme, and the ADC full-scale divisor used
//! to convert raw integers to reflection-coefficient units. Layouts are
//! serde-deserializable so a firmware revision can be described in a TOML
//! profile instead of a rebuild.
//!
//! A record is, in order: optional `u16` little-endian point index, two
//! signed little-endian fields (real, imaginary), optional trailing checksum
//! byte (sum of the record's preceding bytes, modulo 256).

use bytes::Buf;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Width of the real/imaginary fields in one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldWidth {
    I16,
    I32,
}

impl FieldWidth {
    fn bytes(self) -> usize {
        match self {
            FieldWidth::I16 => 2,
            FieldWidth::I32 => 4,
        }
    }

    /// Default ADC full-scale divisor for this width.
    fn default_full_scale(self) -> f64 {
        match self {
            FieldWidth::I16 => 32_768.0,
            FieldWidth::I32 => 8_388_608.0,
        }
    }
}

/// Per-record checksum scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    None,
    SumModulo256,
}

/// Binary record layout for one firmware revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinaryLayout {
    pub field_width: FieldWidth,
    #[serde(default = "default_index_field")]
    pub index_field: bool,
    #[serde(default = "default_checksum")]
    pub checksum: ChecksumMode,
    /// Raw integers divide by this to become reflection-coefficient units.
    #[serde(default)]
    pub full_scale: Option<f64>,
}

fn default_index_field() -> bool {
    true
}

fn default_checksum() -> ChecksumMode {
    ChecksumMode::SumModulo256
}

impl Default for BinaryLayout {
    fn default() -> Self {
        Self {
            field_width: FieldWidth::I32,
            index_field: true,
            checksum: ChecksumMode::SumModulo256,
            full_scale: None,
        }
    }
}

impl BinaryLayout {
    /// Bytes per record.
    pub fn record_stride(&self) -> usize {
        let mut stride = 2 * self.field_width.bytes();
        if self.index_field {
            stride += 2;
        }
        if self.checksum == ChecksumMode::SumModulo256 {
            stride += 1;
        }
        stride
    }

    /// Bytes in a full data block of `points` records.
    pub fn block_len(&self, points: usize) -> usize {
        self.record_stride() * points
    }

    fn full_scale(&self) -> f64 {
        self.full_scale
            .unwrap_or_else(|| self.field_width.default_full_scale())
    }
}

/// Decode a data block into one complex sample per frequency point.
///
/// Validates total length (early termination reports how many whole records
/// arrived), per-record checksums, and index uniqueness/range when the layout
/// carries indices. Records may arrive out of order when indexed; the result
/// is always in axis order.
pub fn decode_block(
    layout: &BinaryLayout,
    raw: &[u8],
    points: usize,
) -> Result<Vec<Complex64>, ProtocolError> {
    let stride = layout.record_stride();
    let needed = layout.block_len(points);

    if raw.len() < needed {
        return Err(ProtocolError::Incomplete {
            expected: points,
            received: raw.len() / stride,
        });
    }
    if raw.len() > needed {
        return Err(ProtocolError::RecordCount {
            expected: points,
            actual: raw.len() / stride,
        });
    }

    let full_scale = layout.full_scale();
    let mut samples = vec![None::<Complex64>; points];

    for position in 0..points {
        let record = &raw[position * stride..(position + 1) * stride];

        if layout.checksum == ChecksumMode::SumModulo256 {
            let expected = record[..stride - 1]
                .iter()
                .fold(0u8, |sum, &b| sum.wrapping_add(b));
            let actual = record[stride - 1];
            if expected != actual {
                return Err(ProtocolError::Checksum {
                    index: position,
                    expected,
                    actual,
                });
            }
        }

        let mut cursor = &record[..stride - checksum_bytes(layout)];
        let index = if layout.index_field {
            cursor.get_u16_le() as usize
        } else {
            position
        };
        if index >= points {
            return Err(ProtocolError::Malformed(format!(
                "record {position} carries out-of-range index {index}"
            )));
        }

        let (re, im) = match layout.field_width {
            FieldWidth::I16 => (f64::from(cursor.get_i16_le()), f64::from(cursor.get_i16_le())),
            FieldWidth::I32 => (f64::from(cursor.get_i32_le()), f64::from(cursor.get_i32_le())),
        };

        if samples[index].is_some() {
            return Err(ProtocolError::DuplicateIndex(index));
        }
        samples[index] = Some(Complex64::new(re / full_scale, im / full_scale));
    }

    // Every slot filled: count and duplicate checks above guarantee it.
    Ok(samples.into_iter().flatten().collect())
}

/// Encode samples into a data block — the inverse of [`decode_block`], used
/// by scripted-firmware tests to build responses.
pub fn encode_block(layout: &BinaryLayout, samples: &[Complex64]) -> Vec<u8> {
    let full_scale = layout.full_scale();
    let mut out = Vec::with_capacity(layout.block_len(samples.len()));

    for (index, sample) in samples.iter().enumerate() {
        let record_start = out.len();
        if layout.index_field {
            out.extend_from_slice(&(index as u16).to_le_bytes());
        }
        match layout.field_width {
            FieldWidth::I16 => {
                out.extend_from_slice(&((sample.re * full_scale) as i16).to_le_bytes());
                out.extend_from_slice(&((sample.im * full_scale) as i16).to_le_bytes());
            }
            FieldWidth::I32 => {
                out.extend_from_slice(&((sample.re * full_scale) as i32).to_le_bytes());
                out.extend_from_slice(&((sample.im * full_scale) as i32).to_le_bytes());
            }
        }
        if layout.checksum == ChecksumMode::SumModulo256 {
            let sum = out[record_start..]
                .iter()
                .fold(0u8, |sum, &b| sum.wrapping_add(b));
            out.push(sum);
        }
    }
    out
}

fn checksum_bytes(layout: &BinaryLayout) -> usize {
    match layout.checksum {
        ChecksumMode::None => 0,
        ChecksumMode::SumModulo256 => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Complex64> {
        vec![
            Complex64::new(0.25, -0.5),
            Complex64::new(-0.125, 0.0625),
            Complex64::new(0.0, 0.75),
        ]
    }

    #[test]
    fn test_stride_per_layout() {
        let default = BinaryLayout::default();
        // index(2) + 2*i32(8) + checksum(1)
        assert_eq!(default.record_stride(), 11);

        let slim = BinaryLayout {
            field_width: FieldWidth::I16,
            index_field: false,
            checksum: ChecksumMode::None,
            full_scale: None,
        };
        assert_eq!(slim.record_stride(), 4);
    }

    #[test]
    fn test_round_trip_default_layout() {
        let layout = BinaryLayout::default();
        let block = encode_block(&layout, &samples());
        let decoded = decode_block(&layout, &block, 3).unwrap();
        for (a, b) in decoded.iter().zip(samples()) {
            assert!((a.re - b.re).abs() < 1e-6);
            assert!((a.im - b.im).abs() < 1e-6);
        }
    }

    #[test]
    fn test_round_trip_i16_no_index_no_checksum() {
        let layout = BinaryLayout {
            field_width: FieldWidth::I16,
            index_field: false,
            checksum: ChecksumMode::None,
            full_scale: None,
        };
        let block = encode_block(&layout, &samples());
        let decoded = decode_block(&layout, &block, 3).unwrap();
        for (a, b) in decoded.iter().zip(samples()) {
            assert!((a.re - b.re).abs() < 1e-3);
            assert!((a.im - b.im).abs() < 1e-3);
        }
    }

    #[test]
    fn test_corrupted_checksum_names_record() {
        let layout = BinaryLayout::default();
        let mut block = encode_block(&layout, &samples());
        // Flip a data byte inside the second record.
        let stride = layout.record_stride();
        block[stride + 3] ^= 0xFF;

        let err = decode_block(&layout, &block, 3).unwrap_err();
        match err {
            ProtocolError::Checksum { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_block_is_incomplete() {
        let layout = BinaryLayout::default();
        let block = encode_block(&layout, &samples());
        let err = decode_block(&layout, &block[..block.len() - 5], 3).unwrap_err();
        match err {
            ProtocolError::Incomplete { expected, received } => {
                assert_eq!(expected, 3);
                assert_eq!(received, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_index_detected() {
        let layout = BinaryLayout::default();
        let mut block = encode_block(&layout, &samples());
        let stride = layout.record_stride();
        // Rewrite record 2's index to 0 and fix its checksum.
        block[2 * stride] = 0;
        block[2 * stride + 1] = 0;
        let sum = block[2 * stride..3 * stride - 1]
            .iter()
            .fold(0u8, |s, &b| s.wrapping_add(b));
        block[3 * stride - 1] = sum;

        let err = decode_block(&layout, &block, 3).unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateIndex(0)));
    }

    #[test]
    fn test_out_of_order_records_accepted() {
        let layout = BinaryLayout::default();
        let data = samples();
        let block = encode_block(&layout, &data);
        let stride = layout.record_stride();

        // Swap records 0 and 2 wholesale; indices travel with them.
        let mut shuffled = Vec::with_capacity(block.len());
        shuffled.extend_from_slice(&block[2 * stride..3 * stride]);
        shuffled.extend_from_slice(&block[stride..2 * stride]);
        shuffled.extend_from_slice(&block[..stride]);

        let decoded = decode_block(&layout, &shuffled, 3).unwrap();
        assert!((decoded[0].re - data[0].re).abs() < 1e-6);
        assert!((decoded[2].im - data[2].im).abs() < 1e-6);
    }

    #[test]
    fn test_layout_deserializes_from_toml() {
        let layout: BinaryLayout = toml::from_str(
            r#"
            field_width = "i16"
            index_field = false
            checksum = "none"
            full_scale = 16384.0
            "#,
        )
        .unwrap();
        assert_eq!(layout.field_width, FieldWidth::I16);
        assert!(!layout.index_field);
        assert_eq!(layout.checksum, ChecksumMode::None);
        assert_eq!(layout.full_scale, Some(16384.0));
    }
}
