//! The Niantic `.spz` format.
//!
//! A gzip-wrapped little-endian stream: 16-byte header (`NGSP` magic,
//! version 2 or 3), then planar arrays in positions / scales / rotations /
//! alphas / colors / SH order. Positions are 24-bit signed fixed-point,
//! scales are `u8/16 - 10`, colors bias through the SPZ-specific 0.15
//! constant, and rotations are three biased bytes (v2) or a 32-bit
//! smallest-three word (v3).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use splat_core::column::{Column, DataTable};
use splat_core::gaussian::{coeffs_per_channel, require_gaussian, rest_column_count, sh_bands};
use splat_core::math::{inv_sigmoid, normalize_or_identity, sigmoid, smallest_three_decode};

use crate::{Document, IoError, Result};

pub const MAGIC: u32 = 0x5053474e; // "NGSP"
const HEADER_SIZE: usize = 16;
const WRITE_FRACTIONAL_BITS: u8 = 12;

/// SPZ uses its own color normalization, unrelated to the SH DC constant.
const COLOR_SCALE: f64 = 0.15;

struct Header {
    version: u32,
    num_points: usize,
    sh_degree: u8,
    fractional_bits: u8,
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(IoError::MalformedInput(".spz header truncated".into()));
    }
    let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    if u32_at(0) != MAGIC {
        return Err(IoError::UnsupportedFormat("bad .spz magic".into()));
    }
    let version = u32_at(4);
    if version != 2 && version != 3 {
        return Err(IoError::UnsupportedFormat(format!(
            ".spz version {version} (expected 2 or 3)"
        )));
    }
    let sh_degree = bytes[12];
    if sh_degree > 3 {
        return Err(IoError::MalformedInput(format!(
            ".spz SH degree {sh_degree}"
        )));
    }
    Ok(Header {
        version,
        num_points: u32_at(8) as usize,
        sh_degree,
        fractional_bits: bytes[13],
    })
}

pub fn read(raw: &[u8]) -> Result<Document> {
    let bytes = if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut decoder = GzDecoder::new(raw);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| IoError::CodecFailure(format!(".spz gzip stream: {e}")))?;
        out
    } else {
        raw.to_vec()
    };

    let header = parse_header(&bytes)?;
    let n = header.num_points;
    let sh_per_channel = coeffs_per_channel(header.sh_degree as usize);
    let rotation_bytes = if header.version == 2 { 3 } else { 4 };
    let expected = HEADER_SIZE + n * (9 + 3 + rotation_bytes + 1 + 3 + sh_per_channel * 3);
    if bytes.len() < expected {
        return Err(IoError::MalformedInput(format!(
            ".spz payload holds {} bytes, expected {expected}",
            bytes.len()
        )));
    }

    fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> &'a [u8] {
        let slice = &bytes[*offset..*offset + len];
        *offset += len;
        slice
    }
    let mut offset = HEADER_SIZE;

    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(n); 14];

    let scale_factor = 1.0 / (1i64 << header.fractional_bits) as f64;
    for chunk in take(&bytes, &mut offset, n * 9).chunks_exact(9) {
        for axis in 0..3 {
            let b = &chunk[axis * 3..axis * 3 + 3];
            let mut fixed = u32::from_le_bytes([b[0], b[1], b[2], 0]);
            if fixed & 0x0080_0000 != 0 {
                fixed |= 0xff00_0000;
            }
            columns[axis].push((fixed as i32 as f64 * scale_factor) as f32);
        }
    }

    for chunk in take(&bytes, &mut offset, n * 3).chunks_exact(3) {
        for axis in 0..3 {
            columns[3 + axis].push(chunk[axis] as f32 / 16.0 - 10.0);
        }
    }

    if header.version == 2 {
        for chunk in take(&bytes, &mut offset, n * 3).chunks_exact(3) {
            let x = chunk[0] as f64 / 127.5 - 1.0;
            let y = chunk[1] as f64 / 127.5 - 1.0;
            let z = chunk[2] as f64 / 127.5 - 1.0;
            let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
            columns[6].push(w as f32);
            columns[7].push(x as f32);
            columns[8].push(y as f32);
            columns[9].push(z as f32);
        }
    } else {
        for chunk in take(&bytes, &mut offset, n * 4).chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let max_index = (word >> 30) as usize;
            let field = |shift: u32| -> f64 {
                let field = (word >> shift) & 0x3ff;
                let magnitude = (field & 0x1ff) as f64 / 511.0 * std::f64::consts::FRAC_1_SQRT_2;
                if field & 0x200 != 0 {
                    -magnitude
                } else {
                    magnitude
                }
            };
            // Stored components are direct quaternion values; scale them
            // into the sqrt(2) domain the shared decoder expects.
            let rest = [
                field(20) * std::f64::consts::SQRT_2,
                field(10) * std::f64::consts::SQRT_2,
                field(0) * std::f64::consts::SQRT_2,
            ];
            let q = smallest_three_decode(max_index, rest);
            columns[6].push(q.w as f32);
            columns[7].push(q.i as f32);
            columns[8].push(q.j as f32);
            columns[9].push(q.k as f32);
        }
    }

    for &alpha in take(&bytes, &mut offset, n) {
        columns[13].push(inv_sigmoid(alpha as f64 / 255.0) as f32);
    }

    for chunk in take(&bytes, &mut offset, n * 3).chunks_exact(3) {
        for channel in 0..3 {
            columns[10 + channel].push(((chunk[channel] as f64 / 255.0 - 0.5) / COLOR_SCALE) as f32);
        }
    }

    let mut rest_columns: Vec<Vec<f32>> = vec![Vec::with_capacity(n); sh_per_channel * 3];
    if sh_per_channel > 0 {
        for point in take(&bytes, &mut offset, n * sh_per_channel * 3).chunks_exact(sh_per_channel * 3) {
            // File order is coefficient-major (r, g, b per coefficient);
            // table order is channel-major.
            for coeff in 0..sh_per_channel {
                for channel in 0..3 {
                    let byte = point[coeff * 3 + channel];
                    rest_columns[channel * sh_per_channel + coeff]
                        .push(byte as f32 / 128.0 - 1.0);
                }
            }
        }
    }

    let names = [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        "f_dc_0", "f_dc_1", "f_dc_2", "opacity",
    ];
    let mut table_columns: Vec<Column> = names
        .iter()
        .zip(columns)
        .map(|(name, data)| Column::f32(*name, data))
        .collect();
    for (i, data) in rest_columns.into_iter().enumerate() {
        table_columns.push(Column::f32(format!("f_rest_{i}"), data));
    }
    let table = DataTable::new(table_columns).map_err(IoError::Core)?;
    Ok(Document::new(table))
}

fn quantize_sh(x: f64, bucket: i32) -> u8 {
    let q = (x * 128.0).round() as i32 + 128;
    let q = (q + bucket / 2) / bucket * bucket;
    q.clamp(0, 255) as u8
}

/// Write a version-2 stream (three-byte rotations), gzip-wrapped.
pub fn write<W: Write>(writer: &mut W, table: &DataTable) -> Result<()> {
    require_gaussian(table).map_err(IoError::Core)?;
    let bands = sh_bands(table).map_err(IoError::Core)?;
    let sh_per_channel = coeffs_per_channel(bands);
    let n = table.num_rows();

    let mut encoder = GzEncoder::new(writer, Compression::default());
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&2u32.to_le_bytes());
    header[8..12].copy_from_slice(&(n as u32).to_le_bytes());
    header[12] = bands as u8;
    header[13] = WRITE_FRACTIONAL_BITS;
    encoder.write_all(&header)?;

    let value = |name: &str, i: usize| table.column(name).map(|c| c.get(i)).unwrap_or(0.0);
    let clamp_byte = |v: f64| v.round().clamp(0.0, 255.0) as u8;

    let scale_factor = (1i64 << WRITE_FRACTIONAL_BITS) as f64;
    for i in 0..n {
        for name in ["x", "y", "z"] {
            let fixed = (value(name, i) * scale_factor).round() as i32;
            let b = fixed.to_le_bytes();
            encoder.write_all(&b[0..3])?;
        }
    }
    for i in 0..n {
        for axis in 0..3 {
            encoder.write_all(&[clamp_byte((value(&format!("scale_{axis}"), i) + 10.0) * 16.0)])?;
        }
    }
    for i in 0..n {
        let q = normalize_or_identity(
            value("rot_0", i),
            value("rot_1", i),
            value("rot_2", i),
            value("rot_3", i),
        );
        // A negative w flips sign so the reconstructed w stays positive.
        let sign = if q.w < 0.0 { -1.0 } else { 1.0 };
        for component in [q.i, q.j, q.k] {
            encoder.write_all(&[clamp_byte((sign * component + 1.0) * 127.5)])?;
        }
    }
    for i in 0..n {
        encoder.write_all(&[clamp_byte(sigmoid(value("opacity", i)) * 255.0)])?;
    }
    for i in 0..n {
        for channel in 0..3 {
            let c = value(&format!("f_dc_{channel}"), i);
            encoder.write_all(&[clamp_byte(c * COLOR_SCALE * 255.0 + 127.5)])?;
        }
    }
    if sh_per_channel > 0 {
        if rest_column_count(table) != sh_per_channel * 3 {
            return Err(IoError::MalformedInput("discontiguous f_rest columns".into()));
        }
        for i in 0..n {
            for coeff in 0..sh_per_channel {
                // Degree-1 coefficients quantize on a coarser bucket.
                let bucket = if coeff < 3 { 8 } else { 16 };
                for channel in 0..3 {
                    let v = value(&format!("f_rest_{}", channel * sh_per_channel + coeff), i);
                    encoder.write_all(&[quantize_sh(v, bucket)])?;
                }
            }
        }
    }

    encoder
        .finish()
        .map_err(|e| IoError::CodecFailure(format!(".spz gzip stream: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_core::gaussian::REQUIRED_COLUMNS;

    fn sample_table(n: usize, bands: usize) -> DataTable {
        let mut columns: Vec<Column> = REQUIRED_COLUMNS
            .iter()
            .map(|name| {
                let data: Vec<f32> = (0..n)
                    .map(|i| match *name {
                        "x" => i as f32 * 0.25 - 1.0,
                        "y" => i as f32 * -0.5,
                        "z" => 0.125 * (i % 3) as f32,
                        "scale_0" | "scale_1" | "scale_2" => -3.0 + (i % 4) as f32 * 0.25,
                        "rot_0" => 1.0,
                        "rot_1" => 0.2,
                        "opacity" => i as f32 * 0.4 - 1.0,
                        "f_dc_0" | "f_dc_1" | "f_dc_2" => (i % 5) as f32 * 0.3 - 0.6,
                        _ => 0.0,
                    })
                    .collect();
                Column::f32(*name, data)
            })
            .collect();
        let per = coeffs_per_channel(bands);
        for i in 0..per * 3 {
            columns.push(Column::f32(
                format!("f_rest_{i}"),
                (0..n).map(|r| ((r + i) % 7) as f32 * 0.1 - 0.3).collect(),
            ));
        }
        DataTable::new(columns).unwrap()
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        assert!(matches!(
            read(&bytes).unwrap_err(),
            IoError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert!(read(&bytes).is_err());
    }

    #[test]
    fn rejects_short_payload() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            read(&bytes).unwrap_err(),
            IoError::MalformedInput(_)
        ));
    }

    #[test]
    fn gzip_round_trip_with_sh() {
        let table = sample_table(6, 1);
        let mut bytes = Vec::new();
        write(&mut bytes, &table).unwrap();
        // Output is gzip-wrapped.
        assert_eq!(&bytes[0..2], &[0x1f, 0x8b]);

        let doc = read(&bytes).unwrap();
        assert_eq!(doc.table.num_rows(), 6);
        assert_eq!(rest_column_count(&doc.table), 9);

        for i in 0..6 {
            for name in ["x", "y", "z"] {
                let got = doc.table.column(name).unwrap().get(i);
                let want = table.column(name).unwrap().get(i);
                assert!((got - want).abs() < 1.0 / 4096.0 + 1e-6, "{name}");
            }
            for name in ["scale_0", "scale_1", "scale_2"] {
                let got = doc.table.column(name).unwrap().get(i);
                let want = table.column(name).unwrap().get(i);
                assert!((got - want).abs() <= 1.0 / 16.0 + 1e-6, "{name}");
            }
            for name in ["f_dc_0", "f_dc_1", "f_dc_2"] {
                let got = doc.table.column(name).unwrap().get(i);
                let want = table.column(name).unwrap().get(i);
                assert!((got - want).abs() <= 0.5 / (255.0 * 0.15) + 1e-6, "{name}");
            }
            for c in 0..9 {
                let name = format!("f_rest_{c}");
                let got = doc.table.column(&name).unwrap().get(i);
                let want = table.column(&name).unwrap().get(i);
                assert!((got - want).abs() <= 8.0 / 128.0 + 1e-6, "{name}");
            }
            let q_got = normalize_or_identity(
                doc.table.column("rot_0").unwrap().get(i),
                doc.table.column("rot_1").unwrap().get(i),
                doc.table.column("rot_2").unwrap().get(i),
                doc.table.column("rot_3").unwrap().get(i),
            );
            let q_want = normalize_or_identity(
                table.column("rot_0").unwrap().get(i),
                table.column("rot_1").unwrap().get(i),
                table.column("rot_2").unwrap().get(i),
                table.column("rot_3").unwrap().get(i),
            );
            let dot = (q_got.w * q_want.w
                + q_got.i * q_want.i
                + q_got.j * q_want.j
                + q_got.k * q_want.k)
                .abs();
            assert!(dot > 1.0 - 1e-3);
        }
    }

    #[test]
    fn version3_smallest_three_rotations_decode() {
        // One point, no SH, uncompressed stream built by hand.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 12, 0, 0]);
        bytes.extend_from_slice(&[0u8; 9]); // position
        bytes.extend_from_slice(&[160u8; 3]); // scales
        // Rotation: max component w (index 0), rest zero -> identity.
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(128); // alpha
        bytes.extend_from_slice(&[128u8; 3]); // colors

        let doc = read(&bytes).unwrap();
        assert!((doc.table.column("rot_0").unwrap().get(0) - 1.0).abs() < 1e-6);
        for name in ["rot_1", "rot_2", "rot_3"] {
            assert!(doc.table.column(name).unwrap().get(0).abs() < 1e-6);
        }
    }
}
