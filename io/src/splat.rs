//! The antimatter15 `.splat` format: 32 bytes per record.
//!
//! Layout per record: `f32x3` position, `f32x3` linear scale, `u8x4`
//! color + opacity, `u8x4` quaternion. Scales log-transform on read,
//! colors invert through the DC bias, opacity passes through the inverse
//! sigmoid, and the quaternion renormalizes (identity when zero length).

use std::io::Write;

use splat_core::column::{Column, DataTable};
use splat_core::gaussian::{color_byte_to_dc, dc_to_color_byte, require_gaussian};
use splat_core::math::{inv_sigmoid, normalize_or_identity, sigmoid};

use crate::{Document, IoError, Result};

pub const RECORD_SIZE: usize = 32;

pub fn read(bytes: &[u8]) -> Result<Document> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(IoError::MalformedInput(format!(
            ".splat size {} is not a multiple of {RECORD_SIZE}",
            bytes.len()
        )));
    }
    let count = bytes.len() / RECORD_SIZE;

    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(count); 14];
    for record in bytes.chunks_exact(RECORD_SIZE) {
        let f32_at = |offset: usize| {
            f32::from_le_bytes([
                record[offset],
                record[offset + 1],
                record[offset + 2],
                record[offset + 3],
            ])
        };
        columns[0].push(f32_at(0));
        columns[1].push(f32_at(4));
        columns[2].push(f32_at(8));
        for axis in 0..3 {
            columns[3 + axis].push(f32_at(12 + axis * 4).ln());
        }

        let q = normalize_or_identity(
            record[28] as f64 / 127.5 - 1.0,
            record[29] as f64 / 127.5 - 1.0,
            record[30] as f64 / 127.5 - 1.0,
            record[31] as f64 / 127.5 - 1.0,
        );
        columns[6].push(q.w as f32);
        columns[7].push(q.i as f32);
        columns[8].push(q.j as f32);
        columns[9].push(q.k as f32);

        for channel in 0..3 {
            columns[10 + channel].push(color_byte_to_dc(record[24 + channel]));
        }
        columns[13].push(inv_sigmoid(record[27] as f64 / 255.0) as f32);
    }

    let names = [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        "f_dc_0", "f_dc_1", "f_dc_2", "opacity",
    ];
    let table = DataTable::new(
        names
            .iter()
            .zip(columns)
            .map(|(name, data)| Column::f32(*name, data))
            .collect(),
    )
    .map_err(IoError::Core)?;
    Ok(Document::new(table))
}

pub fn write<W: Write>(writer: &mut W, table: &DataTable) -> Result<()> {
    require_gaussian(table).map_err(IoError::Core)?;
    let count = table.num_rows();
    let value = |name: &str, i: usize| table.column(name).map(|c| c.get(i)).unwrap_or(0.0);

    let mut record = [0u8; RECORD_SIZE];
    for i in 0..count {
        record[0..4].copy_from_slice(&(value("x", i) as f32).to_le_bytes());
        record[4..8].copy_from_slice(&(value("y", i) as f32).to_le_bytes());
        record[8..12].copy_from_slice(&(value("z", i) as f32).to_le_bytes());
        for axis in 0..3 {
            let linear = (value(&format!("scale_{axis}"), i).exp()) as f32;
            record[12 + axis * 4..16 + axis * 4].copy_from_slice(&linear.to_le_bytes());
        }
        for channel in 0..3 {
            record[24 + channel] = dc_to_color_byte(value(&format!("f_dc_{channel}"), i) as f32);
        }
        record[27] = (sigmoid(value("opacity", i)) * 255.0).round() as u8;

        let q = normalize_or_identity(
            value("rot_0", i),
            value("rot_1", i),
            value("rot_2", i),
            value("rot_3", i),
        );
        for (slot, component) in [q.w, q.i, q.j, q.k].iter().enumerate() {
            record[28 + slot] = ((component + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
        }
        writer.write_all(&record)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_core::gaussian::REQUIRED_COLUMNS;

    #[test]
    fn rejects_truncated_records() {
        assert!(read(&[0u8; 33]).is_err());
        assert!(read(&[0u8; 31]).is_err());
    }

    #[test]
    fn empty_input_reads_as_zero_rows() {
        let doc = read(&[]).unwrap();
        assert_eq!(doc.table.num_rows(), 0);
        assert_eq!(doc.table.num_columns(), 14);
    }

    #[test]
    fn quaternions_renormalize_on_read() {
        let mut record = [0u8; RECORD_SIZE];
        // Near-zero encoded components still come out unit length.
        record[28] = 128;
        record[29] = 128;
        record[30] = 128;
        record[31] = 128;
        // Keep scales positive so ln() stays finite.
        for axis in 0..3 {
            record[12 + axis * 4..16 + axis * 4].copy_from_slice(&1.0f32.to_le_bytes());
        }
        let doc = read(&record).unwrap();
        let q: Vec<f64> = ["rot_0", "rot_1", "rot_2", "rot_3"]
            .iter()
            .map(|n| doc.table.column(n).unwrap().get(0))
            .collect();
        let norm = (q.iter().map(|v| v * v).sum::<f64>()).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn write_read_round_trip() {
        let n = 5;
        let columns = REQUIRED_COLUMNS
            .iter()
            .map(|name| {
                let data: Vec<f32> = (0..n)
                    .map(|i| match *name {
                        "x" | "y" | "z" => i as f32 * 0.5 - 1.0,
                        "scale_0" | "scale_1" | "scale_2" => -2.0 + i as f32 * 0.1,
                        "rot_0" => 1.0,
                        "opacity" => i as f32 * 0.3 - 0.6,
                        "f_dc_0" | "f_dc_1" | "f_dc_2" => (i as f32 * 0.2 - 0.4).clamp(-1.6, 1.6),
                        _ => 0.0,
                    })
                    .collect();
                Column::f32(*name, data)
            })
            .collect();
        let table = DataTable::new(columns).unwrap();

        let mut bytes = Vec::new();
        write(&mut bytes, &table).unwrap();
        assert_eq!(bytes.len(), n * RECORD_SIZE);

        let doc = read(&bytes).unwrap();
        for i in 0..n {
            for name in ["x", "y", "z"] {
                let got = doc.table.column(name).unwrap().get(i);
                let want = table.column(name).unwrap().get(i);
                assert!((got - want).abs() < 1e-6);
            }
            for name in ["scale_0", "scale_1", "scale_2"] {
                let got = doc.table.column(name).unwrap().get(i);
                let want = table.column(name).unwrap().get(i);
                assert!((got - want).abs() < 1e-5);
            }
            for name in ["f_dc_0", "f_dc_1", "f_dc_2"] {
                let got = doc.table.column(name).unwrap().get(i);
                let want = table.column(name).unwrap().get(i);
                assert!((got - want).abs() < (1.0 / 255.0) / 0.28 + 1e-5, "{name}");
            }
            let got = doc.table.column("opacity").unwrap().get(i);
            let want = table.column("opacity").unwrap().get(i);
            assert!((got - want).abs() < 0.05);
        }
    }
}
