//! The mkkellogg `.ksplat` container (read-only).
//!
//! A 4 KiB main header is followed by one 1 KiB header per section at fixed
//! offsets, then each section's data: partial-bucket counts, bucket centers,
//! and the splat stream. Compression mode 0 stores raw `f32`; modes 1 and 2
//! quantize positions to 16 bits around per-bucket centers and scales /
//! rotations to `float16`. SH coefficients are `f32` (mode 0), `float16`
//! (mode 1), or bytes scaled into the header's harmonics range (mode 2).

use half::f16;

use splat_core::column::{Column, DataTable};
use splat_core::gaussian::color_byte_to_dc;
use splat_core::math::inv_sigmoid;

use crate::{Document, IoError, Result};

const MAIN_HEADER_SIZE: usize = 4096;
const SECTION_HEADER_SIZE: usize = 1024;

struct MainHeader {
    max_section_count: usize,
    section_count: usize,
    splat_count: usize,
    compression_level: u16,
    min_harmonic: f32,
    max_harmonic: f32,
}

struct SectionHeader {
    splat_count: usize,
    bucket_size: usize,
    bucket_count: usize,
    bucket_block_size: f32,
    bucket_storage_size: usize,
    compression_scale_range: u32,
    full_bucket_count: usize,
    partial_bucket_count: usize,
    sh_degree: u16,
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn f32_at(bytes: &[u8], offset: usize) -> f32 {
    f32::from_bits(u32_at(bytes, offset))
}

fn f16_at(bytes: &[u8], offset: usize) -> f32 {
    f16::from_bits(u16_at(bytes, offset)).to_f32()
}

fn parse_main_header(bytes: &[u8]) -> Result<MainHeader> {
    if bytes.len() < MAIN_HEADER_SIZE {
        return Err(IoError::MalformedInput(".ksplat main header truncated".into()));
    }
    let header = MainHeader {
        max_section_count: u32_at(bytes, 4) as usize,
        section_count: u32_at(bytes, 8) as usize,
        splat_count: u32_at(bytes, 16) as usize,
        compression_level: u16_at(bytes, 20),
        min_harmonic: f32_at(bytes, 36),
        max_harmonic: f32_at(bytes, 40),
    };
    if header.compression_level > 2 {
        return Err(IoError::UnsupportedFormat(format!(
            ".ksplat compression mode {}",
            header.compression_level
        )));
    }
    if header.section_count > header.max_section_count {
        return Err(IoError::MalformedInput(
            ".ksplat section count exceeds the declared maximum".into(),
        ));
    }
    Ok(header)
}

fn parse_section_header(bytes: &[u8], index: usize) -> Result<SectionHeader> {
    let base = MAIN_HEADER_SIZE + index * SECTION_HEADER_SIZE;
    if bytes.len() < base + SECTION_HEADER_SIZE {
        return Err(IoError::MalformedInput(format!(
            ".ksplat section header {index} truncated"
        )));
    }
    Ok(SectionHeader {
        splat_count: u32_at(bytes, base) as usize,
        bucket_size: u32_at(bytes, base + 8) as usize,
        bucket_count: u32_at(bytes, base + 12) as usize,
        bucket_block_size: f32_at(bytes, base + 16),
        bucket_storage_size: u16_at(bytes, base + 20) as usize,
        compression_scale_range: u32_at(bytes, base + 24),
        full_bucket_count: u32_at(bytes, base + 32) as usize,
        partial_bucket_count: u32_at(bytes, base + 36) as usize,
        sh_degree: u16_at(bytes, base + 40),
    })
}

fn sh_coeff_count(degree: u16) -> Result<usize> {
    match degree {
        0 => Ok(0),
        1 => Ok(9),
        2 => Ok(24),
        3 => Ok(45),
        d => Err(IoError::MalformedInput(format!(".ksplat SH degree {d}"))),
    }
}

fn bytes_per_splat(level: u16, sh_count: usize) -> usize {
    match level {
        0 => 12 + 12 + 16 + 4 + sh_count * 4,
        1 => 6 + 6 + 8 + 4 + sh_count * 2,
        _ => 6 + 6 + 8 + 4 + sh_count,
    }
}

pub fn read(bytes: &[u8]) -> Result<Document> {
    let main = parse_main_header(bytes)?;
    let sections: Vec<SectionHeader> = (0..main.section_count)
        .map(|i| parse_section_header(bytes, i))
        .collect::<Result<_>>()?;

    let total: usize = sections.iter().map(|s| s.splat_count).sum();
    if total != main.splat_count {
        return Err(IoError::MalformedInput(format!(
            ".ksplat sections hold {total} splats, header declares {}",
            main.splat_count
        )));
    }
    // Every section shares the file-level SH degree for the column layout.
    let sh_count = sections
        .iter()
        .map(|s| sh_coeff_count(s.sh_degree))
        .try_fold(0usize, |acc, c| c.map(|c| acc.max(c)))?;
    let sh_per_channel = sh_count / 3;

    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(total); 14 + sh_count];

    let mut offset = MAIN_HEADER_SIZE + main.max_section_count * SECTION_HEADER_SIZE;
    for section in &sections {
        offset = read_section(bytes, offset, &main, section, &mut columns, sh_per_channel)?;
    }

    let names = [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        "f_dc_0", "f_dc_1", "f_dc_2", "opacity",
    ];
    let mut table_columns: Vec<Column> = Vec::with_capacity(columns.len());
    for (i, data) in columns.into_iter().enumerate() {
        let name = if i < 14 {
            names[i].to_string()
        } else {
            format!("f_rest_{}", i - 14)
        };
        table_columns.push(Column::f32(name, data));
    }
    let table = DataTable::new(table_columns).map_err(IoError::Core)?;
    Ok(Document::new(table))
}

fn read_section(
    bytes: &[u8],
    mut offset: usize,
    main: &MainHeader,
    section: &SectionHeader,
    columns: &mut [Vec<f32>],
    sh_per_channel: usize,
) -> Result<usize> {
    let section_sh = sh_coeff_count(section.sh_degree)?;
    let level = main.compression_level;
    let splat_bytes = bytes_per_splat(level, section_sh);

    // Partial bucket sizes precede the bucket centers.
    let mut partial_counts = Vec::with_capacity(section.partial_bucket_count);
    let need = section.partial_bucket_count * 4;
    if bytes.len() < offset + need {
        return Err(IoError::MalformedInput(".ksplat bucket metadata truncated".into()));
    }
    for i in 0..section.partial_bucket_count {
        partial_counts.push(u32_at(bytes, offset + i * 4) as usize);
    }
    offset += need;

    let centers_bytes = section.bucket_count * section.bucket_storage_size;
    if bytes.len() < offset + centers_bytes {
        return Err(IoError::MalformedInput(".ksplat bucket centers truncated".into()));
    }
    let mut centers = Vec::with_capacity(section.bucket_count * 3);
    for b in 0..section.bucket_count {
        let base = offset + b * section.bucket_storage_size;
        for axis in 0..3 {
            centers.push(f32_at(bytes, base + axis * 4));
        }
    }
    offset += centers_bytes;

    let data_bytes = section.splat_count * splat_bytes;
    if bytes.len() < offset + data_bytes {
        return Err(IoError::MalformedInput(".ksplat splat data truncated".into()));
    }

    // Splats stream bucket by bucket: full buckets first, then the
    // partially-filled ones with their own counts.
    let bucket_of = |splat: usize| -> usize {
        let full_span = section.full_bucket_count * section.bucket_size;
        if splat < full_span {
            return splat / section.bucket_size.max(1);
        }
        let mut remaining = splat - full_span;
        for (i, count) in partial_counts.iter().enumerate() {
            if remaining < *count {
                return section.full_bucket_count + i;
            }
            remaining -= count;
        }
        section.bucket_count.saturating_sub(1)
    };

    let scale_factor = if section.compression_scale_range > 0 {
        section.bucket_block_size / 2.0 / section.compression_scale_range as f32
    } else {
        0.0
    };

    for splat in 0..section.splat_count {
        let base = offset + splat * splat_bytes;
        let mut cursor = base;

        if level == 0 {
            for axis in 0..3 {
                columns[axis].push(f32_at(bytes, cursor + axis * 4));
            }
            cursor += 12;
        } else {
            let bucket = bucket_of(splat);
            for axis in 0..3 {
                let q = u16_at(bytes, cursor + axis * 2) as i64;
                let centered =
                    (q - section.compression_scale_range as i64) as f32 * scale_factor;
                columns[axis].push(centered + centers[bucket * 3 + axis]);
            }
            cursor += 6;
        }

        for axis in 0..3 {
            let linear = if level == 0 {
                f32_at(bytes, cursor + axis * 4)
            } else {
                f16_at(bytes, cursor + axis * 2)
            };
            columns[3 + axis].push(linear.max(0.0).ln());
        }
        cursor += if level == 0 { 12 } else { 6 };

        for slot in 0..4 {
            let component = if level == 0 {
                f32_at(bytes, cursor + slot * 4)
            } else {
                f16_at(bytes, cursor + slot * 2)
            };
            columns[6 + slot].push(component);
        }
        cursor += if level == 0 { 16 } else { 8 };

        for channel in 0..3 {
            columns[10 + channel].push(color_byte_to_dc(bytes[cursor + channel]));
        }
        columns[13].push(inv_sigmoid(bytes[cursor + 3] as f64 / 255.0) as f32);
        cursor += 4;

        let section_per_channel = section_sh / 3;
        for coeff in 0..sh_per_channel {
            for channel in 0..3 {
                let value = if coeff >= section_per_channel {
                    0.0
                } else {
                    let slot = coeff * 3 + channel;
                    match level {
                        0 => f32_at(bytes, cursor + slot * 4),
                        1 => f16_at(bytes, cursor + slot * 2),
                        _ => {
                            let byte = bytes[cursor + slot] as f32;
                            main.min_harmonic
                                + byte / 255.0 * (main.max_harmonic - main.min_harmonic)
                        }
                    }
                };
                columns[14 + channel * sh_per_channel + coeff].push(value);
            }
        }
    }

    Ok(offset + data_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_u32(bytes: &mut [u8], offset: usize, v: u32) {
        bytes[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u16(bytes: &mut [u8], offset: usize, v: u16) {
        bytes[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_f32(bytes: &mut [u8], offset: usize, v: f32) {
        bytes[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn build_mode0_file(positions: &[[f32; 3]]) -> Vec<u8> {
        let count = positions.len();
        let mut bytes = vec![0u8; MAIN_HEADER_SIZE + SECTION_HEADER_SIZE];
        bytes[0] = 0; // version major
        bytes[1] = 1;
        put_u32(&mut bytes, 4, 1); // max sections
        put_u32(&mut bytes, 8, 1); // sections
        put_u32(&mut bytes, 12, count as u32);
        put_u32(&mut bytes, 16, count as u32);
        put_u16(&mut bytes, 20, 0); // raw f32

        let s = MAIN_HEADER_SIZE;
        put_u32(&mut bytes, s, count as u32);
        put_u32(&mut bytes, s + 4, count as u32);
        put_u32(&mut bytes, s + 8, 256);
        put_u32(&mut bytes, s + 12, 0); // no buckets in raw mode
        put_f32(&mut bytes, s + 16, 5.0);
        put_u16(&mut bytes, s + 20, 12);
        put_u32(&mut bytes, s + 24, 32767);
        put_u16(&mut bytes, s + 40, 0); // no SH

        for p in positions {
            let mut splat = vec![0u8; 44];
            for axis in 0..3 {
                splat[axis * 4..axis * 4 + 4].copy_from_slice(&p[axis].to_le_bytes());
            }
            // Unit linear scales, identity rotation, mid color.
            for axis in 0..3 {
                splat[12 + axis * 4..16 + axis * 4].copy_from_slice(&1.0f32.to_le_bytes());
            }
            splat[24..28].copy_from_slice(&1.0f32.to_le_bytes());
            splat[40] = 128;
            splat[41] = 128;
            splat[42] = 128;
            splat[43] = 200;
            bytes.extend_from_slice(&splat);
        }
        bytes
    }

    #[test]
    fn mode0_positions_read_back() {
        let positions = [[1.0, 2.0, 3.0], [-4.0, 0.5, 9.0]];
        let doc = read(&build_mode0_file(&positions)).unwrap();
        assert_eq!(doc.table.num_rows(), 2);
        for (i, p) in positions.iter().enumerate() {
            assert!((doc.table.column("x").unwrap().get(i) - p[0] as f64).abs() < 1e-6);
            assert!((doc.table.column("y").unwrap().get(i) - p[1] as f64).abs() < 1e-6);
            assert!((doc.table.column("z").unwrap().get(i) - p[2] as f64).abs() < 1e-6);
        }
        // Unit linear scale reads back as zero log-scale.
        assert!(doc.table.column("scale_0").unwrap().get(0).abs() < 1e-6);
        // Identity rotation.
        assert!((doc.table.column("rot_0").unwrap().get(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mode1_positions_dequantize_around_bucket_centers() {
        let mut bytes = vec![0u8; MAIN_HEADER_SIZE + SECTION_HEADER_SIZE];
        put_u32(&mut bytes, 4, 1);
        put_u32(&mut bytes, 8, 1);
        put_u32(&mut bytes, 16, 2);
        put_u16(&mut bytes, 20, 1);

        let s = MAIN_HEADER_SIZE;
        put_u32(&mut bytes, s, 2); // splats
        put_u32(&mut bytes, s + 8, 2); // bucket size
        put_u32(&mut bytes, s + 12, 1); // one bucket
        put_f32(&mut bytes, s + 16, 4.0); // block size
        put_u16(&mut bytes, s + 20, 12);
        put_u32(&mut bytes, s + 24, 32767);
        put_u32(&mut bytes, s + 32, 1); // one full bucket
        put_u32(&mut bytes, s + 36, 0);
        put_u16(&mut bytes, s + 40, 0);

        // Bucket center at (10, 20, 30).
        for c in [10.0f32, 20.0, 30.0] {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        // Two splats, 24 bytes each: quantized center +- one step.
        for delta in [0i64, 1000] {
            let mut splat = vec![0u8; 24];
            for axis in 0..3 {
                let q = (32767 + delta) as u16;
                splat[axis * 2..axis * 2 + 2].copy_from_slice(&q.to_le_bytes());
            }
            for axis in 0..3 {
                let h = f16::from_f32(1.0).to_bits();
                splat[6 + axis * 2..8 + axis * 2].copy_from_slice(&h.to_le_bytes());
            }
            let one = f16::from_f32(1.0).to_bits();
            splat[12..14].copy_from_slice(&one.to_le_bytes());
            splat[20] = 128;
            splat[21] = 128;
            splat[22] = 128;
            splat[23] = 128;
            bytes.extend_from_slice(&splat);
        }

        let doc = read(&bytes).unwrap();
        // First splat sits exactly on the bucket center.
        assert!((doc.table.column("x").unwrap().get(0) - 10.0).abs() < 1e-4);
        assert!((doc.table.column("y").unwrap().get(0) - 20.0).abs() < 1e-4);
        // Second offsets by 1000 steps of blockSize/2/range.
        let step = 4.0 / 2.0 / 32767.0;
        assert!((doc.table.column("x").unwrap().get(1) - (10.0 + 1000.0 * step as f64)).abs() < 1e-3);
    }

    #[test]
    fn rejects_unknown_compression() {
        let mut bytes = vec![0u8; MAIN_HEADER_SIZE];
        put_u32(&mut bytes, 4, 0);
        put_u16(&mut bytes, 20, 7);
        assert!(matches!(
            read(&bytes).unwrap_err(),
            IoError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(read(&[0u8; 100]).is_err());
    }
}
