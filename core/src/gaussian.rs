//! Gaussian-set column conventions.
//!
//! A table is recognized as a Gaussian set when it carries positions,
//! log-scales, a quaternion, DC color coefficients, and a pre-sigmoid
//! opacity. Higher-degree spherical-harmonics coefficients live in
//! `f_rest_*` columns, channel-major: all red coefficients, then green,
//! then blue.

use crate::column::DataTable;
use crate::{Error, Result};

/// Zero-band SH normalization constant.
pub const SH_C0: f64 = 0.28209479177387814;

/// Columns every Gaussian set must carry.
pub const REQUIRED_COLUMNS: [&str; 14] = [
    "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3", "f_dc_0",
    "f_dc_1", "f_dc_2", "opacity",
];

/// Per-channel coefficient count for SH bands 1..=b (excluding DC).
pub fn coeffs_per_channel(bands: usize) -> usize {
    match bands {
        0 => 0,
        1 => 3,
        2 => 8,
        3 => 15,
        _ => unreachable!("bands limited to 0..=3"),
    }
}

pub fn is_gaussian_table(table: &DataTable) -> bool {
    REQUIRED_COLUMNS.iter().all(|name| table.has_column(name))
}

pub fn require_gaussian(table: &DataTable) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| !table.has_column(name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingRequiredColumns(missing.join(", ")))
    }
}

/// Number of contiguous `f_rest_i` columns starting at `f_rest_0`.
pub fn rest_column_count(table: &DataTable) -> usize {
    let mut count = 0;
    while table.has_column(&format!("f_rest_{count}")) {
        count += 1;
    }
    count
}

/// SH band count implied by the `f_rest_*` columns: 9, 24, or 45 rest
/// columns mean bands 1, 2, or 3. Any other nonzero count is an error.
pub fn sh_bands(table: &DataTable) -> Result<usize> {
    match rest_column_count(table) {
        0 => Ok(0),
        9 => Ok(1),
        24 => Ok(2),
        45 => Ok(3),
        n => Err(Error::MalformedInput(format!(
            "{n} f_rest columns do not correspond to SH bands 1, 2, or 3"
        ))),
    }
}

/// Recover a linear DC coefficient from an 8-bit color channel.
pub fn color_byte_to_dc(c: u8) -> f32 {
    ((c as f64 / 255.0 - 0.5) / SH_C0) as f32
}

/// Map a linear DC coefficient to an 8-bit color channel.
pub fn dc_to_color_byte(dc: f32) -> u8 {
    ((dc as f64 * SH_C0 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8
}
