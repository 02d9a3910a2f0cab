//! The geometric transform pipeline.
//!
//! Actions apply to a Gaussian table strictly in command order. Consecutive
//! translate / rotate / scale actions collapse into a single TRS with
//! `p' = R * (s * p) + t` semantics; a repeated component or any other
//! action flushes the pending TRS first. Filters replace the table.

use std::collections::HashSet;

use nalgebra::{UnitQuaternion, Vector3};

use crate::column::{Column, DataTable};
use crate::gaussian::{coeffs_per_channel, require_gaussian, sh_bands};
use crate::math::{quat_from_euler_deg, Trs};
use crate::sh::ShRotation;
use crate::{Error, Result};

/// Comparison operator for [`Action::FilterByValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
}

impl Compare {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "lt" => Ok(Compare::Lt),
            "lte" => Ok(Compare::Lte),
            "gt" => Ok(Compare::Gt),
            "gte" => Ok(Compare::Gte),
            "eq" => Ok(Compare::Eq),
            "neq" => Ok(Compare::Neq),
            _ => Err(Error::InvalidArgument(format!("unknown comparator '{s}'"))),
        }
    }

    pub fn evaluate(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Compare::Lt => lhs < rhs,
            Compare::Lte => lhs <= rhs,
            Compare::Gt => lhs > rhs,
            Compare::Gte => lhs >= rhs,
            Compare::Eq => lhs == rhs,
            Compare::Neq => lhs != rhs,
        }
    }
}

/// One step of the transform pipeline.
#[derive(Debug, Clone)]
pub enum Action {
    /// Add a delta to positions.
    Translate(Vector3<f64>),
    /// Rotate by intrinsic x/y/z Euler angles in degrees.
    Rotate(Vector3<f64>),
    /// Uniform scale.
    Scale(f64),
    /// Drop rows holding non-finite values (with the opacity and scale
    /// tolerances described on [`filter_nan`]).
    FilterNan,
    /// Drop rows for which the comparison is false.
    FilterByValue {
        column: String,
        compare: Compare,
        value: f64,
    },
    /// Reduce the SH band count.
    FilterBands(usize),
    /// Generator parameter; a no-op for the core pipeline.
    Param { name: String, value: String },
}

/// Apply a sequence of actions left to right.
pub fn apply(mut table: DataTable, actions: &[Action]) -> Result<DataTable> {
    let mut pending: Option<Trs> = None;

    for action in actions {
        match action {
            Action::Translate(delta) => {
                accumulate(&mut pending, &mut table, |trs| {
                    if trs.translation != Vector3::zeros() {
                        return false;
                    }
                    trs.translation = *delta;
                    true
                })?;
            }
            Action::Rotate(euler) => {
                let q = quat_from_euler_deg(euler.x, euler.y, euler.z);
                accumulate(&mut pending, &mut table, |trs| {
                    if trs.rotation != UnitQuaternion::identity() {
                        return false;
                    }
                    trs.rotation = q;
                    true
                })?;
            }
            Action::Scale(s) => {
                accumulate(&mut pending, &mut table, |trs| {
                    if trs.scale != 1.0 {
                        return false;
                    }
                    trs.scale = *s;
                    true
                })?;
            }
            other => {
                flush(&mut pending, &mut table)?;
                table = match other {
                    Action::FilterNan => filter_nan(table),
                    Action::FilterByValue {
                        column,
                        compare,
                        value,
                    } => filter_by_value(table, column, *compare, *value),
                    Action::FilterBands(bands) => filter_bands(table, *bands)?,
                    Action::Param { .. } => table,
                    _ => unreachable!(),
                };
            }
        }
    }
    flush(&mut pending, &mut table)?;
    Ok(table)
}

fn accumulate<F: FnMut(&mut Trs) -> bool>(
    pending: &mut Option<Trs>,
    table: &mut DataTable,
    mut merge: F,
) -> Result<()> {
    let mut trs = pending.take().unwrap_or_else(Trs::identity);
    if merge(&mut trs) {
        *pending = Some(trs);
        return Ok(());
    }
    // Component already set: flush the group and start a new one.
    apply_trs(table, &trs)?;
    let mut fresh = Trs::identity();
    let merged = merge(&mut fresh);
    debug_assert!(merged);
    *pending = Some(fresh);
    Ok(())
}

fn flush(pending: &mut Option<Trs>, table: &mut DataTable) -> Result<()> {
    if let Some(trs) = pending.take() {
        apply_trs(table, &trs)?;
    }
    Ok(())
}

/// Apply one combined translate / rotate / uniform-scale to a Gaussian
/// table: positions as `p' = R * (s * p) + t`, row quaternions as
/// `q_r * q_row`, log-scales shifted by `ln s`, and SH coefficients rotated
/// by the matrix form of `q_r`.
pub fn apply_trs(table: &mut DataTable, trs: &Trs) -> Result<()> {
    if trs.is_identity() {
        return Ok(());
    }
    require_gaussian(table)?;
    let n = table.num_rows();
    let rotating = trs.rotation != UnitQuaternion::identity();

    {
        let [cx, cy, cz] = table
            .disjoint_columns_mut(["x", "y", "z"])
            .ok_or_else(|| Error::MissingRequiredColumns("x, y, z".into()))?;
        for i in 0..n {
            let p = trs.apply_point(Vector3::new(cx.get(i), cy.get(i), cz.get(i)));
            cx.set(i, p.x);
            cy.set(i, p.y);
            cz.set(i, p.z);
        }
    }

    if rotating {
        let q_r = trs.rotation.into_inner();
        let [cw, cx, cy, cz] = table
            .disjoint_columns_mut(["rot_0", "rot_1", "rot_2", "rot_3"])
            .ok_or_else(|| Error::MissingRequiredColumns("rot_0..rot_3".into()))?;
        for i in 0..n {
            let q = nalgebra::Quaternion::new(cw.get(i), cx.get(i), cy.get(i), cz.get(i));
            let rotated = q_r * q;
            cw.set(i, rotated.w);
            cx.set(i, rotated.i);
            cy.set(i, rotated.j);
            cz.set(i, rotated.k);
        }
    }

    if trs.scale != 1.0 {
        let ln_s = trs.scale.ln();
        for name in ["scale_0", "scale_1", "scale_2"] {
            let col = table
                .column_mut(name)
                .ok_or_else(|| Error::MissingRequiredColumns(name.into()))?;
            for i in 0..n {
                let v = col.get(i);
                col.set(i, v + ln_s);
            }
        }
    }

    if rotating {
        rotate_sh(table, trs)?;
    }
    Ok(())
}

fn rotate_sh(table: &mut DataTable, trs: &Trs) -> Result<()> {
    let bands = sh_bands(table)?;
    if bands == 0 {
        return Ok(());
    }
    let per_channel = coeffs_per_channel(bands);
    let mut indices = Vec::with_capacity(3 * per_channel);
    for i in 0..3 * per_channel {
        let idx = table
            .column_index(&format!("f_rest_{i}"))
            .ok_or_else(|| Error::MalformedInput(format!("missing f_rest_{i}")))?;
        indices.push(idx);
    }

    let rotation = ShRotation::new(&trs.rotation_matrix());
    let n = table.num_rows();
    let cols = table.columns_mut();
    let mut buf = [0.0f32; 15];
    for row in 0..n {
        for channel in 0..3 {
            for j in 0..per_channel {
                buf[j] = cols[indices[channel * per_channel + j]].get(row) as f32;
            }
            rotation.apply(&mut buf[..per_channel], bands);
            for j in 0..per_channel {
                cols[indices[channel * per_channel + j]].set(row, buf[j] as f64);
            }
        }
    }
    Ok(())
}

/// Drop rows containing any non-finite value, with two tolerances: an
/// infinite (but not NaN) opacity is kept, and a `-inf` log-scale (zero
/// linear scale) is kept.
pub fn filter_nan(table: DataTable) -> DataTable {
    let keep: Vec<u32> = (0..table.num_rows())
        .filter(|&i| {
            table.columns().iter().all(|col| {
                if col.is_finite(i) {
                    return true;
                }
                let v = col.get(i);
                match col.name() {
                    "opacity" => !v.is_nan(),
                    "scale_0" | "scale_1" | "scale_2" => v == f64::NEG_INFINITY,
                    _ => false,
                }
            })
        })
        .map(|i| i as u32)
        .collect();
    if keep.len() == table.num_rows() {
        return table;
    }
    table.permute(&keep)
}

/// Drop rows for which `column compare value` is false. An unknown column
/// keeps every row.
pub fn filter_by_value(table: DataTable, column: &str, compare: Compare, value: f64) -> DataTable {
    let Some(col) = table.column(column) else {
        return table;
    };
    let keep: Vec<u32> = (0..table.num_rows())
        .filter(|&i| compare.evaluate(col.get(i), value))
        .map(|i| i as u32)
        .collect();
    if keep.len() == table.num_rows() {
        return table;
    }
    table.permute(&keep)
}

/// Reduce the table to `target` SH bands, renumbering the retained
/// coefficients into channel-major order over `C(target)`.
pub fn filter_bands(table: DataTable, target: usize) -> Result<DataTable> {
    if target > 3 {
        return Err(Error::InvalidArgument(format!(
            "unsupported band count {target}"
        )));
    }
    let bands = sh_bands(&table)?;
    if bands <= target {
        return Ok(table);
    }
    let old_per = coeffs_per_channel(bands);
    let new_per = coeffs_per_channel(target);

    let mut new_rest = Vec::with_capacity(3 * new_per);
    for channel in 0..3 {
        for j in 0..new_per {
            let src = table
                .column(&format!("f_rest_{}", channel * old_per + j))
                .ok_or_else(|| Error::MalformedInput("discontiguous f_rest columns".into()))?;
            new_rest.push(Column::new(
                format!("f_rest_{}", channel * new_per + j),
                src.data.clone(),
            ));
        }
    }

    let rest_names: HashSet<String> = (0..3 * old_per).map(|i| format!("f_rest_{i}")).collect();
    let mut columns = Vec::new();
    let mut inserted = false;
    for col in table.into_columns() {
        if rest_names.contains(col.name()) {
            if !inserted {
                columns.append(&mut new_rest);
                inserted = true;
            }
            continue;
        }
        columns.push(col);
    }
    DataTable::new(columns)
}
