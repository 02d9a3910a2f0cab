//! CSV output: a header row of column names, then one row per splat.

use std::io::Write;

use splat_core::column::{ColumnData, DataTable};

use crate::Result;

fn cell(data: &ColumnData, row: usize) -> String {
    match data {
        ColumnData::I8(v) => v[row].to_string(),
        ColumnData::U8(v) => v[row].to_string(),
        ColumnData::I16(v) => v[row].to_string(),
        ColumnData::U16(v) => v[row].to_string(),
        ColumnData::I32(v) => v[row].to_string(),
        ColumnData::U32(v) => v[row].to_string(),
        ColumnData::F32(v) => v[row].to_string(),
        ColumnData::F64(v) => v[row].to_string(),
    }
}

pub fn write<W: Write>(writer: &mut W, table: &DataTable) -> Result<()> {
    let names: Vec<&str> = table.columns().iter().map(|c| c.name()).collect();
    writeln!(writer, "{}", names.join(","))?;

    for row in 0..table.num_rows() {
        let mut line = String::new();
        for (i, col) in table.columns().iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&cell(&col.data, row));
        }
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_core::column::Column;

    #[test]
    fn emits_header_and_canonical_decimals() {
        let table = DataTable::new(vec![
            Column::f32("x", vec![0.5, -1.0]),
            Column::u8("tag", vec![3, 255]),
        ])
        .unwrap();

        let mut out = Vec::new();
        write(&mut out, &table).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["x,tag", "0.5,3", "-1,255"]);
    }
}
