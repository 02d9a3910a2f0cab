//! Merging Gaussian tables.

use crate::column::{Column, DataTable};
use crate::gaussian::require_gaussian;
use crate::{Error, Result};

/// Merge an ordered list of Gaussian tables into one.
///
/// The output column set is the union over inputs keyed by `(name, element
/// type)` in first-seen order; the row count is the sum of input rows.
/// Columns absent from a given input stay zero over that input's rows.
pub fn combine(tables: &[DataTable]) -> Result<DataTable> {
    if tables.is_empty() {
        return Err(Error::InvalidArgument("no tables to combine".into()));
    }
    for table in tables {
        require_gaussian(table)?;
    }
    if tables.len() == 1 {
        return Ok(tables[0].clone());
    }

    let total_rows: usize = tables.iter().map(|t| t.num_rows()).sum();

    let mut output: Vec<Column> = Vec::new();
    for table in tables {
        for col in table.columns() {
            let seen = output
                .iter()
                .any(|c| c.name() == col.name() && c.element_type() == col.element_type());
            if !seen && !output.iter().any(|c| c.name() == col.name()) {
                output.push(Column::zeroed(col.name(), col.element_type(), total_rows));
            }
        }
    }

    let mut offset = 0;
    for table in tables {
        for col in table.columns() {
            if let Some(dst) = output
                .iter_mut()
                .find(|c| c.name() == col.name() && c.element_type() == col.element_type())
            {
                dst.splice_from(col, offset)?;
            }
        }
        offset += table.num_rows();
    }

    DataTable::new(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ElementType;
    use crate::gaussian::REQUIRED_COLUMNS;

    fn gaussian_table(n: usize, x0: f64) -> DataTable {
        let columns = REQUIRED_COLUMNS
            .iter()
            .map(|name| {
                let mut col = Column::zeroed(*name, ElementType::F32, n);
                if *name == "x" {
                    for i in 0..n {
                        col.set(i, x0 + i as f64);
                    }
                }
                col
            })
            .collect();
        DataTable::new(columns).unwrap()
    }

    #[test]
    fn single_table_is_identity() {
        let table = gaussian_table(3, 0.0);
        let combined = combine(std::slice::from_ref(&table)).unwrap();
        assert_eq!(combined, table);
    }

    #[test]
    fn two_tables_concatenate_in_order() {
        let a = gaussian_table(1, 10.0);
        let b = gaussian_table(1, 20.0);
        let combined = combine(&[a, b]).unwrap();
        assert_eq!(combined.num_rows(), 2);
        assert_eq!(combined.column("x").unwrap().get(0), 10.0);
        assert_eq!(combined.column("x").unwrap().get(1), 20.0);
    }

    #[test]
    fn union_is_first_seen_and_missing_columns_zero_fill() {
        let mut a = gaussian_table(2, 0.0);
        a.add_column(Column::f32("extra_a", vec![1.0, 2.0])).unwrap();
        let mut b = gaussian_table(1, 5.0);
        b.add_column(Column::f32("extra_b", vec![9.0])).unwrap();

        let combined = combine(&[a, b]).unwrap();
        assert_eq!(combined.num_rows(), 3);

        let names: Vec<&str> = combined.columns().iter().map(|c| c.name()).collect();
        let pos_a = names.iter().position(|n| *n == "extra_a").unwrap();
        let pos_b = names.iter().position(|n| *n == "extra_b").unwrap();
        assert!(pos_a < pos_b);

        assert_eq!(combined.column("extra_a").unwrap().get(2), 0.0);
        assert_eq!(combined.column("extra_b").unwrap().get(0), 0.0);
        assert_eq!(combined.column("extra_b").unwrap().get(2), 9.0);
    }

    #[test]
    fn type_mismatch_columns_stay_separate() {
        let mut a = gaussian_table(1, 0.0);
        a.add_column(Column::f32("tag", vec![1.0])).unwrap();
        let mut b = gaussian_table(1, 0.0);
        b.add_column(Column::u8("tag", vec![7])).unwrap();

        // The u8 'tag' does not match the f32 'tag'; with the name already
        // taken it is dropped rather than merged.
        let combined = combine(&[a, b]).unwrap();
        assert_eq!(combined.column("tag").unwrap().element_type(), ElementType::F32);
        assert_eq!(combined.column("tag").unwrap().get(1), 0.0);
    }

    #[test]
    fn non_gaussian_input_fails() {
        let table = DataTable::new(vec![Column::f32("x", vec![0.0])]).unwrap();
        assert!(combine(&[table]).is_err());
    }
}
