//! Procedural splat sources.
//!
//! A generator streams rows over a fixed column-name set into a
//! pre-allocated row dictionary; `param` actions configure it before the
//! first row. The core never depends on a concrete implementation: a
//! scripting host can plug one in behind this trait, and without one the
//! dispatcher reports `.mjs` inputs as unsupported.

use std::collections::HashMap;

use splat_core::column::{Column, DataTable, ElementType};

use crate::{IoError, Result};

pub trait Generator {
    /// Column names the generator fills, in table order.
    fn columns(&self) -> &[String];

    /// Number of rows the generator will produce.
    fn count(&self) -> usize;

    /// Set one `name=value` parameter. Unknown names are an error.
    fn set_param(&mut self, name: &str, value: &str) -> Result<()>;

    /// Fill `row` for the given index. Every declared column must be set.
    fn row(&self, index: usize, row: &mut HashMap<String, f64>);
}

/// Drive a generator to completion into a table of `f32` columns.
pub fn generate(generator: &dyn Generator) -> Result<DataTable> {
    let names = generator.columns().to_vec();
    if names.is_empty() {
        return Err(IoError::MalformedInput(
            "generator declares no columns".into(),
        ));
    }
    let count = generator.count();
    let mut columns: Vec<Column> = names
        .iter()
        .map(|name| Column::zeroed(name.clone(), ElementType::F32, count))
        .collect();

    let mut row: HashMap<String, f64> = HashMap::with_capacity(names.len());
    for index in 0..count {
        generator.row(index, &mut row);
        for (slot, name) in names.iter().enumerate() {
            if let Some(&value) = row.get(name) {
                columns[slot].set(index, value);
            }
        }
    }
    DataTable::new(columns).map_err(IoError::Core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_core::gaussian::REQUIRED_COLUMNS;

    struct Grid {
        names: Vec<String>,
        side: usize,
        spacing: f64,
    }

    impl Grid {
        fn new() -> Self {
            Self {
                names: REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
                side: 2,
                spacing: 1.0,
            }
        }
    }

    impl Generator for Grid {
        fn columns(&self) -> &[String] {
            &self.names
        }

        fn count(&self) -> usize {
            self.side * self.side
        }

        fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
            match name {
                "side" => {
                    self.side = value
                        .parse()
                        .map_err(|_| IoError::MalformedInput("side must be an integer".into()))?
                }
                "spacing" => {
                    self.spacing = value
                        .parse()
                        .map_err(|_| IoError::MalformedInput("spacing must be a number".into()))?
                }
                _ => {
                    return Err(IoError::MalformedInput(format!(
                        "unknown generator parameter '{name}'"
                    )))
                }
            }
            Ok(())
        }

        fn row(&self, index: usize, row: &mut HashMap<String, f64>) {
            for name in &self.names {
                row.insert(name.clone(), 0.0);
            }
            row.insert("x".into(), (index % self.side) as f64 * self.spacing);
            row.insert("y".into(), (index / self.side) as f64 * self.spacing);
            row.insert("rot_0".into(), 1.0);
        }
    }

    #[test]
    fn generates_a_gaussian_table() {
        let mut grid = Grid::new();
        grid.set_param("side", "3").unwrap();
        grid.set_param("spacing", "0.5").unwrap();

        let table = generate(&grid).unwrap();
        assert_eq!(table.num_rows(), 9);
        assert!(splat_core::gaussian::is_gaussian_table(&table));
        assert_eq!(table.column("x").unwrap().get(4), 0.5);
        assert_eq!(table.column("y").unwrap().get(4), 0.5);
    }

    #[test]
    fn unknown_parameters_error() {
        let mut grid = Grid::new();
        assert!(grid.set_param("curvature", "1").is_err());
    }
}
