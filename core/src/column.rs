//! Typed columns and the table container.
//!
//! A [`Column`] is a named, densely-packed one-dimensional array over one of
//! eight numeric element types. A [`DataTable`] is an ordered sequence of
//! columns sharing a row count. Readers build tables, transforms mutate them
//! in place, filters and merges replace them, and writers consume them.

use std::collections::HashMap;

use crate::{Error, Result};

/// Element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ElementType {
    /// Width of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::I16 => "i16",
            ElementType::U16 => "u16",
            ElementType::I32 => "i32",
            ElementType::U32 => "u32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

/// Column payload: one variant per permitted element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::I8($v) => $body,
            ColumnData::U8($v) => $body,
            ColumnData::I16($v) => $body,
            ColumnData::U16($v) => $body,
            ColumnData::I32($v) => $body,
            ColumnData::U32($v) => $body,
            ColumnData::F32($v) => $body,
            ColumnData::F64($v) => $body,
        }
    };
}

impl ColumnData {
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ColumnData::I8(_) => ElementType::I8,
            ColumnData::U8(_) => ElementType::U8,
            ColumnData::I16(_) => ElementType::I16,
            ColumnData::U16(_) => ElementType::U16,
            ColumnData::I32(_) => ElementType::I32,
            ColumnData::U32(_) => ElementType::U32,
            ColumnData::F32(_) => ElementType::F32,
            ColumnData::F64(_) => ElementType::F64,
        }
    }

    fn zeroed(ty: ElementType, len: usize) -> ColumnData {
        match ty {
            ElementType::I8 => ColumnData::I8(vec![0; len]),
            ElementType::U8 => ColumnData::U8(vec![0; len]),
            ElementType::I16 => ColumnData::I16(vec![0; len]),
            ElementType::U16 => ColumnData::U16(vec![0; len]),
            ElementType::I32 => ColumnData::I32(vec![0; len]),
            ElementType::U32 => ColumnData::U32(vec![0; len]),
            ElementType::F32 => ColumnData::F32(vec![0.0; len]),
            ElementType::F64 => ColumnData::F64(vec![0.0; len]),
        }
    }
}

/// A named, typed, densely-packed numeric array.
///
/// Two columns match when both name and element type are equal. Values are
/// read and written through `f64` for the generic row interface; writers that
/// need a type-specific fast path use [`Column::as_f32`] and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// A zero-filled column of the given type and length.
    pub fn zeroed(name: impl Into<String>, ty: ElementType, len: usize) -> Self {
        Self::new(name, ColumnData::zeroed(ty, len))
    }

    pub fn f32(name: impl Into<String>, data: Vec<f32>) -> Self {
        Self::new(name, ColumnData::F32(data))
    }

    pub fn f64(name: impl Into<String>, data: Vec<f64>) -> Self {
        Self::new(name, ColumnData::F64(data))
    }

    pub fn u8(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(name, ColumnData::U8(data))
    }

    pub fn u32(name: impl Into<String>, data: Vec<u32>) -> Self {
        Self::new(name, ColumnData::U32(data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read row `i` widened to `f64`.
    pub fn get(&self, i: usize) -> f64 {
        each_variant!(&self.data, v => v[i] as f64)
    }

    /// Write row `i`, narrowing from `f64` with an `as` cast.
    pub fn set(&mut self, i: usize, value: f64) {
        match &mut self.data {
            ColumnData::I8(v) => v[i] = value as i8,
            ColumnData::U8(v) => v[i] = value as u8,
            ColumnData::I16(v) => v[i] = value as i16,
            ColumnData::U16(v) => v[i] = value as u16,
            ColumnData::I32(v) => v[i] = value as i32,
            ColumnData::U32(v) => v[i] = value as u32,
            ColumnData::F32(v) => v[i] = value as f32,
            ColumnData::F64(v) => v[i] = value,
        }
    }

    /// Whether row `i` holds a finite value. Integer columns are always
    /// finite.
    pub fn is_finite(&self, i: usize) -> bool {
        match &self.data {
            ColumnData::F32(v) => v[i].is_finite(),
            ColumnData::F64(v) => v[i].is_finite(),
            _ => true,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ColumnData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            ColumnData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// The column widened to `f32`, borrowing when already `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        each_variant!(&self.data, v => v.iter().map(|&x| x as f32).collect())
    }

    /// A new column whose row `j` copies this column's row `indices[j]`.
    pub fn permuted(&self, indices: &[u32]) -> Column {
        let data = each_variant!(&self.data, v => {
            let picked: Vec<_> = indices.iter().map(|&i| v[i as usize]).collect();
            column_data_from(picked)
        });
        Column::new(self.name.clone(), data)
    }

    /// Copy all rows of `src` into this column starting at `offset`.
    /// Both columns must share an element type.
    pub fn splice_from(&mut self, src: &Column, offset: usize) -> Result<()> {
        match (&mut self.data, &src.data) {
            (ColumnData::I8(d), ColumnData::I8(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::U8(d), ColumnData::U8(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::I16(d), ColumnData::I16(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::U16(d), ColumnData::U16(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::I32(d), ColumnData::I32(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::U32(d), ColumnData::U32(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::F32(d), ColumnData::F32(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            (ColumnData::F64(d), ColumnData::F64(s)) => d[offset..offset + s.len()].copy_from_slice(s),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "column '{}' element type mismatch",
                    self.name
                )))
            }
        }
        Ok(())
    }
}

trait IntoColumnData {
    fn into_column_data(self) -> ColumnData;
}

macro_rules! impl_into_column_data {
    ($($t:ty => $variant:ident),*) => {
        $(impl IntoColumnData for Vec<$t> {
            fn into_column_data(self) -> ColumnData {
                ColumnData::$variant(self)
            }
        })*
    };
}

impl_into_column_data!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, f32 => F32, f64 => F64
);

fn column_data_from<T>(v: Vec<T>) -> ColumnData
where
    Vec<T>: IntoColumnData,
{
    v.into_column_data()
}

/// An ordered sequence of equal-length columns.
///
/// Invariants: all columns share the row count, names are unique, insertion
/// order is preserved, and a table holds at least one column.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    columns: Vec<Column>,
}

impl DataTable {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::InvalidArgument(
                "a table requires at least one column".into(),
            ));
        }
        let len = columns[0].len();
        for col in &columns {
            if col.len() != len {
                return Err(Error::InvalidArgument(format!(
                    "column '{}' has {} rows, expected {}",
                    col.name(),
                    col.len(),
                    len
                )));
            }
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name() == col.name()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate column '{}'",
                    col.name()
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns[0].len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Mutable access to the column storage. Callers must not rename columns
    /// or change their lengths.
    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name() == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name() == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Borrow several columns mutably at once. Returns `None` when any name
    /// is absent or repeated.
    pub fn disjoint_columns_mut<const K: usize>(
        &mut self,
        names: [&str; K],
    ) -> Option<[&mut Column; K]> {
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return None;
            }
        }
        let mut slots: [Option<&mut Column>; K] = std::array::from_fn(|_| None);
        for col in &mut self.columns {
            if let Some(pos) = names.iter().position(|n| *n == col.name()) {
                slots[pos] = Some(col);
            }
        }
        if slots.iter().any(|s| s.is_none()) {
            return None;
        }
        let collected: Vec<&mut Column> = slots.into_iter().map(|s| s.unwrap()).collect();
        collected.try_into().ok()
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.has_column(column.name()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate column '{}'",
                column.name()
            )));
        }
        if column.len() != self.num_rows() {
            return Err(Error::InvalidArgument(format!(
                "column '{}' has {} rows, expected {}",
                column.name(),
                column.len(),
                self.num_rows()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column> {
        if self.columns.len() == 1 {
            return Err(Error::InvalidArgument(
                "cannot remove the last column".into(),
            ));
        }
        let idx = self
            .column_index(name)
            .ok_or_else(|| Error::InvalidArgument(format!("no column '{name}'")))?;
        Ok(self.columns.remove(idx))
    }

    /// A new table whose row `j` copies source row `indices[j]`.
    /// Element types are preserved.
    pub fn permute(&self, indices: &[u32]) -> DataTable {
        DataTable {
            columns: self.columns.iter().map(|c| c.permuted(indices)).collect(),
        }
    }

    /// Keep rows for which `pred` returns true.
    pub fn filter_rows<F: Fn(usize) -> bool>(&self, pred: F) -> DataTable {
        let keep: Vec<u32> = (0..self.num_rows())
            .filter(|&i| pred(i))
            .map(|i| i as u32)
            .collect();
        if keep.len() == self.num_rows() {
            return self.clone();
        }
        self.permute(&keep)
    }

    /// Read row `i` into the provided dictionary, one entry per column.
    pub fn read_row(&self, i: usize, row: &mut HashMap<String, f64>) {
        for col in &self.columns {
            row.insert(col.name().to_string(), col.get(i));
        }
    }

    /// Write row `i` from the dictionary; entries without a matching column
    /// are ignored.
    pub fn write_row(&mut self, i: usize, row: &HashMap<String, f64>) {
        for col in &mut self.columns {
            if let Some(&value) = row.get(col.name()) {
                col.set(i, value);
            }
        }
    }
}
