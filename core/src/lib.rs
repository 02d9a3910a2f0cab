//! Gaussian Splat Data Model
//!
//! This crate provides the canonical in-memory representation shared by every
//! reader, writer, and transform in the workspace:
//! - Columnar tables of typed numeric arrays
//! - Gaussian-set recognition and spherical-harmonics layout rules
//! - Quaternion / TRS math kernels
//! - Spherical-harmonics basis rotation
//! - The geometric transform pipeline and table merging
//!
//! ## Modules
//!
//! - [`column`]: Typed columns and the [`DataTable`] container
//! - [`gaussian`]: Gaussian-set column conventions and SH band layout
//! - [`math`]: Sigmoid, quaternion packing, Euler angles, TRS composition
//! - [`sh`]: Block-diagonal SH rotation for bands 1..3
//! - [`transform`]: Translate / rotate / scale / filter actions
//! - [`combine`]: Multi-table merge with column union
//!
//! ## Key Types
//!
//! - [`Column`]: One named, densely-packed numeric array
//! - [`DataTable`]: An ordered set of equal-length columns
//! - [`transform::Action`]: One step of the transform pipeline

pub mod column;
pub mod combine;
pub mod gaussian;
pub mod math;
pub mod sh;
pub mod transform;

pub use column::{Column, ColumnData, DataTable, ElementType};
pub use combine::combine;
pub use gaussian::{coeffs_per_channel, require_gaussian, sh_bands, SH_C0};
pub use transform::{Action, Compare};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("missing required columns: {0}")]
    MissingRequiredColumns(String),
}

pub type Result<T> = std::result::Result<T, Error>;
