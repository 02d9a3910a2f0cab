//! Spatial Ordering and Quantization
//!
//! This crate provides the clustering machinery behind the compressed splat
//! formats:
//! - [`morton`]: Recursive Morton-order spatial sort
//! - [`kdtree`]: Static nearest-neighbor index over a centroid table
//! - [`kmeans`]: Lloyd-style quantizer with pluggable assignment backends
//! - [`gpu`]: Batched nearest-centroid assignment on wgpu
//!
//! ## Key Types
//!
//! - [`kmeans::AssignBackend`]: The assignment seam shared by CPU and GPU
//! - [`gpu::GpuCluster`]: The wgpu-backed assignment implementation

pub mod gpu;
pub mod kdtree;
pub mod kmeans;
pub mod morton;

pub use kdtree::KdTree;
pub use kmeans::{cluster, AssignBackend};
pub use morton::morton_order;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("GPU unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("device error: {0}")]
    DeviceError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
