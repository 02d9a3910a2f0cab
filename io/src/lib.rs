//! Splat File I/O
//!
//! Reads and writes the Gaussian-splat interchange formats:
//! - PLY (standard binary and the PlayCanvas compressed variant)
//! - `.splat` (antimatter15), `.ksplat` (mkkellogg), `.spz` (Niantic)
//! - SOG (WebP texture set, bundled `.sog` or unbundled `meta.json`)
//! - CSV and HTML viewer output
//!
//! File types dispatch by suffix through [`Format::detect`]; whole files
//! read through [`read_document`] and write through [`write_document`],
//! which emits to a sibling temporary file and renames into place.

pub mod compressed_ply;
pub mod csv;
pub mod generator;
pub mod html;
pub mod ksplat;
pub mod ply;
pub mod sog;
pub mod splat;
pub mod spz;
pub mod webp;
pub mod zip;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use splat_core::column::DataTable;
use splat_core::math::normalize_or_identity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("codec failure: {0}")]
    CodecFailure(String),
    #[error("core error: {0}")]
    Core(#[from] splat_core::Error),
    #[error("cluster error: {0}")]
    Cluster(#[from] splat_cluster::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;

/// A table plus the header comments carried across read and write.
#[derive(Debug, Clone)]
pub struct Document {
    pub table: DataTable,
    pub comments: Vec<String>,
}

impl Document {
    pub fn new(table: DataTable) -> Self {
        Self {
            table,
            comments: Vec::new(),
        }
    }
}

/// File formats the tool dispatches on, by case-insensitive suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ply,
    CompressedPly,
    Splat,
    KSplat,
    Spz,
    Sog,
    SogMeta,
    Csv,
    Html,
    Mjs,
}

impl Format {
    pub fn detect(path: &Path) -> Result<Format> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_ascii_lowercase())
            .unwrap_or_default();
        if name == "meta.json" {
            return Ok(Format::SogMeta);
        }
        if name.ends_with(".compressed.ply") {
            return Ok(Format::CompressedPly);
        }
        let known = [
            (".ply", Format::Ply),
            (".ksplat", Format::KSplat),
            (".splat", Format::Splat),
            (".spz", Format::Spz),
            (".sog", Format::Sog),
            (".csv", Format::Csv),
            (".html", Format::Html),
            (".mjs", Format::Mjs),
        ];
        for (suffix, format) in known {
            if name.ends_with(suffix) {
                return Ok(format);
            }
        }
        Err(IoError::UnsupportedFormat(format!(
            "unrecognized file suffix: {}",
            path.display()
        )))
    }
}

/// Options consumed by the compressed writers.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// k-means iteration count for the SOG codebooks.
    pub iterations: usize,
    /// Allow the GPU assignment backend.
    pub use_gpu: bool,
    /// Camera position baked into HTML output.
    pub camera_pos: [f64; 3],
    /// Camera target baked into HTML output.
    pub camera_target: [f64; 3],
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            iterations: 10,
            use_gpu: true,
            camera_pos: [2.0, 2.0, -2.0],
            camera_target: [0.0, 0.0, 0.0],
        }
    }
}

/// Read a whole splat file into a [`Document`].
pub fn read_document(path: &Path) -> Result<Document> {
    match Format::detect(path)? {
        Format::Ply | Format::CompressedPly => {
            let file = ply::read_ply(&mut BufReader::new(File::open(path)?))?;
            if compressed_ply::is_compressed(&file) {
                compressed_ply::decode(&file)
            } else {
                ply::into_document(file)
            }
        }
        Format::Splat => splat::read(&std::fs::read(path)?),
        Format::KSplat => ksplat::read(&std::fs::read(path)?),
        Format::Spz => spz::read(&std::fs::read(path)?),
        Format::Sog => sog::read_bundle(&std::fs::read(path)?),
        Format::SogMeta => sog::read_unbundled(path),
        Format::Mjs => Err(IoError::UnsupportedFormat(
            "no generator runtime is registered for .mjs input".into(),
        )),
        Format::Csv | Format::Html => Err(IoError::UnsupportedFormat(format!(
            "{} is write-only",
            path.display()
        ))),
    }
}

/// Write a [`Document`] to `path`, dispatching on suffix.
///
/// Quaternions are normalized before emission. Output lands in a sibling
/// temporary file first and is renamed over `path` after a successful
/// flush, so failures never leave a partial file behind.
pub fn write_document(path: &Path, mut doc: Document, options: &WriteOptions) -> Result<()> {
    let format = Format::detect(path)?;
    normalize_rotations(&mut doc.table);
    match format {
        Format::Ply => write_atomic(path, |w| ply::write_document(w, &doc)),
        Format::CompressedPly => write_atomic(path, |w| {
            let file = compressed_ply::encode(&doc.table, doc.comments.clone())?;
            ply::write_ply(w, &file)
        }),
        Format::Splat => write_atomic(path, |w| splat::write(w, &doc.table)),
        Format::Spz => write_atomic(path, |w| spz::write(w, &doc.table)),
        Format::Sog => write_atomic(path, |w| sog::write_bundle(w, &doc.table, options)),
        Format::SogMeta => sog::write_unbundled(path, &doc.table, options),
        Format::Csv => write_atomic(path, |w| csv::write(w, &doc.table)),
        Format::Html => write_atomic(path, |w| html::write(w, &doc.table, options)),
        Format::KSplat | Format::Mjs => Err(IoError::UnsupportedFormat(format!(
            "{} is read-only",
            path.display()
        ))),
    }
}

/// Normalize `rot_0..rot_3` in place; zero-length rows become identity.
fn normalize_rotations(table: &mut DataTable) {
    let n = table.num_rows();
    let Some([c0, c1, c2, c3]) = table.disjoint_columns_mut(["rot_0", "rot_1", "rot_2", "rot_3"])
    else {
        return;
    };
    for i in 0..n {
        let q = normalize_or_identity(c0.get(i), c1.get(i), c2.get(i), c3.get(i));
        c0.set(i, q.w);
        c1.set(i, q.i);
        c2.set(i, q.j);
        c3.set(i, q.k);
    }
}

/// Run `emit` against a temporary sibling of `path`, then rename into place.
pub fn write_atomic<F>(path: &Path, emit: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let temp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    let (file, temp_path) = temp.into_parts();
    let mut writer = BufWriter::new(file);
    // The temp file guard removes the partial output when emit fails.
    emit(&mut writer)?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| IoError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);
    temp_path
        .persist(path)
        .map_err(|e| IoError::Io(e.error))?;
    Ok(())
}
