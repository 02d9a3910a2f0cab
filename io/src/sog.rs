//! The SOG super-compressed format.
//!
//! Every splat attribute lands in a lossless WebP texture addressed by the
//! Morton-ordered splat index: 16-bit log-transformed means split across
//! two textures, smallest-three quaternions in RGB with the omitted-axis
//! tag in alpha, and scales / SH coefficients quantized through 256-entry
//! k-means codebooks recorded in `meta.json`. The set ships either as a
//! STORE-only ZIP (`.sog`) or as loose files next to `meta.json`.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use splat_cluster::gpu::GpuCluster;
use splat_cluster::kmeans::{self, AssignBackend};
use splat_cluster::morton::morton_order;
use splat_core::column::{Column, DataTable};
use splat_core::gaussian::{coeffs_per_channel, require_gaussian, sh_bands};
use splat_core::math::{
    inv_sigmoid, normalize_or_identity, sigmoid, smallest_three_decode, smallest_three_encode,
};

use crate::{webp, zip, Document, IoError, Result, WriteOptions};

pub const MEANS_L_FILE: &str = "means_l.webp";
pub const MEANS_U_FILE: &str = "means_u.webp";
pub const QUATS_FILE: &str = "quats.webp";
pub const SCALES_FILE: &str = "scales.webp";
pub const SH0_FILE: &str = "sh0.webp";
pub const SHN_CENTROIDS_FILE: &str = "shN_centroids.webp";
pub const SHN_LABELS_FILE: &str = "shN_labels.webp";

const CODEBOOK_SIZE: usize = 256;
const KMEANS_SEED: u64 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    version: u32,
    count: usize,
    means: MeansMeta,
    scales: CodebookMeta,
    quats: FilesMeta,
    sh0: CodebookMeta,
    #[serde(rename = "shN", skip_serializing_if = "Option::is_none", default)]
    sh_n: Option<ShnMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MeansMeta {
    mins: [f32; 3],
    maxs: [f32; 3],
    files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FilesMeta {
    files: Vec<String>,
}

/// Current metas carry a codebook; legacy ones carry per-channel ranges
/// and dequantize linearly.
#[derive(Debug, Serialize, Deserialize)]
struct CodebookMeta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    codebook: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    mins: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    maxs: Option<Vec<f32>>,
    files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ShnMeta {
    count: usize,
    bands: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    codebook: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    mins: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    maxs: Option<Vec<f32>>,
    files: Vec<String>,
}

fn log_transform(v: f64) -> f64 {
    v.signum() * (v.abs() + 1.0).ln()
}

fn inv_log_transform(v: f64) -> f64 {
    v.signum() * (v.abs().exp() - 1.0)
}

fn texture_dims(count: usize) -> (usize, usize) {
    let width = ((count as f64).sqrt().ceil() as usize).div_ceil(4) * 4;
    let height = count.div_ceil(width).div_ceil(4) * 4;
    (width, height)
}

/// Cluster a value stream into a sorted 256-entry codebook plus one label
/// per value.
fn codebook_quantize(
    values: &[f32],
    iterations: usize,
    backend: Option<&mut dyn AssignBackend>,
) -> Result<(Vec<f32>, Vec<u8>)> {
    let (centroids, labels) = kmeans::cluster(
        values,
        1,
        CODEBOOK_SIZE,
        iterations,
        KMEANS_SEED,
        backend,
    )?;

    // Sort ascending and remap labels onto the sorted order.
    let mut order: Vec<u32> = (0..centroids.len() as u32).collect();
    order.sort_by(|&a, &b| centroids[a as usize].total_cmp(&centroids[b as usize]));
    let mut rank = vec![0u8; centroids.len()];
    for (slot, &original) in order.iter().enumerate() {
        rank[original as usize] = slot as u8;
    }
    let codebook: Vec<f32> = order.iter().map(|&i| centroids[i as usize]).collect();
    let labels = labels.iter().map(|&l| rank[l as usize]).collect();
    Ok((codebook, labels))
}

struct TextureSet {
    files: Vec<(String, Vec<u8>)>,
}

impl TextureSet {
    fn push_rgba(&mut self, name: &str, rgba: &[u8], width: usize, height: usize) -> Result<()> {
        let encoded = webp::encode_lossless_rgba(rgba, width as u32, height as u32)?;
        self.files.push((name.to_string(), encoded));
        Ok(())
    }
}

fn blank_rgba(width: usize, height: usize) -> Vec<u8> {
    let mut rgba = vec![0u8; width * height * 4];
    for pixel in rgba.chunks_exact_mut(4) {
        pixel[3] = 255;
    }
    rgba
}

/// Encode a Gaussian table into the SOG file set (textures + meta.json).
fn build(table: &DataTable, options: &WriteOptions) -> Result<Vec<(String, Vec<u8>)>> {
    require_gaussian(table).map_err(IoError::Core)?;
    let bands = sh_bands(table).map_err(IoError::Core)?;
    let count = table.num_rows();
    if count == 0 {
        return Err(IoError::MalformedInput("cannot encode an empty table".into()));
    }

    let fetch = |name: &str| -> Vec<f32> {
        table.column(name).map(|c| c.to_f32_vec()).unwrap_or_default()
    };
    let order = morton_order(&fetch("x"), &fetch("y"), &fetch("z"));
    let table = table.permute(&order);
    let fetch = |name: &str| -> Vec<f32> {
        table.column(name).map(|c| c.to_f32_vec()).unwrap_or_default()
    };

    let mut gpu = if options.use_gpu {
        match GpuCluster::new() {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                log::warn!("falling back to CPU clustering: {e}");
                None
            }
        }
    } else {
        None
    };

    let (width, height) = texture_dims(count);
    let mut set = TextureSet { files: Vec::new() };

    // Means: component-wise log transform, 16 bits split low / high.
    let positions = [fetch("x"), fetch("y"), fetch("z")];
    let mut mins = [f32::INFINITY; 3];
    let mut maxs = [f32::NEG_INFINITY; 3];
    let mut transformed: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for axis in 0..3 {
        transformed[axis] = positions[axis]
            .iter()
            .map(|&v| log_transform(v as f64))
            .collect();
        for &v in &transformed[axis] {
            mins[axis] = mins[axis].min(v as f32);
            maxs[axis] = maxs[axis].max(v as f32);
        }
    }
    let mut means_l = blank_rgba(width, height);
    let mut means_u = blank_rgba(width, height);
    for i in 0..count {
        for axis in 0..3 {
            let range = (maxs[axis] - mins[axis]) as f64;
            let q = if range > 0.0 {
                ((transformed[axis][i] - mins[axis] as f64) / range * 65535.0).round() as u32
            } else {
                0
            };
            means_l[i * 4 + axis] = (q & 0xff) as u8;
            means_u[i * 4 + axis] = (q >> 8) as u8;
        }
    }
    set.push_rgba(MEANS_L_FILE, &means_l, width, height)?;
    set.push_rgba(MEANS_U_FILE, &means_u, width, height)?;

    // Quats: smallest-three in RGB, omitted-component tag in alpha.
    let rot = [fetch("rot_0"), fetch("rot_1"), fetch("rot_2"), fetch("rot_3")];
    let mut quats = blank_rgba(width, height);
    for i in 0..count {
        let q = normalize_or_identity(
            rot[0][i] as f64,
            rot[1][i] as f64,
            rot[2][i] as f64,
            rot[3][i] as f64,
        );
        let (max_index, rest) = smallest_three_encode(&q);
        for (slot, value) in rest.iter().enumerate() {
            quats[i * 4 + slot] = ((value * 0.5 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        quats[i * 4 + 3] = 252 + max_index as u8;
    }
    set.push_rgba(QUATS_FILE, &quats, width, height)?;

    // Scales: one shared codebook over all three axes.
    let mut scale_stream = Vec::with_capacity(count * 3);
    for name in ["scale_0", "scale_1", "scale_2"] {
        scale_stream.extend(fetch(name));
    }
    let (scale_codebook, scale_labels) = codebook_quantize(
        &scale_stream,
        options.iterations,
        gpu.as_mut().map(|g| g as &mut dyn AssignBackend),
    )?;
    let mut scales = blank_rgba(width, height);
    for i in 0..count {
        for axis in 0..3 {
            scales[i * 4 + axis] = scale_labels[axis * count + i];
        }
    }
    set.push_rgba(SCALES_FILE, &scales, width, height)?;

    // SH0 codebook in RGB, opacity in alpha.
    let mut dc_stream = Vec::with_capacity(count * 3);
    for name in ["f_dc_0", "f_dc_1", "f_dc_2"] {
        dc_stream.extend(fetch(name));
    }
    let (sh0_codebook, sh0_labels) = codebook_quantize(
        &dc_stream,
        options.iterations,
        gpu.as_mut().map(|g| g as &mut dyn AssignBackend),
    )?;
    let opacity = fetch("opacity");
    let mut sh0 = blank_rgba(width, height);
    for i in 0..count {
        for channel in 0..3 {
            sh0[i * 4 + channel] = sh0_labels[channel * count + i];
        }
        sh0[i * 4 + 3] = (sigmoid(opacity[i] as f64) * 255.0).round() as u8;
    }
    set.push_rgba(SH0_FILE, &sh0, width, height)?;

    // SH rest: palette of coefficient vectors, then a byte codebook over
    // the palette values.
    let mut sh_meta = None;
    if bands > 0 {
        let per_channel = coeffs_per_channel(bands);
        let dims = per_channel * 3;
        let mut points = Vec::with_capacity(count * dims);
        let rest: Vec<Vec<f32>> = (0..dims).map(|i| fetch(&format!("f_rest_{i}"))).collect();
        for i in 0..count {
            for column in &rest {
                points.push(column[i]);
            }
        }

        // Palette slots scale with the splat count: 2^floor(log2(N/1024))
        // of a 1024-entry block, capped at 64 blocks. Below 1024 splats the
        // exponent goes negative and the palette shrinks with N.
        let palette_size =
            ((count as f64 / 1024.0).log2().floor().exp2().min(64.0) * 1024.0) as usize;
        let (palette, palette_labels) = kmeans::cluster(
            &points,
            dims,
            palette_size,
            options.iterations,
            KMEANS_SEED,
            gpu.as_mut().map(|g| g as &mut dyn AssignBackend),
        )?;
        let palette_count = palette.len() / dims;

        let (sh_codebook, palette_bytes) = codebook_quantize(
            &palette,
            options.iterations,
            gpu.as_mut().map(|g| g as &mut dyn AssignBackend),
        )?;

        let centroid_width = 64 * per_channel;
        let centroid_height = palette_count.div_ceil(64);
        let mut centroids = blank_rgba(centroid_width, centroid_height);
        for k in 0..palette_count {
            let row = k / 64;
            let col = k % 64;
            for coeff in 0..per_channel {
                let x = col * per_channel + coeff;
                let pixel = (row * centroid_width + x) * 4;
                for channel in 0..3 {
                    centroids[pixel + channel] =
                        palette_bytes[k * dims + channel * per_channel + coeff];
                }
            }
        }
        set.push_rgba(SHN_CENTROIDS_FILE, &centroids, centroid_width, centroid_height)?;

        let mut labels_rgba = blank_rgba(width, height);
        for i in 0..count {
            let label = palette_labels[i];
            labels_rgba[i * 4] = (label & 0xff) as u8;
            labels_rgba[i * 4 + 1] = (label >> 8) as u8;
        }
        set.push_rgba(SHN_LABELS_FILE, &labels_rgba, width, height)?;

        sh_meta = Some(ShnMeta {
            count: palette_count,
            bands,
            codebook: Some(sh_codebook),
            mins: None,
            maxs: None,
            files: vec![SHN_CENTROIDS_FILE.to_string(), SHN_LABELS_FILE.to_string()],
        });
    }

    drop(gpu);

    let meta = Meta {
        version: 2,
        count,
        means: MeansMeta {
            mins,
            maxs,
            files: vec![MEANS_L_FILE.to_string(), MEANS_U_FILE.to_string()],
        },
        scales: CodebookMeta {
            codebook: Some(scale_codebook),
            mins: None,
            maxs: None,
            files: vec![SCALES_FILE.to_string()],
        },
        quats: FilesMeta {
            files: vec![QUATS_FILE.to_string()],
        },
        sh0: CodebookMeta {
            codebook: Some(sh0_codebook),
            mins: None,
            maxs: None,
            files: vec![SH0_FILE.to_string()],
        },
        sh_n: sh_meta,
    };
    let meta_bytes = serde_json::to_vec(&meta)
        .map_err(|e| IoError::CodecFailure(format!("meta.json encode: {e}")))?;

    let mut files = vec![("meta.json".to_string(), meta_bytes)];
    files.append(&mut set.files);
    Ok(files)
}

/// Write the bundled `.sog` form.
pub fn write_bundle<W: Write>(writer: &mut W, table: &DataTable, options: &WriteOptions) -> Result<()> {
    let files = build(table, options)?;
    let mut zip = zip::ZipWriter::new(writer);
    for (name, data) in &files {
        zip.add_file(name, data)?;
    }
    zip.finish()?;
    Ok(())
}

/// Write `meta.json` plus sibling textures.
pub fn write_unbundled(path: &Path, table: &DataTable, options: &WriteOptions) -> Result<()> {
    let files = build(table, options)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    for (name, data) in &files {
        let target = match dir {
            Some(dir) => dir.join(name),
            None => Path::new(name).to_path_buf(),
        };
        crate::write_atomic(&target, |w| {
            w.write_all(data)?;
            Ok(())
        })?;
    }
    Ok(())
}

/// Read the bundled `.sog` form.
pub fn read_bundle(bytes: &[u8]) -> Result<Document> {
    let entries = zip::read_archive(bytes)?;
    let files: HashMap<String, Vec<u8>> =
        entries.into_iter().map(|e| (e.name, e.data)).collect();
    let meta_bytes = files
        .get("meta.json")
        .ok_or_else(|| IoError::MalformedInput(".sog bundle lacks meta.json".into()))?;
    let meta: Meta = serde_json::from_slice(meta_bytes)
        .map_err(|e| IoError::MalformedInput(format!("meta.json: {e}")))?;
    decode(&meta, &files)
}

/// Read the unbundled `meta.json` form from its directory.
pub fn read_unbundled(path: &Path) -> Result<Document> {
    let meta_bytes = std::fs::read(path)?;
    let meta: Meta = serde_json::from_slice(&meta_bytes)
        .map_err(|e| IoError::MalformedInput(format!("meta.json: {e}")))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut files = HashMap::new();
    let mut wanted: Vec<&String> = Vec::new();
    wanted.extend(&meta.means.files);
    wanted.extend(&meta.scales.files);
    wanted.extend(&meta.quats.files);
    wanted.extend(&meta.sh0.files);
    if let Some(sh) = &meta.sh_n {
        wanted.extend(&sh.files);
    }
    for name in wanted {
        files.insert(name.clone(), std::fs::read(dir.join(name))?);
    }
    decode(&meta, &files)
}

struct Texture {
    rgba: Vec<u8>,
    width: usize,
}

impl Texture {
    fn pixel(&self, index: usize) -> &[u8] {
        &self.rgba[index * 4..index * 4 + 4]
    }

    fn at(&self, x: usize, y: usize) -> &[u8] {
        self.pixel(y * self.width + x)
    }
}

fn load_texture(files: &HashMap<String, Vec<u8>>, name: &str, count: usize) -> Result<Texture> {
    let data = files
        .get(name)
        .ok_or_else(|| IoError::MalformedInput(format!("SOG set lacks {name}")))?;
    let (rgba, width, height) = webp::decode_rgba(data)?;
    if (width as usize) * (height as usize) < count {
        return Err(IoError::MalformedInput(format!(
            "{name} holds {}x{height} pixels for {count} splats",
            width
        )));
    }
    Ok(Texture {
        rgba,
        width: width as usize,
    })
}

fn dequantize(meta_codebook: &Option<Vec<f32>>, mins: &Option<Vec<f32>>, maxs: &Option<Vec<f32>>, channel: usize, byte: u8) -> Result<f32> {
    if let Some(codebook) = meta_codebook {
        return codebook
            .get(byte as usize)
            .copied()
            .ok_or_else(|| IoError::MalformedInput("codebook label out of range".into()));
    }
    // Legacy shape: per-channel linear ranges.
    let (mins, maxs) = match (mins, maxs) {
        (Some(mins), Some(maxs)) if mins.len() > channel && maxs.len() > channel => (mins, maxs),
        _ => {
            return Err(IoError::MalformedInput(
                "SOG meta lacks both codebook and ranges".into(),
            ))
        }
    };
    Ok(mins[channel] + byte as f32 / 255.0 * (maxs[channel] - mins[channel]))
}

fn decode(meta: &Meta, files: &HashMap<String, Vec<u8>>) -> Result<Document> {
    let count = meta.count;
    let file_at = |files_list: &[String], slot: usize| -> String {
        files_list.get(slot).cloned().unwrap_or_default()
    };

    let means_l = load_texture(files, &file_at(&meta.means.files, 0), count)?;
    let means_u = load_texture(files, &file_at(&meta.means.files, 1), count)?;
    let quats = load_texture(files, &file_at(&meta.quats.files, 0), count)?;
    let scales = load_texture(files, &file_at(&meta.scales.files, 0), count)?;
    let sh0 = load_texture(files, &file_at(&meta.sh0.files, 0), count)?;

    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(count); 14];
    for i in 0..count {
        let low = means_l.pixel(i);
        let high = means_u.pixel(i);
        for axis in 0..3 {
            let q = low[axis] as u32 | ((high[axis] as u32) << 8);
            let min = meta.means.mins[axis] as f64;
            let max = meta.means.maxs[axis] as f64;
            let lt = min + q as f64 / 65535.0 * (max - min);
            columns[axis].push(inv_log_transform(lt) as f32);
        }

        let q_pixel = quats.pixel(i);
        let tag = q_pixel[3];
        if !(252..=255).contains(&tag) {
            return Err(IoError::MalformedInput(format!(
                "quaternion tag {tag} outside 252..=255"
            )));
        }
        let rest = [
            q_pixel[0] as f64 / 255.0 * 2.0 - 1.0,
            q_pixel[1] as f64 / 255.0 * 2.0 - 1.0,
            q_pixel[2] as f64 / 255.0 * 2.0 - 1.0,
        ];
        let q = smallest_three_decode((tag - 252) as usize, rest);
        columns[6].push(q.w as f32);
        columns[7].push(q.i as f32);
        columns[8].push(q.j as f32);
        columns[9].push(q.k as f32);

        let s_pixel = scales.pixel(i);
        for axis in 0..3 {
            columns[3 + axis].push(dequantize(
                &meta.scales.codebook,
                &meta.scales.mins,
                &meta.scales.maxs,
                axis,
                s_pixel[axis],
            )?);
        }

        let c_pixel = sh0.pixel(i);
        for channel in 0..3 {
            columns[10 + channel].push(dequantize(
                &meta.sh0.codebook,
                &meta.sh0.mins,
                &meta.sh0.maxs,
                channel,
                c_pixel[channel],
            )?);
        }
        columns[13].push(inv_sigmoid(c_pixel[3] as f64 / 255.0) as f32);
    }

    let names = [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        "f_dc_0", "f_dc_1", "f_dc_2", "opacity",
    ];
    let mut table_columns: Vec<Column> = names
        .iter()
        .zip(columns)
        .map(|(name, data)| Column::f32(*name, data))
        .collect();

    if let Some(sh) = &meta.sh_n {
        if sh.bands == 0 || sh.bands > 3 {
            return Err(IoError::MalformedInput(format!(
                "SOG meta declares {} SH bands",
                sh.bands
            )));
        }
        let per_channel = coeffs_per_channel(sh.bands);
        let centroids = load_texture(files, &file_at(&sh.files, 0), 0)?;
        let labels = load_texture(files, &file_at(&sh.files, 1), count)?;
        let needed_rows = sh.count.div_ceil(64);
        if centroids.width < 64 * per_channel
            || centroids.rgba.len() < needed_rows * centroids.width * 4
        {
            return Err(IoError::MalformedInput(
                "SH centroid texture is smaller than the palette".into(),
            ));
        }

        let mut rest: Vec<Vec<f32>> = vec![Vec::with_capacity(count); per_channel * 3];
        for i in 0..count {
            let pixel = labels.pixel(i);
            let label = pixel[0] as usize | ((pixel[1] as usize) << 8);
            if label >= sh.count {
                return Err(IoError::MalformedInput(format!(
                    "SH palette label {label} exceeds {}",
                    sh.count
                )));
            }
            let row = label / 64;
            let col = label % 64;
            for coeff in 0..per_channel {
                let texel = centroids.at(col * per_channel + coeff, row);
                for channel in 0..3 {
                    let value = dequantize(
                        &sh.codebook,
                        &sh.mins,
                        &sh.maxs,
                        channel,
                        texel[channel],
                    )?;
                    rest[channel * per_channel + coeff].push(value);
                }
            }
        }
        for (i, data) in rest.into_iter().enumerate() {
            table_columns.push(Column::f32(format!("f_rest_{i}"), data));
        }
    }

    let table = DataTable::new(table_columns).map_err(IoError::Core)?;
    Ok(Document::new(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_core::gaussian::REQUIRED_COLUMNS;

    fn options() -> WriteOptions {
        WriteOptions {
            use_gpu: false,
            iterations: 4,
            ..WriteOptions::default()
        }
    }

    fn sample_table(n: usize, bands: usize) -> DataTable {
        let mut columns: Vec<Column> = REQUIRED_COLUMNS
            .iter()
            .map(|name| {
                let data: Vec<f32> = (0..n)
                    .map(|i| {
                        let i = i as f32;
                        match *name {
                            "x" => (i * 0.711).sin() * 3.0,
                            "y" => (i * 0.313).cos() * 2.0,
                            "z" => (i * 0.177).sin() * 4.0,
                            "scale_0" | "scale_1" | "scale_2" => -4.0 + (i % 6.0) * 0.5,
                            "rot_0" => 0.9,
                            "rot_1" => (i * 0.3).sin() * 0.3,
                            "rot_2" => (i * 0.5).cos() * 0.3,
                            "opacity" => (i % 8.0) - 4.0,
                            "f_dc_0" | "f_dc_1" | "f_dc_2" => (i % 10.0) * 0.3 - 1.5,
                            _ => 0.0,
                        }
                    })
                    .collect();
                Column::f32(*name, data)
            })
            .collect();
        let per = coeffs_per_channel(bands);
        for i in 0..per * 3 {
            columns.push(Column::f32(
                format!("f_rest_{i}"),
                (0..n).map(|r| ((r * 3 + i) % 9) as f32 * 0.05 - 0.2).collect(),
            ));
        }
        DataTable::new(columns).unwrap()
    }

    #[test]
    fn texture_dims_are_multiples_of_four() {
        assert_eq!(texture_dims(1), (4, 4));
        assert_eq!(texture_dims(1000), (32, 32));
        let (w, h) = texture_dims(123_456);
        assert_eq!(w % 4, 0);
        assert_eq!(h % 4, 0);
        assert!(w * h >= 123_456);
    }

    #[test]
    fn log_transform_round_trips() {
        for v in [-100.0, -1.5, 0.0, 0.25, 3000.0] {
            assert!((inv_log_transform(log_transform(v)) - v).abs() < 1e-9 * v.abs().max(1.0));
        }
    }

    #[test]
    fn bundle_lists_expected_entries() {
        let table = sample_table(1000, 0);
        let mut bytes = Vec::new();
        write_bundle(&mut bytes, &table, &options()).unwrap();

        let entries = zip::read_archive(&bytes).unwrap();
        let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "means_l.webp",
                "means_u.webp",
                "meta.json",
                "quats.webp",
                "scales.webp",
                "sh0.webp",
            ]
        );
    }

    #[test]
    fn bundle_round_trip_tolerances() {
        let n = 1000;
        let table = sample_table(n, 0);
        let mut bytes = Vec::new();
        write_bundle(&mut bytes, &table, &options()).unwrap();
        let doc = read_bundle(&bytes).unwrap();
        assert_eq!(doc.table.num_rows(), n);

        // The encoder reorders; compare per decoded row against its nearest
        // source row.
        let sx = table.column("x").unwrap().to_f32_vec();
        let sy = table.column("y").unwrap().to_f32_vec();
        let sz = table.column("z").unwrap().to_f32_vec();
        let sop = table.column("opacity").unwrap().to_f32_vec();

        for i in 0..n {
            let dx = doc.table.column("x").unwrap().get(i) as f32;
            let dy = doc.table.column("y").unwrap().get(i) as f32;
            let dz = doc.table.column("z").unwrap().get(i) as f32;
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for j in 0..n {
                let d = (sx[j] - dx).powi(2) + (sy[j] - dy).powi(2) + (sz[j] - dz).powi(2);
                if d < best_dist {
                    best_dist = d;
                    best = j;
                }
            }
            assert!(best_dist.sqrt() < 1e-3, "row {i} drifted {}", best_dist.sqrt());

            let got = sigmoid(doc.table.column("opacity").unwrap().get(i));
            let want = sigmoid(sop[best] as f64);
            assert!((got - want).abs() <= 1.0 / 255.0 + 1e-6);

            let want_q = normalize_or_identity(
                table.column("rot_0").unwrap().get(best),
                table.column("rot_1").unwrap().get(best),
                table.column("rot_2").unwrap().get(best),
                table.column("rot_3").unwrap().get(best),
            );
            let dot = doc.table.column("rot_0").unwrap().get(i) * want_q.w
                + doc.table.column("rot_1").unwrap().get(i) * want_q.i
                + doc.table.column("rot_2").unwrap().get(i) * want_q.j
                + doc.table.column("rot_3").unwrap().get(i) * want_q.k;
            assert!(dot.abs() > 1.0 - 1e-2, "rotation row {i}: |dot| = {}", dot.abs());
        }
    }

    #[test]
    fn sh_palette_round_trip() {
        let n = 200;
        let table = sample_table(n, 1);
        let mut bytes = Vec::new();
        write_bundle(&mut bytes, &table, &options()).unwrap();

        let entries = zip::read_archive(&bytes).unwrap();
        assert!(entries.iter().any(|e| e.name == SHN_CENTROIDS_FILE));
        assert!(entries.iter().any(|e| e.name == SHN_LABELS_FILE));

        let doc = read_bundle(&bytes).unwrap();
        assert_eq!(
            splat_core::gaussian::rest_column_count(&doc.table),
            9
        );
        for i in 0..n {
            for c in 0..9 {
                let got = doc.table.column(&format!("f_rest_{c}")).unwrap().get(i);
                assert!(got.abs() <= 0.5);
            }
        }
    }

    #[test]
    fn sh_palette_size_shrinks_below_1024_splats() {
        // 200/1024 rounds down to 2^-3 of a 1024-entry block: 128 slots,
        // fewer than the splat count, so the palette is a genuine
        // clustering rather than the identity short-circuit.
        let table = sample_table(200, 1);
        let files = build(&table, &options()).unwrap();
        let meta_bytes = &files.iter().find(|(n, _)| n == "meta.json").unwrap().1;
        let value: serde_json::Value = serde_json::from_slice(meta_bytes).unwrap();
        assert_eq!(value["shN"]["count"], 128);

        // 600/1024 rounds down to half a block.
        let table = sample_table(600, 1);
        let files = build(&table, &options()).unwrap();
        let meta_bytes = &files.iter().find(|(n, _)| n == "meta.json").unwrap().1;
        let value: serde_json::Value = serde_json::from_slice(meta_bytes).unwrap();
        assert_eq!(value["shN"]["count"], 512);

        let mut bytes = Vec::new();
        write_bundle(&mut bytes, &table, &options()).unwrap();
        let doc = read_bundle(&bytes).unwrap();
        assert_eq!(doc.table.num_rows(), 600);
    }

    #[test]
    fn legacy_meta_linear_dequantization() {
        // Hand-built single-splat set with the legacy per-channel ranges.
        let (width, height) = texture_dims(1);
        let mut means_l = blank_rgba(width, height);
        let means_u = blank_rgba(width, height);
        // Position quantizes to the low end: exactly mins.
        means_l[0] = 0;

        let mut quats = blank_rgba(width, height);
        quats[0] = 128;
        quats[1] = 128;
        quats[2] = 128;
        quats[3] = 252; // w omitted, identity

        let mut scales = blank_rgba(width, height);
        scales[0] = 255;
        scales[1] = 0;
        scales[2] = 128;

        let mut sh0 = blank_rgba(width, height);
        sh0[0] = 255;
        sh0[3] = 128;

        let files: HashMap<String, Vec<u8>> = [
            (MEANS_L_FILE, means_l),
            (MEANS_U_FILE, means_u),
            (QUATS_FILE, quats),
            (SCALES_FILE, scales),
            (SH0_FILE, sh0),
        ]
        .into_iter()
        .map(|(name, rgba)| {
            (
                name.to_string(),
                webp::encode_lossless_rgba(&rgba, width as u32, height as u32).unwrap(),
            )
        })
        .collect();

        let meta = Meta {
            version: 1,
            count: 1,
            means: MeansMeta {
                mins: [0.0; 3],
                maxs: [1.0; 3],
                files: vec![MEANS_L_FILE.into(), MEANS_U_FILE.into()],
            },
            scales: CodebookMeta {
                codebook: None,
                mins: Some(vec![-10.0, -10.0, -10.0]),
                maxs: Some(vec![10.0, 10.0, 10.0]),
                files: vec![SCALES_FILE.into()],
            },
            quats: FilesMeta {
                files: vec![QUATS_FILE.into()],
            },
            sh0: CodebookMeta {
                codebook: None,
                mins: Some(vec![-2.0, -2.0, -2.0]),
                maxs: Some(vec![2.0, 2.0, 2.0]),
                files: vec![SH0_FILE.into()],
            },
            sh_n: None,
        };

        let doc = decode(&meta, &files).unwrap();
        assert_eq!(doc.table.num_rows(), 1);
        assert!((doc.table.column("scale_0").unwrap().get(0) - 10.0).abs() < 1e-5);
        assert!((doc.table.column("scale_1").unwrap().get(0) + 10.0).abs() < 1e-5);
        assert!((doc.table.column("f_dc_0").unwrap().get(0) - 2.0).abs() < 1e-5);
        assert!((doc.table.column("rot_0").unwrap().get(0) - 1.0).abs() < 0.02);
    }

    #[test]
    fn meta_json_shape_is_current() {
        let table = sample_table(50, 0);
        let files = build(&table, &options()).unwrap();
        let meta_bytes = &files.iter().find(|(n, _)| n == "meta.json").unwrap().1;
        let value: serde_json::Value = serde_json::from_slice(meta_bytes).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["count"], 50);
        assert!(value["scales"]["codebook"].is_array());
        assert!(value["sh0"]["codebook"].is_array());
        assert!(value.get("shN").is_none());
    }
}
