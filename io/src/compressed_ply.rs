//! PlayCanvas compressed PLY: 256-splat chunks of bit-packed attributes.
//!
//! Each chunk stores the extents of its positions, clamped log-scales, and
//! biased DC colors as 18 floats, then every splat as four packed `u32`
//! words: 11/10/11 position, 2/10/10/10 smallest-three rotation, 11/10/11
//! scale, and 8/8/8/8 color plus sigmoid opacity. The vertex stream is
//! Morton-ordered before chunking so chunk extents stay tight.

use rayon::prelude::*;

use splat_cluster::morton::morton_order;
use splat_core::column::{Column, DataTable};
use splat_core::gaussian::{require_gaussian, SH_C0};
use splat_core::math::{
    inv_sigmoid, normalize_or_identity, sigmoid, smallest_three_decode, smallest_three_encode,
};

use crate::ply::{PlyElement, PlyFile};
use crate::{Document, IoError, Result};

pub const CHUNK_SIZE: usize = 256;
const SCALE_CLAMP: f32 = 20.0;

pub const CHUNK_PROPERTIES: [&str; 18] = [
    "min_x",
    "min_y",
    "min_z",
    "max_x",
    "max_y",
    "max_z",
    "min_scale_x",
    "min_scale_y",
    "min_scale_z",
    "max_scale_x",
    "max_scale_y",
    "max_scale_z",
    "min_r",
    "min_g",
    "min_b",
    "max_r",
    "max_g",
    "max_b",
];

pub const VERTEX_PROPERTIES: [&str; 4] = [
    "packed_position",
    "packed_rotation",
    "packed_scale",
    "packed_color",
];

/// Whether a parsed PLY file carries the compressed-variant property set.
pub fn is_compressed(file: &PlyFile) -> bool {
    let vertex = file.elements.iter().find(|e| e.name == "vertex");
    let chunk = file.elements.iter().find(|e| e.name == "chunk");
    match (chunk, vertex) {
        (Some(_), Some(vertex)) => VERTEX_PROPERTIES
            .iter()
            .all(|name| vertex.table.has_column(name)),
        _ => false,
    }
}

fn pack_unorm(v: f32, bits: u32) -> u32 {
    let top = ((1u32 << bits) - 1) as f32;
    (v.clamp(0.0, 1.0) * top).round() as u32
}

fn unpack_unorm(v: u32, bits: u32) -> f32 {
    let top = (1u32 << bits) - 1;
    (v & top) as f32 / top as f32
}

fn pack_111011(x: f32, y: f32, z: f32) -> u32 {
    (pack_unorm(x, 11) << 21) | (pack_unorm(y, 10) << 11) | pack_unorm(z, 11)
}

fn pack_8888(r: f32, g: f32, b: f32, a: f32) -> u32 {
    (pack_unorm(r, 8) << 24) | (pack_unorm(g, 8) << 16) | (pack_unorm(b, 8) << 8) | pack_unorm(a, 8)
}

fn pack_rotation(w: f64, x: f64, y: f64, z: f64) -> u32 {
    let q = normalize_or_identity(w, x, y, z);
    let (max_index, rest) = smallest_three_encode(&q);
    let mut packed = (max_index as u32) << 30;
    for (slot, value) in rest.iter().enumerate() {
        let unorm = pack_unorm((value * 0.5 + 0.5) as f32, 10);
        packed |= unorm << (20 - slot * 10);
    }
    packed
}

struct Extent {
    min: f32,
    max: f32,
}

impl Extent {
    fn of(values: &[f32]) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
        }
        Self { min, max }
    }

    fn normalize(&self, v: f32) -> f32 {
        if self.max > self.min {
            (v - self.min) / (self.max - self.min)
        } else {
            0.0
        }
    }
}

struct PackedChunk {
    header: [f32; 18],
    position: Vec<u32>,
    rotation: Vec<u32>,
    scale: Vec<u32>,
    color: Vec<u32>,
}

/// Morton-order a Gaussian table and encode it as a chunk + vertex PLY.
pub fn encode(table: &DataTable, comments: Vec<String>) -> Result<PlyFile> {
    require_gaussian(table).map_err(IoError::Core)?;

    let x = table.column("x").map(|c| c.to_f32_vec()).unwrap_or_default();
    let y = table.column("y").map(|c| c.to_f32_vec()).unwrap_or_default();
    let z = table.column("z").map(|c| c.to_f32_vec()).unwrap_or_default();
    let order = morton_order(&x, &y, &z);
    let table = table.permute(&order);

    let fetch = |name: &str| -> Vec<f32> {
        table.column(name).map(|c| c.to_f32_vec()).unwrap_or_default()
    };
    let x = fetch("x");
    let y = fetch("y");
    let z = fetch("z");
    let clamp_scale = |v: &f32| v.clamp(-SCALE_CLAMP, SCALE_CLAMP);
    let sx: Vec<f32> = fetch("scale_0").iter().map(clamp_scale).collect();
    let sy: Vec<f32> = fetch("scale_1").iter().map(clamp_scale).collect();
    let sz: Vec<f32> = fetch("scale_2").iter().map(clamp_scale).collect();
    let bias_color = |v: &f32| (*v as f64 * SH_C0 + 0.5) as f32;
    let r: Vec<f32> = fetch("f_dc_0").iter().map(bias_color).collect();
    let g: Vec<f32> = fetch("f_dc_1").iter().map(bias_color).collect();
    let b: Vec<f32> = fetch("f_dc_2").iter().map(bias_color).collect();
    let opacity = fetch("opacity");
    let rot: [Vec<f32>; 4] = [fetch("rot_0"), fetch("rot_1"), fetch("rot_2"), fetch("rot_3")];

    let count = table.num_rows();
    let num_chunks = count.div_ceil(CHUNK_SIZE);

    let chunks: Vec<PackedChunk> = (0..num_chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(count);
            let ex = Extent::of(&x[start..end]);
            let ey = Extent::of(&y[start..end]);
            let ez = Extent::of(&z[start..end]);
            let esx = Extent::of(&sx[start..end]);
            let esy = Extent::of(&sy[start..end]);
            let esz = Extent::of(&sz[start..end]);
            let er = Extent::of(&r[start..end]);
            let eg = Extent::of(&g[start..end]);
            let eb = Extent::of(&b[start..end]);

            let header = [
                ex.min, ey.min, ez.min, ex.max, ey.max, ez.max, esx.min, esy.min, esz.min,
                esx.max, esy.max, esz.max, er.min, eg.min, eb.min, er.max, eg.max, eb.max,
            ];

            let mut packed = PackedChunk {
                header,
                position: Vec::with_capacity(end - start),
                rotation: Vec::with_capacity(end - start),
                scale: Vec::with_capacity(end - start),
                color: Vec::with_capacity(end - start),
            };
            for i in start..end {
                packed.position.push(pack_111011(
                    ex.normalize(x[i]),
                    ey.normalize(y[i]),
                    ez.normalize(z[i]),
                ));
                packed.rotation.push(pack_rotation(
                    rot[0][i] as f64,
                    rot[1][i] as f64,
                    rot[2][i] as f64,
                    rot[3][i] as f64,
                ));
                packed.scale.push(pack_111011(
                    esx.normalize(sx[i]),
                    esy.normalize(sy[i]),
                    esz.normalize(sz[i]),
                ));
                packed.color.push(pack_8888(
                    er.normalize(r[i]),
                    eg.normalize(g[i]),
                    eb.normalize(b[i]),
                    sigmoid(opacity[i] as f64) as f32,
                ));
            }
            packed
        })
        .collect();

    let mut chunk_columns: Vec<Vec<f32>> = vec![Vec::with_capacity(num_chunks); 18];
    let mut position = Vec::with_capacity(count);
    let mut rotation = Vec::with_capacity(count);
    let mut scale = Vec::with_capacity(count);
    let mut color = Vec::with_capacity(count);
    for chunk in chunks {
        for (slot, value) in chunk.header.iter().enumerate() {
            chunk_columns[slot].push(*value);
        }
        position.extend(chunk.position);
        rotation.extend(chunk.rotation);
        scale.extend(chunk.scale);
        color.extend(chunk.color);
    }

    let chunk_table = DataTable::new(
        CHUNK_PROPERTIES
            .iter()
            .zip(chunk_columns)
            .map(|(name, data)| Column::f32(*name, data))
            .collect(),
    )
    .map_err(IoError::Core)?;
    let vertex_table = DataTable::new(vec![
        Column::u32(VERTEX_PROPERTIES[0], position),
        Column::u32(VERTEX_PROPERTIES[1], rotation),
        Column::u32(VERTEX_PROPERTIES[2], scale),
        Column::u32(VERTEX_PROPERTIES[3], color),
    ])
    .map_err(IoError::Core)?;

    Ok(PlyFile {
        comments,
        elements: vec![
            PlyElement {
                name: "chunk".to_string(),
                table: chunk_table,
            },
            PlyElement {
                name: "vertex".to_string(),
                table: vertex_table,
            },
        ],
    })
}

/// Decode a compressed PLY back into a standard Gaussian table.
pub fn decode(file: &PlyFile) -> Result<Document> {
    let chunk = element(file, "chunk")?;
    let vertex = element(file, "vertex")?;
    for name in CHUNK_PROPERTIES {
        if !chunk.has_column(name) {
            return Err(IoError::MalformedInput(format!(
                "compressed PLY chunk element lacks '{name}'"
            )));
        }
    }

    let count = vertex.num_rows();
    let packed = |name: &str| -> Result<Vec<u32>> {
        let col = vertex
            .column(name)
            .ok_or_else(|| IoError::MalformedInput(format!("missing '{name}'")))?;
        Ok((0..count).map(|i| col.get(i) as u32).collect())
    };
    let position = packed(VERTEX_PROPERTIES[0])?;
    let rotation = packed(VERTEX_PROPERTIES[1])?;
    let scale = packed(VERTEX_PROPERTIES[2])?;
    let color = packed(VERTEX_PROPERTIES[3])?;

    let chunk_value = |name: &str, index: usize| -> f64 {
        chunk.column(name).map(|c| c.get(index)).unwrap_or(0.0)
    };
    let lerp = |min: f64, max: f64, t: f32| min + (max - min) * t as f64;

    let mut columns: Vec<Vec<f32>> = vec![Vec::with_capacity(count); 14];
    for i in 0..count {
        let c = i / CHUNK_SIZE;
        let pos = position[i];
        columns[0].push(lerp(
            chunk_value("min_x", c),
            chunk_value("max_x", c),
            unpack_unorm(pos >> 21, 11),
        ) as f32);
        columns[1].push(lerp(
            chunk_value("min_y", c),
            chunk_value("max_y", c),
            unpack_unorm(pos >> 11, 10),
        ) as f32);
        columns[2].push(lerp(
            chunk_value("min_z", c),
            chunk_value("max_z", c),
            unpack_unorm(pos, 11),
        ) as f32);

        let sc = scale[i];
        columns[3].push(lerp(
            chunk_value("min_scale_x", c),
            chunk_value("max_scale_x", c),
            unpack_unorm(sc >> 21, 11),
        ) as f32);
        columns[4].push(lerp(
            chunk_value("min_scale_y", c),
            chunk_value("max_scale_y", c),
            unpack_unorm(sc >> 11, 10),
        ) as f32);
        columns[5].push(lerp(
            chunk_value("min_scale_z", c),
            chunk_value("max_scale_z", c),
            unpack_unorm(sc, 11),
        ) as f32);

        let rot = rotation[i];
        let max_index = (rot >> 30) as usize;
        let rest = [
            (unpack_unorm(rot >> 20, 10) * 2.0 - 1.0) as f64,
            (unpack_unorm(rot >> 10, 10) * 2.0 - 1.0) as f64,
            (unpack_unorm(rot, 10) * 2.0 - 1.0) as f64,
        ];
        let q = smallest_three_decode(max_index, rest);
        columns[6].push(q.w as f32);
        columns[7].push(q.i as f32);
        columns[8].push(q.j as f32);
        columns[9].push(q.k as f32);

        let col = color[i];
        let channel = |name_min: &str, name_max: &str, field: u32| -> f32 {
            let biased = lerp(
                chunk_value(name_min, c),
                chunk_value(name_max, c),
                unpack_unorm(field, 8),
            );
            ((biased - 0.5) / SH_C0) as f32
        };
        columns[10].push(channel("min_r", "max_r", col >> 24));
        columns[11].push(channel("min_g", "max_g", col >> 16));
        columns[12].push(channel("min_b", "max_b", col >> 8));
        columns[13].push(inv_sigmoid(unpack_unorm(col, 8) as f64) as f32);
    }

    let names = [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        "f_dc_0", "f_dc_1", "f_dc_2", "opacity",
    ];
    let table = DataTable::new(
        names
            .iter()
            .zip(columns)
            .map(|(name, data)| Column::f32(*name, data))
            .collect(),
    )
    .map_err(IoError::Core)?;

    Ok(Document {
        table,
        comments: file.comments.clone(),
    })
}

fn element<'a>(file: &'a PlyFile, name: &str) -> Result<&'a DataTable> {
    file.elements
        .iter()
        .find(|e| e.name == name)
        .map(|e| &e.table)
        .ok_or_else(|| IoError::MalformedInput(format!("compressed PLY lacks '{name}' element")))
}
