//! PLY (Polygon File Format) reading and writing.
//!
//! Headers parse up to 128 KiB terminated by `end_header`; only
//! `binary_little_endian 1.0` bodies decode. Bodies are row-interleaved and
//! move through a 1024-row buffer in both directions, so a multi-gigabyte
//! vertex element never lives in one allocation. Comments survive a read /
//! write round trip.

use std::io::{BufRead, Read, Write};

use splat_core::column::{Column, ColumnData, DataTable, ElementType};

use crate::{Document, IoError, Result};

const MAX_HEADER_BYTES: usize = 128 * 1024;
const ROW_CHUNK: usize = 1024;

/// One decoded PLY element.
#[derive(Debug, Clone)]
pub struct PlyElement {
    pub name: String,
    pub table: DataTable,
}

/// A parsed PLY file: comments plus one table per element.
#[derive(Debug, Clone)]
pub struct PlyFile {
    pub comments: Vec<String>,
    pub elements: Vec<PlyElement>,
}

struct HeaderElement {
    name: String,
    count: usize,
    properties: Vec<(String, ElementType)>,
}

fn property_type(name: &str) -> Option<ElementType> {
    match name {
        "char" | "int8" => Some(ElementType::I8),
        "uchar" | "uint8" => Some(ElementType::U8),
        "short" | "int16" => Some(ElementType::I16),
        "ushort" | "uint16" => Some(ElementType::U16),
        "int" | "int32" => Some(ElementType::I32),
        "uint" | "uint32" => Some(ElementType::U32),
        "float" | "float32" => Some(ElementType::F32),
        "double" | "float64" => Some(ElementType::F64),
        _ => None,
    }
}

fn type_name(ty: ElementType) -> &'static str {
    match ty {
        ElementType::I8 => "char",
        ElementType::U8 => "uchar",
        ElementType::I16 => "short",
        ElementType::U16 => "ushort",
        ElementType::I32 => "int",
        ElementType::U32 => "uint",
        ElementType::F32 => "float",
        ElementType::F64 => "double",
    }
}

/// Read a complete PLY file (header plus every element body).
pub fn read_ply<R: BufRead>(reader: &mut R) -> Result<PlyFile> {
    let (comments, header_elements) = read_header(reader)?;

    let mut elements = Vec::with_capacity(header_elements.len());
    for element in header_elements {
        let table = read_element_body(reader, &element)?;
        elements.push(PlyElement {
            name: element.name,
            table,
        });
    }
    Ok(PlyFile { comments, elements })
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<(Vec<String>, Vec<HeaderElement>)> {
    let mut line = String::new();
    let mut total = 0usize;

    let mut read_line = |reader: &mut R, line: &mut String| -> Result<()> {
        line.clear();
        let n = reader.read_line(line)?;
        if n == 0 {
            return Err(IoError::MalformedInput("unexpected EOF in header".into()));
        }
        total += n;
        if total > MAX_HEADER_BYTES {
            return Err(IoError::MalformedInput("header exceeds 128 KiB".into()));
        }
        Ok(())
    };

    read_line(reader, &mut line)?;
    if line.trim_end() != "ply" {
        return Err(IoError::MalformedInput("missing ply magic".into()));
    }

    let mut comments = Vec::new();
    let mut elements: Vec<HeaderElement> = Vec::new();
    let mut format_seen = false;

    loop {
        read_line(reader, &mut line)?;
        let trimmed = line.trim_end();
        if trimmed == "end_header" {
            break;
        }
        let mut parts = trimmed.split_whitespace();
        match parts.next() {
            Some("format") => {
                let kind = parts.next().unwrap_or_default();
                let version = parts.next().unwrap_or_default();
                if kind != "binary_little_endian" || version != "1.0" {
                    return Err(IoError::UnsupportedFormat(format!(
                        "PLY format '{kind} {version}' (only binary_little_endian 1.0)"
                    )));
                }
                format_seen = true;
            }
            Some("comment") => {
                let text = trimmed.strip_prefix("comment").unwrap_or_default();
                comments.push(text.strip_prefix(' ').unwrap_or(text).to_string());
            }
            Some("element") => {
                let name = parts
                    .next()
                    .ok_or_else(|| IoError::MalformedInput("element without a name".into()))?;
                let count: usize = parts
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| IoError::MalformedInput("element without a count".into()))?;
                elements.push(HeaderElement {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let ty = parts
                    .next()
                    .ok_or_else(|| IoError::MalformedInput("property without a type".into()))?;
                if ty == "list" {
                    return Err(IoError::UnsupportedFormat("list properties".into()));
                }
                let ty = property_type(ty).ok_or_else(|| {
                    IoError::MalformedInput(format!("unknown property type '{ty}'"))
                })?;
                let name = parts
                    .next()
                    .ok_or_else(|| IoError::MalformedInput("property without a name".into()))?;
                let element = elements.last_mut().ok_or_else(|| {
                    IoError::MalformedInput("property before any element".into())
                })?;
                element.properties.push((name.to_string(), ty));
            }
            Some("obj_info") | None => {}
            Some(other) => {
                return Err(IoError::MalformedInput(format!(
                    "unknown header keyword '{other}'"
                )))
            }
        }
    }

    if !format_seen {
        return Err(IoError::MalformedInput("header without a format line".into()));
    }
    if elements.is_empty() {
        return Err(IoError::MalformedInput("header without elements".into()));
    }
    Ok((comments, elements))
}

fn decode_into(data: &mut ColumnData, row: usize, bytes: &[u8]) {
    match data {
        ColumnData::I8(v) => v[row] = bytes[0] as i8,
        ColumnData::U8(v) => v[row] = bytes[0],
        ColumnData::I16(v) => v[row] = i16::from_le_bytes([bytes[0], bytes[1]]),
        ColumnData::U16(v) => v[row] = u16::from_le_bytes([bytes[0], bytes[1]]),
        ColumnData::I32(v) => v[row] = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ColumnData::U32(v) => v[row] = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ColumnData::F32(v) => v[row] = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ColumnData::F64(v) => {
            v[row] = f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])
        }
    }
}

fn encode_from(data: &ColumnData, row: usize, out: &mut Vec<u8>) {
    match data {
        ColumnData::I8(v) => out.push(v[row] as u8),
        ColumnData::U8(v) => out.push(v[row]),
        ColumnData::I16(v) => out.extend_from_slice(&v[row].to_le_bytes()),
        ColumnData::U16(v) => out.extend_from_slice(&v[row].to_le_bytes()),
        ColumnData::I32(v) => out.extend_from_slice(&v[row].to_le_bytes()),
        ColumnData::U32(v) => out.extend_from_slice(&v[row].to_le_bytes()),
        ColumnData::F32(v) => out.extend_from_slice(&v[row].to_le_bytes()),
        ColumnData::F64(v) => out.extend_from_slice(&v[row].to_le_bytes()),
    }
}

fn read_element_body<R: Read>(reader: &mut R, element: &HeaderElement) -> Result<DataTable> {
    if element.properties.is_empty() {
        return Err(IoError::MalformedInput(format!(
            "element '{}' has no properties",
            element.name
        )));
    }
    let row_size: usize = element.properties.iter().map(|(_, ty)| ty.size()).sum();

    let mut columns: Vec<Column> = element
        .properties
        .iter()
        .map(|(name, ty)| Column::zeroed(name.clone(), *ty, element.count))
        .collect();

    let mut buffer = vec![0u8; row_size * ROW_CHUNK.min(element.count.max(1))];
    let mut row = 0usize;
    while row < element.count {
        let rows_now = ROW_CHUNK.min(element.count - row);
        let chunk = &mut buffer[..rows_now * row_size];
        reader.read_exact(chunk).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                IoError::MalformedInput(format!(
                    "short read in element '{}' body",
                    element.name
                ))
            } else {
                IoError::Io(e)
            }
        })?;

        for r in 0..rows_now {
            let mut offset = r * row_size;
            for (slot, (_, ty)) in element.properties.iter().enumerate() {
                decode_into(
                    &mut columns[slot].data,
                    row + r,
                    &chunk[offset..offset + ty.size()],
                );
                offset += ty.size();
            }
        }
        row += rows_now;
    }

    DataTable::new(columns).map_err(IoError::Core)
}

/// Emit a complete PLY file.
pub fn write_ply<W: Write>(writer: &mut W, file: &PlyFile) -> Result<()> {
    writer.write_all(b"ply\nformat binary_little_endian 1.0\n")?;
    for comment in &file.comments {
        writeln!(writer, "comment {comment}")?;
    }
    for element in &file.elements {
        writeln!(
            writer,
            "element {} {}",
            element.name,
            element.table.num_rows()
        )?;
        for col in element.table.columns() {
            writeln!(writer, "property {} {}", type_name(col.element_type()), col.name())?;
        }
    }
    writer.write_all(b"end_header\n")?;

    for element in &file.elements {
        write_element_body(writer, &element.table)?;
    }
    Ok(())
}

fn write_element_body<W: Write>(writer: &mut W, table: &DataTable) -> Result<()> {
    let row_size: usize = table
        .columns()
        .iter()
        .map(|c| c.element_type().size())
        .sum();
    let mut buffer: Vec<u8> = Vec::with_capacity(row_size * ROW_CHUNK);

    let count = table.num_rows();
    let mut row = 0usize;
    while row < count {
        let rows_now = ROW_CHUNK.min(count - row);
        buffer.clear();
        for r in row..row + rows_now {
            for col in table.columns() {
                encode_from(&col.data, r, &mut buffer);
            }
        }
        writer.write_all(&buffer)?;
        row += rows_now;
    }
    Ok(())
}

/// Interpret a parsed PLY as a splat document: a single `vertex` element.
pub fn into_document(file: PlyFile) -> Result<Document> {
    let PlyFile { comments, elements } = file;
    let mut iter = elements.into_iter();
    match (iter.next(), iter.next()) {
        (Some(element), None) if element.name == "vertex" => Ok(Document {
            table: element.table,
            comments,
        }),
        _ => Err(IoError::MalformedInput(
            "expected a single vertex element".into(),
        )),
    }
}

/// Emit a document as a plain single-element PLY.
pub fn write_document<W: Write>(writer: &mut W, doc: &Document) -> Result<()> {
    let file = PlyFile {
        comments: doc.comments.clone(),
        elements: vec![PlyElement {
            name: "vertex".to_string(),
            table: doc.table.clone(),
        }],
    };
    write_ply(writer, &file)
}
