//! STORE-only ZIP container for `.sog` bundles.
//!
//! Writing uses general-purpose bit 3: local headers carry zero sizes and
//! CRC, a data descriptor follows each entry, and the central directory is
//! emitted before close. Reading locates the end-of-central-directory
//! record and lists entries from the central directory; only method 0 is
//! accepted. No encryption, no spans.

use std::io::Write;

use crate::{IoError, Result};

const LOCAL_HEADER_SIG: u32 = 0x04034b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x08074b50;
const CENTRAL_DIR_SIG: u32 = 0x02014b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054b50;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

struct EntryRecord {
    name: String,
    crc: u32,
    size: u64,
    offset: u64,
}

/// Sequential STORE-only writer.
pub struct ZipWriter<W: Write> {
    inner: W,
    written: u64,
    entries: Vec<EntryRecord>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            entries: Vec::new(),
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Append one stored file.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let offset = self.written;
        let mut crc = flate2::Crc::new();
        crc.update(data);
        let crc = crc.sum();

        let name_bytes = name.as_bytes();
        let mut header = Vec::with_capacity(30 + name_bytes.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&20u16.to_le_bytes()); // version needed
        header.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // method: store
        header.extend_from_slice(&0u32.to_le_bytes()); // mod time/date
        header.extend_from_slice(&0u32.to_le_bytes()); // crc (deferred)
        header.extend_from_slice(&0u32.to_le_bytes()); // compressed size
        header.extend_from_slice(&0u32.to_le_bytes()); // uncompressed size
        header.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // extra length
        header.extend_from_slice(name_bytes);
        self.emit(&header)?;
        self.emit(data)?;

        let mut descriptor = Vec::with_capacity(16);
        descriptor.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        descriptor.extend_from_slice(&crc.to_le_bytes());
        descriptor.extend_from_slice(&(data.len() as u32).to_le_bytes());
        descriptor.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.emit(&descriptor)?;

        self.entries.push(EntryRecord {
            name: name.to_string(),
            crc,
            size: data.len() as u64,
            offset,
        });
        Ok(())
    }

    /// Emit the central directory and finish the archive.
    pub fn finish(mut self) -> Result<W> {
        let dir_offset = self.written;
        let mut dir = Vec::new();
        for entry in &self.entries {
            dir.extend_from_slice(&CENTRAL_DIR_SIG.to_le_bytes());
            dir.extend_from_slice(&20u16.to_le_bytes()); // made by
            dir.extend_from_slice(&20u16.to_le_bytes()); // needed
            dir.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
            dir.extend_from_slice(&0u16.to_le_bytes()); // store
            dir.extend_from_slice(&0u32.to_le_bytes()); // time/date
            dir.extend_from_slice(&entry.crc.to_le_bytes());
            dir.extend_from_slice(&(entry.size as u32).to_le_bytes());
            dir.extend_from_slice(&(entry.size as u32).to_le_bytes());
            dir.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            dir.extend_from_slice(&0u16.to_le_bytes()); // extra
            dir.extend_from_slice(&0u16.to_le_bytes()); // comment
            dir.extend_from_slice(&0u16.to_le_bytes()); // disk start
            dir.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            dir.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            dir.extend_from_slice(&(entry.offset as u32).to_le_bytes());
            dir.extend_from_slice(entry.name.as_bytes());
        }
        let dir_size = dir.len() as u64;
        self.emit(&dir)?;

        let count = self.entries.len() as u16;
        let mut end = Vec::with_capacity(22);
        end.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        end.extend_from_slice(&0u16.to_le_bytes()); // this disk
        end.extend_from_slice(&0u16.to_le_bytes()); // dir disk
        end.extend_from_slice(&count.to_le_bytes());
        end.extend_from_slice(&count.to_le_bytes());
        end.extend_from_slice(&(dir_size as u32).to_le_bytes());
        end.extend_from_slice(&(dir_offset as u32).to_le_bytes());
        end.extend_from_slice(&0u16.to_le_bytes()); // comment length
        self.emit(&end)?;
        Ok(self.inner)
    }
}

/// One listed archive member.
pub struct ZipEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Parse a STORE-only archive from memory.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<ZipEntry>> {
    let eocd = find_end_of_central_dir(bytes)?;
    let count = u16_at(bytes, eocd + 10)? as usize;
    let dir_offset = u32_at(bytes, eocd + 16)? as usize;

    let mut entries = Vec::with_capacity(count);
    let mut cursor = dir_offset;
    for _ in 0..count {
        if u32_at(bytes, cursor)? != CENTRAL_DIR_SIG {
            return Err(IoError::CodecFailure("bad central directory entry".into()));
        }
        let method = u16_at(bytes, cursor + 10)?;
        if method != 0 {
            return Err(IoError::CodecFailure(format!(
                "unsupported ZIP method {method} (STORE only)"
            )));
        }
        let size = u32_at(bytes, cursor + 24)? as usize;
        let name_len = u16_at(bytes, cursor + 28)? as usize;
        let extra_len = u16_at(bytes, cursor + 30)? as usize;
        let comment_len = u16_at(bytes, cursor + 32)? as usize;
        let local_offset = u32_at(bytes, cursor + 42)? as usize;
        let name = String::from_utf8(
            bytes
                .get(cursor + 46..cursor + 46 + name_len)
                .ok_or_else(|| IoError::CodecFailure("truncated central directory".into()))?
                .to_vec(),
        )
        .map_err(|_| IoError::CodecFailure("entry name is not UTF-8".into()))?;

        // The local header repeats the name and may carry its own extra
        // field; the data begins after both.
        if u32_at(bytes, local_offset)? != LOCAL_HEADER_SIG {
            return Err(IoError::CodecFailure("bad local header".into()));
        }
        let local_name_len = u16_at(bytes, local_offset + 26)? as usize;
        let local_extra_len = u16_at(bytes, local_offset + 28)? as usize;
        let data_start = local_offset + 30 + local_name_len + local_extra_len;
        let data = bytes
            .get(data_start..data_start + size)
            .ok_or_else(|| IoError::CodecFailure("entry data out of bounds".into()))?
            .to_vec();

        entries.push(ZipEntry { name, data });
        cursor += 46 + name_len + extra_len + comment_len;
    }
    Ok(entries)
}

fn find_end_of_central_dir(bytes: &[u8]) -> Result<usize> {
    let min = bytes.len().saturating_sub(22 + 65536);
    let mut i = bytes.len().saturating_sub(22);
    loop {
        if u32_at(bytes, i)? == END_OF_CENTRAL_DIR_SIG {
            return Ok(i);
        }
        if i == min {
            return Err(IoError::CodecFailure(
                "missing end-of-central-directory record".into(),
            ));
        }
        i -= 1;
    }
}

fn u16_at(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| IoError::CodecFailure("truncated ZIP record".into()))
}

fn u32_at(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| IoError::CodecFailure("truncated ZIP record".into()))
}
