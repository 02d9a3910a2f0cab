//! Lossless WebP adapter over the `image` crate.
//!
//! SOG textures must survive encode / decode byte-exact, so only the
//! lossless VP8L path is used. Calls are not interleaved across threads;
//! the writer drives one texture at a time.

use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageFormat, ImageReader};

use crate::{IoError, Result};

/// Encode an RGBA byte buffer losslessly.
pub fn encode_lossless_rgba(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if rgba.len() != (width as usize) * (height as usize) * 4 {
        return Err(IoError::CodecFailure(format!(
            "RGBA buffer of {} bytes does not match {width}x{height}",
            rgba.len()
        )));
    }
    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out)
        .encode(rgba, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| IoError::CodecFailure(format!("WebP encode: {e}")))?;
    Ok(out)
}

/// Decode any WebP into RGBA bytes plus dimensions.
pub fn decode_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let mut reader = ImageReader::new(std::io::Cursor::new(data));
    reader.set_format(ImageFormat::WebP);
    let image = reader
        .decode()
        .map_err(|e| IoError::CodecFailure(format!("WebP decode: {e}")))?;
    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((rgba.into_raw(), width, height))
}
