use std::path::Path;

use bytes::Bytes;
use image::DynamicImage;

use super::frame::{Image, PixelFormat};
use crate::error::{Error, Result};

/// Decode an encoded still image (PNG, JPEG) held in memory.
pub fn decode_bytes(data: &[u8], format: PixelFormat) -> Result<Image> {
    let decoded = image::load_from_memory(data)?;
    Ok(convert(decoded, format))
}

/// Decode an image file from disk.
pub fn decode_file(path: &Path, format: PixelFormat) -> Result<Image> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    let decoded = reader.decode().map_err(|e| Error::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(convert(decoded, format))
}

fn convert(decoded: DynamicImage, format: PixelFormat) -> Image {
    let (width, height) = (decoded.width(), decoded.height());
    let data = match format {
        PixelFormat::Luma8 => decoded.into_luma8().into_raw(),
        PixelFormat::Rgb24 => decoded.into_rgb8().into_raw(),
        PixelFormat::Rgba32 => decoded.into_rgba8().into_raw(),
    };
    Image::new(Bytes::from(data), width, height, format)
}
