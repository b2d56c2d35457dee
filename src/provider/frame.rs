use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::time::TimeStamp;

/// Decoded image payload with zero-copy semantics
#[derive(Clone)]
pub struct Image {
    /// Immutable pixel data - can be shared across threads without copying
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl Image {
    pub fn new(data: Bytes, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Pixel formats we produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Luma8,
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
        }
    }
}

/// Where a frame sits in its video and which asset it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetaData {
    pub time_stamp: TimeStamp,
    pub image_name: PathBuf,
}

impl VideoMetaData {
    pub fn new(time_stamp: TimeStamp, image_name: impl Into<PathBuf>) -> Self {
        Self {
            time_stamp,
            image_name: image_name.into(),
        }
    }
}

/// A decoded frame as handed to requestors.
///
/// The image is shared rather than copied when one decode is fanned out to
/// several consumers.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<Image>,
    pub meta_data: VideoMetaData,
}

impl VideoFrame {
    pub fn new(image: Image, meta_data: VideoMetaData) -> Self {
        Self {
            image: Arc::new(image),
            meta_data,
        }
    }

    /// Time of the frame, if its stamp carries one.
    pub fn time(&self) -> Option<crate::time::Time> {
        self.meta_data.time_stamp.time
    }
}
