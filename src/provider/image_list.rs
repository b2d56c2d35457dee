//! File-backed provider over a list of still images

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::decoder;
use super::frame::{Image, PixelFormat, VideoMetaData};
use super::VideoProvider;
use crate::error::Result;
use crate::time::{Time, TimeMap, TimeStamp};

/// Serves frames from an ordered list of image files.
///
/// The list itself comes from whoever enumerated the assets; this provider
/// only checks that each file is still present when it (re)builds its frame
/// set.
pub struct ImageListProvider {
    entries: Vec<(TimeStamp, PathBuf)>,
    format: PixelFormat,
    frames: TimeMap<VideoMetaData>,
}

impl ImageListProvider {
    pub fn new(entries: Vec<(TimeStamp, PathBuf)>) -> Self {
        Self {
            entries,
            format: PixelFormat::Rgb24,
            frames: TimeMap::new(),
        }
    }

    /// Stamp `paths` as frames `1..=n` spaced `interval` microseconds apart.
    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>, interval: Time) -> Self {
        let entries = paths
            .into_iter()
            .zip(1..)
            .map(|(path, frame)| (TimeStamp::new(frame * interval, frame), path))
            .collect();
        Self::new(entries)
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    fn rebuild(&mut self) {
        self.frames.clear();
        for (stamp, path) in &self.entries {
            let Some(time) = stamp.time else {
                warn!("Skipping {} without a valid time", path.display());
                continue;
            };
            if !path.is_file() {
                warn!("Skipping missing image {}", path.display());
                continue;
            }
            self.frames
                .insert(time, VideoMetaData::new(*stamp, path.clone()));
        }
        info!(
            "Image list provides {} of {} frames",
            self.frames.len(),
            self.entries.len()
        );
    }
}

impl VideoProvider for ImageListProvider {
    fn initialize(&mut self) -> Result<()> {
        self.rebuild();
        Ok(())
    }

    fn meta_data(&self) -> &TimeMap<VideoMetaData> {
        &self.frames
    }

    fn refresh(&mut self) -> Result<()> {
        self.rebuild();
        Ok(())
    }

    fn decode(&mut self, meta: &VideoMetaData) -> Result<Image> {
        debug!("Decoding {}", meta.image_name.display());
        decoder::decode_file(&meta.image_name, self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SeekMode;

    fn write_png(dir: &std::path::Path, name: &str, shade: u8) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(2, 2, image::Rgb([shade, shade, shade]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn serves_listed_files_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", 10);
        let b = write_png(dir.path(), "b.png", 200);

        let mut provider = ImageListProvider::from_paths([a, b.clone()], 1000);
        provider.initialize().unwrap();
        assert_eq!(provider.meta_data().keys().collect::<Vec<_>>(), vec![1000, 2000]);

        let frame = provider.resolve(1800, SeekMode::Nearest).unwrap();
        assert_eq!(frame.meta_data.image_name, b);
        assert_eq!(frame.meta_data.time_stamp.frame, Some(2));
        assert_eq!(frame.image.data[0], 200);
    }

    #[test]
    fn refresh_drops_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", 10);
        let b = write_png(dir.path(), "b.png", 20);

        let mut provider = ImageListProvider::from_paths([a, b.clone()], 1000);
        provider.initialize().unwrap();
        std::fs::remove_file(&b).unwrap();
        provider.refresh().unwrap();

        assert_eq!(provider.meta_data().len(), 1);
        assert!(provider.resolve(2000, SeekMode::Exact).is_err());
    }

    #[test]
    fn decode_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let mut provider = ImageListProvider::from_paths([path], 1000);
        provider.initialize().unwrap();
        assert!(provider.resolve(1000, SeekMode::Exact).is_err());
    }
}
