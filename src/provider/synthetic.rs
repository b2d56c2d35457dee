//! Generated frames for tests and demos

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::frame::{Image, PixelFormat, VideoMetaData};
use super::VideoProvider;
use crate::error::{Error, Result};
use crate::time::{Time, TimeMap, TimeStamp};

/// Provider that fabricates a solid-colour frame for each configured time.
///
/// The luma of each frame is derived from its frame index, so a consumer can
/// tell frames apart without inspecting metadata.
pub struct SyntheticProvider {
    name: String,
    times: Vec<Time>,
    late_times: Vec<Time>,
    failing: HashSet<Time>,
    delay: Option<Duration>,
    width: u32,
    height: u32,
    frames: TimeMap<VideoMetaData>,
    decodes: Arc<AtomicUsize>,
    refreshes: usize,
}

impl SyntheticProvider {
    pub fn new(name: impl Into<String>, times: impl IntoIterator<Item = Time>) -> Self {
        Self {
            name: name.into(),
            times: times.into_iter().collect(),
            late_times: Vec::new(),
            failing: HashSet::new(),
            delay: None,
            width: 4,
            height: 4,
            frames: TimeMap::new(),
            decodes: Arc::new(AtomicUsize::new(0)),
            refreshes: 0,
        }
    }

    /// Times that only become known after the first refresh.
    pub fn with_late_times(mut self, times: impl IntoIterator<Item = Time>) -> Self {
        self.late_times = times.into_iter().collect();
        self
    }

    /// Times whose decode fails.
    pub fn with_failures(mut self, times: impl IntoIterator<Item = Time>) -> Self {
        self.failing = times.into_iter().collect();
        self
    }

    /// Sleep this long in every decode.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Shared counter of completed decode attempts.
    pub fn decode_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.decodes)
    }

    fn rebuild(&mut self) {
        let mut times = self.times.clone();
        if self.refreshes > 0 {
            times.extend(self.late_times.iter().copied());
        }
        times.sort_unstable();
        times.dedup();

        self.frames = times
            .into_iter()
            .zip(1..)
            .map(|(time, frame)| {
                let name = PathBuf::from(format!("{}/{}.png", self.name, time));
                (time, VideoMetaData::new(TimeStamp::new(time, frame), name))
            })
            .collect();
    }
}

impl VideoProvider for SyntheticProvider {
    fn initialize(&mut self) -> Result<()> {
        self.rebuild();
        Ok(())
    }

    fn meta_data(&self) -> &TimeMap<VideoMetaData> {
        &self.frames
    }

    fn refresh(&mut self) -> Result<()> {
        self.refreshes += 1;
        self.rebuild();
        Ok(())
    }

    fn decode(&mut self, meta: &VideoMetaData) -> Result<Image> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.decodes.fetch_add(1, Ordering::SeqCst);

        let time = meta.time_stamp.time.unwrap_or_default();
        if self.failing.contains(&time) {
            return Err(Error::Decode {
                path: meta.image_name.clone(),
                reason: "synthetic failure".into(),
            });
        }

        let shade = (meta.time_stamp.frame.unwrap_or_default() % 256) as u8;
        let len = (self.width * self.height) as usize;
        Ok(Image::new(
            Bytes::from(vec![shade; len]),
            self.width,
            self.height,
            PixelFormat::Luma8,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SeekMode;

    #[test]
    fn frames_are_numbered_in_time_order() {
        let mut provider = SyntheticProvider::new("cam", [300, 100, 200]);
        provider.initialize().unwrap();

        let frames = crate::provider::frame_indices(provider.meta_data());
        let indexed: Vec<_> = frames.iter().map(|(t, f)| (t, *f)).collect();
        assert_eq!(indexed, vec![(100, 1), (200, 2), (300, 3)]);

        let frame = provider.resolve(210, SeekMode::Nearest).unwrap();
        assert_eq!(frame.time(), Some(200));
        assert_eq!(frame.image.data[0], 2);
        assert_eq!(frame.meta_data.image_name, PathBuf::from("cam/200.png"));
    }

    #[test]
    fn late_times_appear_after_refresh() {
        let mut provider = SyntheticProvider::new("cam", [100]).with_late_times([50]);
        provider.initialize().unwrap();
        assert_eq!(provider.meta_data().len(), 1);

        provider.refresh().unwrap();
        assert_eq!(provider.meta_data().keys().collect::<Vec<_>>(), vec![50, 100]);
    }

    #[test]
    fn configured_failures_surface_as_errors() {
        let mut provider = SyntheticProvider::new("cam", [100, 200]).with_failures([200]);
        provider.initialize().unwrap();

        assert!(provider.resolve(100, SeekMode::Exact).is_ok());
        assert!(matches!(provider.resolve(200, SeekMode::Exact), Err(Error::Decode { .. })));
        assert!(matches!(provider.resolve(150, SeekMode::Exact), Err(Error::NotFound { .. })));
        assert_eq!(provider.decode_counter().load(Ordering::SeqCst), 2);
    }
}
