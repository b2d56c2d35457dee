//! Provider-side capability: the worker logic behind a video source

pub mod decoder;
pub mod frame;
pub mod image_list;
pub mod synthetic;

pub use frame::{Image, PixelFormat, VideoFrame, VideoMetaData};
pub use image_list::ImageListProvider;
pub use synthetic::SyntheticProvider;

use crate::error::{Error, Result};
use crate::time::{FrameIndex, SeekMode, Time, TimeMap};

/// Worker-side logic of a video source.
///
/// Every method runs on the owning source's provider thread. Implementations
/// should defer expensive setup to [`VideoProvider::initialize`] so that
/// constructing a source never blocks the interactive context.
pub trait VideoProvider: Send + 'static {
    /// Prepare the provider; called once before the first request.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Frames the provider currently knows about, keyed by time.
    fn meta_data(&self) -> &TimeMap<VideoMetaData>;

    /// Rebuild the known frame set after an invalidation.
    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produce the image for a frame previously returned by
    /// [`VideoProvider::meta_data`].
    fn decode(&mut self, meta: &VideoMetaData) -> Result<Image>;

    /// Resolve a requested time to one of the known frames.
    fn locate(&self, time: Time, mode: SeekMode) -> Result<VideoMetaData> {
        self.meta_data()
            .find(time, mode)
            .map(|(_, meta)| meta.clone())
            .ok_or(Error::NotFound { time, mode })
    }

    /// Resolve and decode in one step.
    fn resolve(&mut self, time: Time, mode: SeekMode) -> Result<VideoFrame> {
        let meta = self.locate(time, mode)?;
        let image = self.decode(&meta)?;
        Ok(VideoFrame::new(image, meta))
    }
}

/// Frame index of every entry, keyed by time.
///
/// An entry whose stamp carries no frame index is numbered by its position
/// in the map, counting from 1.
pub fn frame_indices(meta_data: &TimeMap<VideoMetaData>) -> TimeMap<FrameIndex> {
    meta_data
        .iter()
        .zip(1..)
        .map(|((time, meta), position)| (time, meta.time_stamp.frame.unwrap_or(position)))
        .collect()
}
