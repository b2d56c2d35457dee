use std::path::PathBuf;

use crate::time::{SeekMode, Time};

/// Errors raised by framesync components.
///
/// Per-request failures never travel through the reply protocol; a provider
/// error becomes an empty reply at the source boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no frame at {time} for seek mode {mode:?}")]
    NotFound { time: Time, mode: SeekMode },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("video source {0} is not owned by this controller")]
    UnknownSource(u64),

    #[error("consumer slot {0} is not registered")]
    UnknownConsumer(u64),

    #[error("video source {0} has stopped")]
    SourceStopped(u64),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
