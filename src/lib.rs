pub mod error;
pub mod pipeline;
pub mod provider;
pub mod time;
pub mod video;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use pipeline::{Context, ContextHandle};
pub use provider::{VideoFrame, VideoMetaData, VideoProvider};
pub use time::{FrameIndex, SeekMode, Time, TimeMap, TimeStamp};
pub use video::{
    ChannelRequestor, ControllerEvent, RequestId, VideoController, VideoDistributor, VideoRequest,
    VideoRequestInfo, VideoRequestor, VideoSource, NO_REPLY,
};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub distributor: DistributorConfig,
    pub controller: ControllerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Prefix for provider thread names
    pub thread_name: String,
    /// Drop fire-and-forget requests superseded within one batch
    pub coalesce: bool,
    /// Skip fire-and-forget requests that resolve to the frame last sent
    pub suppress_repeats: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// Serve repeat requests from the most recently delivered frame
    pub reuse_last_frame: bool,
}

/// What a controller-wide seek asks of a source lacking an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekFallback {
    /// Request the exact time anyway; the source answers with no frame.
    None,
    /// Request the source's nearest frame instead.
    Nearest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub seek_fallback: SeekFallback,
    /// Seek to the first known time once frames appear and no time is set
    pub seek_to_first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            thread_name: "video-source".into(),
            coalesce: true,
            suppress_repeats: true,
        }
    }
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            reuse_last_frame: true,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            seek_fallback: SeekFallback::Nearest,
            seek_to_first: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "framesync=debug".into(),
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `FRAMESYNC_*` variables.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `FRAMESYNC_CONTROLLER__SEEK_FALLBACK=none`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("FRAMESYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.controller.seek_fallback, SeekFallback::Nearest);
        assert!(config.source.coalesce);
        assert!(config.distributor.reuse_last_frame);
        assert_eq!(config.logging.filter, "framesync=debug");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framesync.toml");
        std::fs::write(
            &path,
            "[controller]\nseek_fallback = \"none\"\n\n[source]\nthread_name = \"decoder\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.controller.seek_fallback, SeekFallback::None);
        assert!(config.controller.seek_to_first);
        assert_eq!(config.source.thread_name, "decoder");
        assert!(config.source.suppress_repeats);
    }
}
