//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use framesync::provider::{SyntheticProvider, VideoFrame};
use framesync::video::{VideoReply, VideoRequestInfo, VideoRequestor};
use framesync::{Context, SourceConfig, VideoSource};
use parking_lot::Mutex;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn source(context: &Context, provider: SyntheticProvider) -> Arc<VideoSource> {
    Arc::new(VideoSource::with_config(
        provider,
        context.handle(),
        SourceConfig::default(),
    ))
}

/// Start `source` and run the context until its frames are published.
pub fn ready(context: &Context, source: &VideoSource) {
    source.start().unwrap();
    assert!(context.process_until(TIMEOUT, || source.is_ready()));
}

/// Run the context until `count` replies have arrived on `rx`.
pub fn replies(
    context: &Context,
    rx: &flume::Receiver<VideoReply>,
    count: usize,
) -> Vec<VideoReply> {
    let mut received = Vec::new();
    context.process_until(TIMEOUT, || {
        received.extend(rx.try_iter());
        received.len() >= count
    });
    assert_eq!(received.len(), count, "unexpected reply count");
    received
}

/// Requestor that appends every reply, tagged, to a shared log.
pub struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<(&'static str, VideoRequestInfo, Option<VideoFrame>)>>>,
}

pub type RecordLog = Arc<Mutex<Vec<(&'static str, VideoRequestInfo, Option<VideoFrame>)>>>;

impl Recorder {
    pub fn new(name: &'static str, log: &RecordLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
        })
    }
}

impl VideoRequestor for Recorder {
    fn update(&self, info: &VideoRequestInfo, response: Option<VideoFrame>) {
        self.log.lock().push((self.name, *info, response));
    }
}
