//! Global playhead over several independently timed sources

use std::collections::BTreeMap;
use std::sync::Arc;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::distributor::{ConsumerId, VideoDistributor};
use super::request::{RequestId, VideoRequestor, NO_REPLY};
use super::source::{ObserverId, SourceEvent, SourceId, VideoSource};
use crate::error::{Error, Result};
use crate::time::{SeekMode, Time, TimeMap};
use crate::{ControllerConfig, SeekFallback, CONFIG};

/// Notifications published by a [`VideoController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The playhead moved to `time`; `request_id` is the caller's tag.
    TimeSelected { time: Time, request_id: RequestId },
    SourcesChanged,
    TimesChanged,
}

struct Entry {
    source: Arc<VideoSource>,
    distributor: VideoDistributor,
    observer: ObserverId,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<SourceId, Entry>,
    time: Option<Time>,
    times: TimeMap<()>,
    /// Source generations the cached union was built from
    times_key: Vec<(SourceId, u64)>,
}

impl State {
    fn update_times(&mut self) {
        let key: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.source.frames_generation()))
            .collect();
        if key == self.times_key {
            return;
        }

        let mut times = TimeMap::new();
        for entry in self.entries.values() {
            times.insert_all(&entry.source.frames().key_map());
        }
        debug!(sources = key.len(), times = times.len(), "Rebuilt global times");
        self.times = times;
        self.times_key = key;
    }
}

struct Shared {
    config: ControllerConfig,
    state: Mutex<State>,
    subscribers: Mutex<Vec<Sender<ControllerEvent>>>,
}

/// Owns a distributor per source and drives them from one logical time.
pub struct VideoController {
    shared: Arc<Shared>,
}

impl Default for VideoController {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoController {
    pub fn new() -> Self {
        let config = CONFIG.load().controller.clone();
        Self::with_config(config)
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn video_sources(&self) -> Vec<SourceId> {
        self.shared.state.lock().entries.keys().copied().collect()
    }

    pub fn source(&self, id: SourceId) -> Option<Arc<VideoSource>> {
        let state = self.shared.state.lock();
        state.entries.get(&id).map(|entry| Arc::clone(&entry.source))
    }

    pub fn distributor(&self, id: SourceId) -> Option<VideoDistributor> {
        let state = self.shared.state.lock();
        state.entries.get(&id).map(|entry| entry.distributor.clone())
    }

    /// Take charge of `source` and return the distributor made for it.
    ///
    /// Adding a source twice returns the existing distributor.
    pub fn add_video_source(&self, source: Arc<VideoSource>) -> VideoDistributor {
        let id = source.id();
        {
            let state = self.shared.state.lock();
            if let Some(entry) = state.entries.get(&id) {
                return entry.distributor.clone();
            }
        }

        let weak = Arc::downgrade(&self.shared);
        let observer = source.on_event(move |id, event| {
            if let (Some(shared), SourceEvent::FramesChanged) = (weak.upgrade(), event) {
                shared.frames_changed(id);
            }
        });

        let distributor = VideoDistributor::new(Arc::clone(&source));
        self.shared.state.lock().entries.insert(
            id,
            Entry {
                source: Arc::clone(&source),
                distributor: distributor.clone(),
                observer,
            },
        );

        if let Err(e) = source.start() {
            warn!(source = id, "Failed to start video source: {}", e);
        }
        info!(source = id, "Video source added");

        self.shared.emit(ControllerEvent::SourcesChanged);
        self.shared.emit(ControllerEvent::TimesChanged);
        distributor
    }

    /// Release a source and its distributor.
    ///
    /// Removing a source this controller does not own is a caller error.
    pub fn remove_video_source(&self, id: SourceId) -> Result<()> {
        let entry = {
            let mut state = self.shared.state.lock();
            let entry = state.entries.remove(&id).ok_or(Error::UnknownSource(id))?;
            if state.entries.is_empty() {
                state.time = None;
            }
            entry
        };

        entry.source.remove_observer(entry.observer);
        info!(source = id, "Video source removed");

        self.shared.emit(ControllerEvent::SourcesChanged);
        self.shared.emit(ControllerEvent::TimesChanged);
        Ok(())
    }

    /// Register a consumer on a source's distributor.
    ///
    /// If the playhead is set, the consumer is immediately sent the frame for
    /// the current time.
    pub fn add_consumer<R: VideoRequestor + 'static>(
        &self,
        id: SourceId,
        consumer: &Arc<R>,
    ) -> Result<ConsumerId> {
        let (distributor, source, time) = {
            let state = self.shared.state.lock();
            let entry = state.entries.get(&id).ok_or(Error::UnknownSource(id))?;
            (entry.distributor.clone(), Arc::clone(&entry.source), state.time)
        };

        let slot = distributor.add_consumer(consumer);
        if let Some(time) = time {
            let mode = self.shared.mode_for(&source, time);
            distributor.request_frame(slot, time, mode, NO_REPLY)?;
        }
        Ok(slot)
    }

    /// Union of every source's known times.
    pub fn times(&self) -> TimeMap<()> {
        let mut state = self.shared.state.lock();
        state.update_times();
        state.times.clone()
    }

    /// Current playhead, if one has been selected.
    pub fn time(&self) -> Option<Time> {
        self.shared.state.lock().time
    }

    /// Move the playhead to `time`.
    ///
    /// Each source is asked for its exact frame; a source without one falls
    /// back per [`ControllerConfig::seek_fallback`].
    pub fn seek(&self, time: Time, request_id: RequestId) {
        self.shared.seek(time, None, request_id);
    }

    /// Move the playhead to the known time nearest `time`, asking every
    /// source for its nearest frame.
    pub fn seek_nearest(&self, time: Time, request_id: RequestId) {
        let target = {
            let mut state = self.shared.state.lock();
            state.update_times();
            state.times.find_key(time, SeekMode::Nearest).unwrap_or(time)
        };
        self.shared.seek(target, Some(SeekMode::Nearest), request_id);
    }

    /// Step to the next known time. Returns false at the end.
    pub fn next_frame(&self, request_id: RequestId) -> bool {
        self.step(SeekMode::Next, request_id)
    }

    /// Step to the previous known time. Returns false at the start.
    pub fn previous_frame(&self, request_id: RequestId) -> bool {
        self.step(SeekMode::Previous, request_id)
    }

    fn step(&self, mode: SeekMode, request_id: RequestId) -> bool {
        let target = {
            let mut state = self.shared.state.lock();
            state.update_times();
            let from = state.time.unwrap_or(Time::MIN);
            state.times.find_key(from, mode)
        };

        match target {
            Some(time) => {
                self.shared.seek(time, None, request_id);
                true
            }
            None => {
                debug!(?mode, "No frame to step to");
                false
            }
        }
    }

    /// Stream of controller notifications.
    pub fn subscribe(&self) -> Receiver<ControllerEvent> {
        let (tx, rx) = flume::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }
}

impl Drop for VideoController {
    fn drop(&mut self) {
        let state = self.shared.state.lock();
        for entry in state.entries.values() {
            entry.source.remove_observer(entry.observer);
        }
    }
}

impl Shared {
    fn emit(&self, event: ControllerEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn mode_for(&self, source: &VideoSource, time: Time) -> SeekMode {
        if source.has_time(time) {
            return SeekMode::Exact;
        }
        match self.config.seek_fallback {
            SeekFallback::None => SeekMode::Exact,
            SeekFallback::Nearest => SeekMode::Nearest,
        }
    }

    fn seek(&self, time: Time, forced: Option<SeekMode>, request_id: RequestId) {
        let targets: Vec<_> = {
            let mut state = self.state.lock();
            if state.time == Some(time) && request_id == NO_REPLY {
                return;
            }
            state.time = Some(time);
            state
                .entries
                .values()
                .map(|entry| {
                    let mode = forced.unwrap_or_else(|| self.mode_for(&entry.source, time));
                    (entry.distributor.clone(), mode)
                })
                .collect()
        };

        debug!(time, request_id, "Time selected");
        self.emit(ControllerEvent::TimeSelected { time, request_id });

        for (distributor, mode) in targets {
            if let Err(e) = distributor.request_all(time, mode, request_id) {
                warn!(source = distributor.source_id(), "Failed to request frame: {}", e);
            }
        }
    }

    /// Runs on the interactive context when a source publishes frames.
    fn frames_changed(self: Arc<Self>, id: SourceId) {
        debug!(source = id, "Source frames changed");
        self.emit(ControllerEvent::TimesChanged);

        if !self.config.seek_to_first {
            return;
        }
        let first = {
            let mut state = self.state.lock();
            if state.time.is_some() || !state.entries.contains_key(&id) {
                return;
            }
            state.update_times();
            state.times.first().map(|(time, _)| time)
        };
        if let Some(time) = first {
            self.seek(time, None, NO_REPLY);
        }
    }
}
