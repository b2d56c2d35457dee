//! Consumer-facing façade over a provider thread

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use arc_swap::ArcSwap;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use super::request::{RequestId, VideoRequest, VideoRequestInfo, VideoRequestor};
use crate::error::{Error, Result};
use crate::pipeline::stats::{SourceCounters, SourceStats};
use crate::pipeline::ContextHandle;
use crate::provider::{frame_indices, VideoFrame, VideoMetaData, VideoProvider};
use crate::time::{FrameIndex, SeekMode, Time, TimeMap};
use crate::{SourceConfig, CONFIG};

pub type SourceId = u64;
pub type ObserverId = u64;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Notifications republished on the interactive context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The set of known frames changed; `frames()` has the new set.
    FramesChanged,
    /// A frame was sent in reply to `info`, resolved to `time`.
    FrameReady { info: VideoRequestInfo, time: Time },
}

type Observer = Arc<dyn Fn(SourceId, &SourceEvent) + Send + Sync>;

#[derive(Default)]
struct Snapshot {
    meta_data: TimeMap<VideoMetaData>,
    frames: TimeMap<FrameIndex>,
}

/// State shared between the façade and its provider thread.
struct Shared {
    id: SourceId,
    snapshot: ArcSwap<Snapshot>,
    ready: AtomicBool,
    generation: AtomicU64,
    refresh_pending: AtomicBool,
    /// Orders snapshot stores between `invalidate` and `publish`
    publish_lock: Mutex<()>,
    counters: SourceCounters,
    next_observer: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    subscribers: Mutex<Vec<Sender<SourceEvent>>>,
}

impl Shared {
    fn notify(&self, event: &SourceEvent) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(self.id, event);
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit(self: &Arc<Self>, context: &ContextHandle, event: SourceEvent) {
        let shared = Arc::clone(self);
        context.post(move || shared.notify(&event));
    }

    fn decline(&self, context: &ContextHandle, request: &VideoRequest) {
        if request.info.wants_reply() {
            self.counters.reply(false);
            request.send_reply(context, None);
        }
    }
}

enum Command {
    Request(VideoRequest),
    Refresh,
    Shutdown,
}

enum Worker {
    Idle {
        provider: Box<dyn VideoProvider>,
        rx: Receiver<Command>,
    },
    Running(JoinHandle<()>),
    Stopped,
}

/// A video source: one provider, one provider thread.
///
/// Every provider call happens on the provider thread; every reply and
/// notification is posted back to the interactive context. Nothing here
/// blocks waiting for the provider.
pub struct VideoSource {
    shared: Arc<Shared>,
    context: ContextHandle,
    config: SourceConfig,
    tx: Sender<Command>,
    worker: Mutex<Worker>,
    next_request_id: AtomicU64,
}

impl VideoSource {
    pub fn new(provider: impl VideoProvider, context: ContextHandle) -> Self {
        let config = CONFIG.load().source.clone();
        Self::with_config(provider, context, config)
    }

    pub fn with_config(
        provider: impl VideoProvider,
        context: ContextHandle,
        config: SourceConfig,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            refresh_pending: AtomicBool::new(false),
            publish_lock: Mutex::new(()),
            counters: SourceCounters::default(),
            next_observer: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        });

        Self {
            shared,
            context,
            config,
            tx,
            worker: Mutex::new(Worker::Idle {
                provider: Box::new(provider),
                rx,
            }),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> SourceId {
        self.shared.id
    }

    /// Context that replies and notifications are posted to.
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// Spawn the provider thread and initialize the provider there.
    ///
    /// Safe to call more than once; [`VideoSource::request_frame`] calls it on
    /// demand. Fails once the source has been stopped.
    pub fn start(&self) -> Result<()> {
        self.start_locked(&mut self.worker.lock())
    }

    fn start_locked(&self, worker: &mut Worker) -> Result<()> {
        match std::mem::replace(worker, Worker::Stopped) {
            Worker::Idle { provider, rx } => {
                let thread = ProviderThread {
                    provider,
                    shared: Arc::clone(&self.shared),
                    context: self.context.clone(),
                    config: self.config.clone(),
                    last_provided: HashMap::new(),
                };
                let handle = std::thread::Builder::new()
                    .name(format!("{}-{}", self.config.thread_name, self.shared.id))
                    .spawn(move || thread.run(rx))?;
                *worker = Worker::Running(handle);
                info!(source = self.shared.id, "Video source started");
                Ok(())
            }
            Worker::Running(handle) => {
                *worker = Worker::Running(handle);
                Ok(())
            }
            Worker::Stopped => Err(Error::SourceStopped(self.shared.id)),
        }
    }

    /// Shut down the provider thread and wait for it to exit.
    pub fn stop(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            let handle = match std::mem::replace(&mut *worker, Worker::Stopped) {
                Worker::Running(handle) => handle,
                Worker::Idle { .. } | Worker::Stopped => return,
            };
            // Sent under the lock so no request can queue behind it unseen
            let _ = self.tx.send(Command::Shutdown);
            handle
        };

        if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
            warn!(source = self.shared.id, "Provider thread panicked");
        }
        info!(source = self.shared.id, "Video source stopped");
    }

    /// True once the provider has published its first frame set since the
    /// last invalidation.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Frames currently known, keyed by time.
    pub fn frames(&self) -> TimeMap<FrameIndex> {
        self.shared.snapshot.load().frames.clone()
    }

    /// Whether a frame is known at exactly `time`.
    pub fn has_time(&self, time: Time) -> bool {
        self.shared.snapshot.load().frames.contains(time)
    }

    pub fn meta_data(&self) -> TimeMap<VideoMetaData> {
        self.shared.snapshot.load().meta_data.clone()
    }

    /// Bumped whenever the known frame set may have changed.
    pub fn frames_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Queue a request for the provider thread.
    ///
    /// The outcome only ever arrives through the requestor's `update`.
    pub fn request_frame(&self, request: VideoRequest) {
        let mut worker = self.worker.lock();
        if let Err(e) = self.start_locked(&mut worker) {
            drop(worker);
            warn!(source = self.shared.id, "Declining request: {}", e);
            self.shared.decline(&self.context, &request);
            return;
        }

        debug!(
            source = self.shared.id,
            request_id = request.info.request_id,
            time = request.info.time,
            mode = ?request.info.mode,
            "Queueing frame request"
        );

        let sent = self.tx.send(Command::Request(request));
        drop(worker);
        if let Err(err) = sent {
            warn!(source = self.shared.id, "Provider thread is gone; declining request");
            if let Command::Request(request) = err.into_inner() {
                self.shared.decline(&self.context, &request);
            }
        }
    }

    /// Request `time` under `mode` with a fresh nonzero request id.
    pub fn seek(
        &self,
        time: Time,
        mode: SeekMode,
        requestor: Weak<dyn VideoRequestor>,
    ) -> RequestId {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let info = VideoRequestInfo::new(request_id, time, mode);
        self.request_frame(VideoRequest::new(info, requestor));
        request_id
    }

    /// Request a frame by index. Returns `None` if the index is not known.
    pub fn seek_frame(
        &self,
        frame: FrameIndex,
        requestor: Weak<dyn VideoRequestor>,
    ) -> Option<RequestId> {
        let time = self
            .shared
            .snapshot
            .load()
            .frames
            .iter()
            .find(|(_, index)| **index == frame)
            .map(|(time, _)| time)?;
        Some(self.seek(time, SeekMode::Exact, requestor))
    }

    /// Drop the cached frame set and ask the provider to rebuild it.
    ///
    /// Replies already in flight are still delivered.
    pub fn invalidate(&self) {
        {
            let _publishing = self.shared.publish_lock.lock();
            self.shared.snapshot.store(Arc::new(Snapshot::default()));
            self.shared.ready.store(false, Ordering::SeqCst);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);

            if self.shared.refresh_pending.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        debug!(source = self.shared.id, "Invalidating frame set");
        if let Err(e) = self.start() {
            warn!(source = self.shared.id, "Failed to start provider thread: {}", e);
        }
        let _ = self.tx.send(Command::Refresh);
    }

    /// Stream of notifications, delivered from the interactive context.
    pub fn subscribe(&self) -> Receiver<SourceEvent> {
        let (tx, rx) = flume::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Call `observer` on the interactive context for every notification.
    pub fn on_event(
        &self,
        observer: impl Fn(SourceId, &SourceEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = self.shared.next_observer.fetch_add(1, Ordering::Relaxed);
        self.shared.observers.lock().push((id, Arc::new(observer)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.lock();
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        observers.len() != before
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSource")
            .field("id", &self.shared.id)
            .field("ready", &self.is_ready())
            .field("generation", &self.frames_generation())
            .finish()
    }
}

/// Everything that lives on the provider thread.
struct ProviderThread {
    provider: Box<dyn VideoProvider>,
    shared: Arc<Shared>,
    context: ContextHandle,
    config: SourceConfig,
    /// Last time sent to each requestor, for repeat suppression
    last_provided: HashMap<usize, (Weak<dyn VideoRequestor>, Time)>,
}

impl ProviderThread {
    fn run(mut self, rx: Receiver<Command>) {
        if let Err(e) = self.provider.initialize() {
            warn!(source = self.shared.id, "Provider failed to initialize: {}", e);
        }
        self.publish();

        while let Ok(command) = rx.recv() {
            let mut batch = vec![command];
            batch.extend(rx.try_iter());
            if self.config.coalesce {
                self.coalesce(&mut batch);
            }

            let mut batch = batch.into_iter();
            while let Some(command) = batch.next() {
                match command {
                    Command::Request(request) => self.dispatch(request),
                    Command::Refresh => self.refresh(),
                    Command::Shutdown => {
                        debug!(source = self.shared.id, "Provider thread exiting");
                        self.decline_all(batch.chain(rx.try_iter()));
                        return;
                    }
                }
            }

            self.last_provided
                .retain(|_, (requestor, _)| requestor.strong_count() > 0);
        }
    }

    /// Drop fire-and-forget requests that a later request from the same
    /// requestor supersedes. Order of the survivors is preserved.
    fn coalesce(&self, batch: &mut Vec<Command>) {
        let mut seen = HashSet::new();
        let mut keep = vec![true; batch.len()];
        for (index, command) in batch.iter().enumerate().rev() {
            if let Command::Request(request) = command {
                if !seen.insert(request.requestor_key()) && !request.info.wants_reply() {
                    keep[index] = false;
                    self.shared.counters.coalesced();
                }
            }
        }

        let mut keep = keep.into_iter();
        batch.retain(|_| keep.next().unwrap_or(true));
    }

    fn refresh(&mut self) {
        self.shared.refresh_pending.store(false, Ordering::SeqCst);
        if let Err(e) = self.provider.refresh() {
            warn!(source = self.shared.id, "Provider failed to refresh: {}", e);
        }
        self.last_provided.clear();
        self.publish();
    }

    fn publish(&self) {
        let meta_data = self.provider.meta_data().clone();
        let frames = frame_indices(&meta_data);

        {
            let _publishing = self.shared.publish_lock.lock();
            if self.shared.refresh_pending.load(Ordering::SeqCst) {
                debug!(source = self.shared.id, "Refresh queued; frame set not published");
                return;
            }
            debug!(source = self.shared.id, frames = meta_data.len(), "Publishing frame set");
            self.shared
                .snapshot
                .store(Arc::new(Snapshot { meta_data, frames }));
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.ready.store(true, Ordering::SeqCst);
        }
        self.shared.emit(&self.context, SourceEvent::FramesChanged);
    }

    #[instrument(
        skip(self, request),
        fields(source = self.shared.id, request_id = request.info.request_id)
    )]
    fn dispatch(&mut self, request: VideoRequest) {
        self.shared.counters.request();
        let info = request.info;

        if !request.requestor_alive() {
            trace!("Requestor gone; skipping request");
            return;
        }
        let key = request.requestor_key();

        let meta = match self.provider.locate(info.time, info.mode) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("Request not resolvable: {}", e);
                self.last_provided.remove(&key);
                self.decline(&request);
                return;
            }
        };
        let resolved = meta.time_stamp.time.unwrap_or(info.time);

        if self.config.suppress_repeats && !info.wants_reply() {
            if let Some((_, last)) = self.last_provided.get(&key) {
                if *last == resolved {
                    trace!(time = resolved, "Same frame as last reply; suppressed");
                    self.shared.counters.suppressed();
                    return;
                }
            }
        }

        match self.provider.decode(&meta) {
            Ok(image) => {
                let frame = VideoFrame::new(image, meta);
                self.last_provided
                    .insert(key, (request.requestor.clone(), resolved));
                self.shared.counters.reply(true);
                request.send_reply(&self.context, Some(frame));
                self.shared
                    .emit(&self.context, SourceEvent::FrameReady { info, time: resolved });
            }
            Err(e) => {
                warn!(time = resolved, "Failed to decode frame: {}", e);
                self.last_provided.remove(&key);
                self.decline(&request);
            }
        }
    }

    fn decline(&self, request: &VideoRequest) {
        self.shared.decline(&self.context, request);
    }

    /// Answer every request left behind a shutdown.
    fn decline_all(&self, commands: impl Iterator<Item = Command>) {
        for command in commands {
            if let Command::Request(request) = command {
                trace!(request_id = request.info.request_id, "Declining queued request");
                self.decline(&request);
            }
        }
    }
}
