//! Fan-out of one video source to many consumers
//!
//! Each consumer gets a slot. A slot remembers only its newest request; a
//! reply for anything older is dropped for that slot. Requests for the same
//! (time, mode) share one upstream request, and the reply is handed to every
//! slot still waiting on it, in registration order.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::request::{RequestId, VideoRequest, VideoRequestInfo, VideoRequestor};
use super::source::{SourceId, VideoSource};
use crate::error::{Error, Result};
use crate::pipeline::stats::{DistributorCounters, DistributorStats};
use crate::provider::VideoFrame;
use crate::time::{SeekMode, Time};
use crate::{DistributorConfig, CONFIG};

pub type ConsumerId = u64;

/// Upstream request identifier, private to one distributor.
type UpstreamId = RequestId;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

struct Slot {
    consumer: Weak<dyn VideoRequestor>,
    /// Newest request of this slot that has not been answered yet
    pending: Option<Pending>,
}

#[derive(Clone, Copy)]
struct Pending {
    upstream: UpstreamId,
    info: VideoRequestInfo,
}

struct Outstanding {
    time: Time,
    mode: SeekMode,
    generation: u64,
    waiting: Vec<ConsumerId>,
}

struct LastFrame {
    time: Time,
    mode: SeekMode,
    generation: u64,
    frame: VideoFrame,
}

#[derive(Default)]
struct State {
    slots: BTreeMap<ConsumerId, Slot>,
    outstanding: HashMap<UpstreamId, Outstanding>,
    next_upstream: UpstreamId,
    last: Option<LastFrame>,
}

/// Which slots a request is made for.
#[derive(Clone, Copy)]
enum Targets {
    One(ConsumerId),
    All,
}

enum Route {
    Join(UpstreamId),
    Cached(UpstreamId, VideoFrame),
    Upstream(UpstreamId),
}

struct Inner {
    source: Arc<VideoSource>,
    config: DistributorConfig,
    counters: DistributorCounters,
    state: Mutex<State>,
    this: Weak<Inner>,
}

/// Shares one [`VideoSource`] among any number of consumers.
///
/// Cloning yields another handle to the same distributor.
#[derive(Clone)]
pub struct VideoDistributor {
    inner: Arc<Inner>,
}

impl VideoDistributor {
    pub fn new(source: Arc<VideoSource>) -> Self {
        let config = CONFIG.load().distributor.clone();
        Self::with_config(source, config)
    }

    pub fn with_config(source: Arc<VideoSource>, config: DistributorConfig) -> Self {
        let inner = Arc::new_cyclic(|this| Inner {
            source,
            config,
            counters: DistributorCounters::default(),
            state: Mutex::new(State {
                next_upstream: 1,
                ..State::default()
            }),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn source(&self) -> &Arc<VideoSource> {
        &self.inner.source
    }

    pub fn source_id(&self) -> SourceId {
        self.inner.source.id()
    }

    /// Register a consumer. The distributor holds it weakly.
    pub fn add_consumer<R: VideoRequestor + 'static>(&self, consumer: &Arc<R>) -> ConsumerId {
        let consumer: Weak<dyn VideoRequestor> = Arc::<R>::downgrade(consumer);
        self.add_consumer_handle(consumer)
    }

    pub fn add_consumer_handle(&self, consumer: Weak<dyn VideoRequestor>) -> ConsumerId {
        let id = NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed);
        self.inner.state.lock().slots.insert(
            id,
            Slot {
                consumer,
                pending: None,
            },
        );
        debug!(source = self.source_id(), consumer = id, "Consumer added");
        id
    }

    /// Unregister a consumer. Any reply still owed to it is dropped.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> bool {
        let removed = self.inner.state.lock().slots.remove(&consumer).is_some();
        if removed {
            debug!(source = self.source_id(), consumer, "Consumer removed");
        }
        removed
    }

    pub fn consumers(&self) -> Vec<ConsumerId> {
        self.inner.state.lock().slots.keys().copied().collect()
    }

    /// Request a frame on behalf of one consumer.
    ///
    /// Supersedes any earlier request of the same consumer. `request_id` is
    /// echoed back in the consumer's reply.
    pub fn request_frame(
        &self,
        consumer: ConsumerId,
        time: Time,
        mode: SeekMode,
        request_id: RequestId,
    ) -> Result<()> {
        self.inner
            .request(Targets::One(consumer), time, mode, request_id)
            .map(|_| ())
    }

    /// Request a frame on behalf of every registered consumer.
    ///
    /// Returns the number of consumers the request was made for.
    pub fn request_all(
        &self,
        time: Time,
        mode: SeekMode,
        request_id: RequestId,
    ) -> Result<usize> {
        self.inner.request(Targets::All, time, mode, request_id)
    }

    /// Most recently delivered frame, if any.
    pub fn last_frame(&self) -> Option<VideoFrame> {
        self.inner
            .state
            .lock()
            .last
            .as_ref()
            .map(|last| last.frame.clone())
    }

    /// Number of upstream requests still awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().outstanding.len()
    }

    pub fn stats(&self) -> DistributorStats {
        self.inner.counters.snapshot()
    }
}

impl std::fmt::Debug for VideoDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDistributor")
            .field("source", &self.source_id())
            .field("consumers", &self.consumers().len())
            .finish()
    }
}

impl Inner {
    fn request(
        &self,
        targets: Targets,
        time: Time,
        mode: SeekMode,
        request_id: RequestId,
    ) -> Result<usize> {
        let generation = self.source.frames_generation();
        let info = VideoRequestInfo::new(request_id, time, mode);

        let (route, count) = {
            let mut state = self.state.lock();
            let consumers: Vec<ConsumerId> = match targets {
                Targets::One(id) if state.slots.contains_key(&id) => vec![id],
                Targets::One(id) => return Err(Error::UnknownConsumer(id)),
                Targets::All => state.slots.keys().copied().collect(),
            };
            if consumers.is_empty() {
                return Ok(0);
            }

            let route = self.route(&mut state, time, mode, generation);
            let upstream = match &route {
                Route::Join(id) | Route::Cached(id, _) | Route::Upstream(id) => *id,
            };

            for consumer in &consumers {
                self.counters.consumer_request();
                if let Some(slot) = state.slots.get_mut(consumer) {
                    slot.pending = Some(Pending { upstream, info });
                }
            }
            if let Some(outstanding) = state.outstanding.get_mut(&upstream) {
                outstanding.waiting.extend_from_slice(&consumers);
            }
            (route, consumers.len())
        };

        match route {
            Route::Join(upstream) => {
                trace!(upstream, time, "Joined outstanding request");
                self.counters.deduplicated();
            }
            Route::Cached(upstream, frame) => {
                trace!(upstream, time, "Serving last delivered frame");
                self.counters.cache_hit();
                let this = self.this.clone();
                let reply = VideoRequestInfo::new(upstream, time, mode);
                self.source.context().post(move || {
                    if let Some(inner) = this.upgrade() {
                        inner.update(&reply, Some(frame));
                    }
                });
            }
            Route::Upstream(upstream) => {
                self.counters.upstream_request();
                let requestor: Weak<dyn VideoRequestor> = self.this.clone();
                let info = VideoRequestInfo::new(upstream, time, mode);
                self.source.request_frame(VideoRequest::new(info, requestor));
            }
        }

        Ok(count)
    }

    /// Decide how a (time, mode) request is satisfied and register the
    /// upstream id it will be answered under.
    fn route(&self, state: &mut State, time: Time, mode: SeekMode, generation: u64) -> Route {
        let joinable = state.outstanding.iter().find_map(|(id, outstanding)| {
            let same = outstanding.time == time
                && outstanding.mode == mode
                && outstanding.generation == generation;
            same.then_some(*id)
        });
        if let Some(upstream) = joinable {
            return Route::Join(upstream);
        }

        let upstream = state.next_upstream;
        state.next_upstream += 1;
        state.outstanding.insert(
            upstream,
            Outstanding {
                time,
                mode,
                generation,
                waiting: Vec::new(),
            },
        );

        if self.config.reuse_last_frame {
            if let Some(last) = &state.last {
                if last.time == time && last.mode == mode && last.generation == generation {
                    return Route::Cached(upstream, last.frame.clone());
                }
            }
        }
        Route::Upstream(upstream)
    }

    /// Fan a reply out to every slot still waiting on it.
    fn deliver(&self, upstream: UpstreamId, response: Option<VideoFrame>) {
        let (deliveries, stale) = {
            let mut state = self.state.lock();
            let Some(mut outstanding) = state.outstanding.remove(&upstream) else {
                trace!(upstream, "Reply for unknown request; dropped");
                return;
            };

            if let Some(frame) = &response {
                state.last = Some(LastFrame {
                    time: outstanding.time,
                    mode: outstanding.mode,
                    generation: outstanding.generation,
                    frame: frame.clone(),
                });
            }

            outstanding.waiting.sort_unstable();
            outstanding.waiting.dedup();

            let mut deliveries = Vec::new();
            let mut stale = 0;
            let mut dead = Vec::new();
            for consumer in &outstanding.waiting {
                let Some(slot) = state.slots.get_mut(consumer) else {
                    continue;
                };
                match slot.pending {
                    Some(pending) if pending.upstream == upstream => {
                        slot.pending = None;
                        match slot.consumer.upgrade() {
                            Some(requestor) => deliveries.push((requestor, pending.info)),
                            None => dead.push(*consumer),
                        }
                    }
                    _ => stale += 1,
                }
            }
            for consumer in dead {
                trace!(consumer, "Consumer dropped; pruning slot");
                state.slots.remove(&consumer);
            }
            (deliveries, stale)
        };

        if stale > 0 {
            trace!(upstream, stale, "Superseded slots skipped");
            self.counters.stale_dropped(stale);
        }

        let mut delivered = 0;
        for (requestor, info) in deliveries {
            if response.is_none() && !info.wants_reply() {
                continue;
            }
            requestor.update(&info, response.clone());
            delivered += 1;
        }
        self.counters.delivered(delivered);
    }
}

impl VideoRequestor for Inner {
    fn update(&self, info: &VideoRequestInfo, response: Option<VideoFrame>) {
        self.deliver(info.request_id, response);
    }
}
