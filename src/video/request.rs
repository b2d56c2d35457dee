//! Request/reply protocol between consumers and video sources

use std::sync::{Arc, Weak};

use flume::{Receiver, Sender};
use tracing::trace;

use crate::pipeline::ContextHandle;
use crate::provider::VideoFrame;
use crate::time::{SeekMode, Time};

/// Correlates a reply with the request that produced it.
pub type RequestId = u64;

/// Request identifier meaning "no reply expected unless a frame is found".
pub const NO_REPLY: RequestId = 0;

/// Identifying fields of a request, attached to every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoRequestInfo {
    pub request_id: RequestId,
    pub time: Time,
    pub mode: SeekMode,
}

impl VideoRequestInfo {
    pub fn new(request_id: RequestId, time: Time, mode: SeekMode) -> Self {
        Self {
            request_id,
            time,
            mode,
        }
    }

    /// Whether a failed request still owes the requestor an empty reply.
    pub fn wants_reply(&self) -> bool {
        self.request_id != NO_REPLY
    }
}

/// Anything that consumes frame replies.
///
/// `update` always runs on the interactive context. `None` means the
/// request could not be satisfied.
pub trait VideoRequestor: Send + Sync {
    fn update(&self, info: &VideoRequestInfo, response: Option<VideoFrame>);
}

/// A complete request: what to fetch and whom to answer.
///
/// The requestor is held weakly; a reply to a requestor that has since been
/// dropped is discarded.
#[derive(Clone)]
pub struct VideoRequest {
    pub info: VideoRequestInfo,
    pub requestor: Weak<dyn VideoRequestor>,
}

impl VideoRequest {
    pub fn new(info: VideoRequestInfo, requestor: Weak<dyn VideoRequestor>) -> Self {
        Self { info, requestor }
    }

    /// Stable identity of the requestor, for per-requestor bookkeeping.
    pub fn requestor_key(&self) -> usize {
        self.requestor.as_ptr() as *const () as usize
    }

    pub fn requestor_alive(&self) -> bool {
        self.requestor.strong_count() > 0
    }

    /// Post the reply to the requestor's context.
    ///
    /// Returns false if the context is gone.
    pub fn send_reply(&self, context: &ContextHandle, response: Option<VideoFrame>) -> bool {
        let requestor = self.requestor.clone();
        let info = self.info;
        context.post(move || match requestor.upgrade() {
            Some(requestor) => requestor.update(&info, response),
            None => trace!(request_id = info.request_id, "Requestor gone; reply dropped"),
        })
    }
}

impl std::fmt::Debug for VideoRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoRequest")
            .field("info", &self.info)
            .field("requestor_alive", &self.requestor_alive())
            .finish()
    }
}

/// Weak handle suitable for [`VideoRequest::requestor`].
pub fn requestor_handle<R>(requestor: &Arc<R>) -> Weak<dyn VideoRequestor>
where
    R: VideoRequestor + 'static,
{
    let weak: Weak<dyn VideoRequestor> = Arc::<R>::downgrade(requestor);
    weak
}

/// A reply as forwarded by [`ChannelRequestor`].
#[derive(Debug, Clone)]
pub struct VideoReply {
    pub info: VideoRequestInfo,
    pub frame: Option<VideoFrame>,
}

/// Requestor that forwards every reply into a channel.
///
/// Handy for consumers that prefer pulling replies over implementing
/// [`VideoRequestor`] themselves.
pub struct ChannelRequestor {
    tx: Sender<VideoReply>,
}

impl ChannelRequestor {
    pub fn new() -> (Arc<Self>, Receiver<VideoReply>) {
        let (tx, rx) = flume::unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl VideoRequestor for ChannelRequestor {
    fn update(&self, info: &VideoRequestInfo, response: Option<VideoFrame>) {
        let _ = self.tx.send(VideoReply {
            info: *info,
            frame: response,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Context;

    #[test]
    fn reply_is_delivered_on_the_context() {
        let context = Context::new();
        let (requestor, replies) = ChannelRequestor::new();
        let request = VideoRequest::new(
            VideoRequestInfo::new(7, 100, SeekMode::Exact),
            requestor_handle(&requestor),
        );

        assert!(request.send_reply(&context.handle(), None));
        assert!(replies.try_recv().is_err());

        context.process_events();
        let reply = replies.try_recv().unwrap();
        assert_eq!(reply.info, request.info);
        assert!(reply.frame.is_none());
    }

    #[test]
    fn reply_to_dropped_requestor_is_discarded() {
        let context = Context::new();
        let (requestor, replies) = ChannelRequestor::new();
        let request = VideoRequest::new(
            VideoRequestInfo::new(1, 0, SeekMode::Nearest),
            requestor_handle(&requestor),
        );
        drop(requestor);

        assert!(!request.requestor_alive());
        request.send_reply(&context.handle(), None);
        assert_eq!(context.process_events(), 1);
        assert!(replies.try_recv().is_err());
    }

    #[test]
    fn zero_id_does_not_want_a_reply() {
        assert!(!VideoRequestInfo::new(NO_REPLY, 0, SeekMode::Exact).wants_reply());
        assert!(VideoRequestInfo::new(3, 0, SeekMode::Exact).wants_reply());
    }
}
