pub mod controller;
pub mod distributor;
pub mod request;
pub mod source;

pub use controller::{ControllerEvent, VideoController};
pub use distributor::{ConsumerId, VideoDistributor};
pub use request::{
    requestor_handle, ChannelRequestor, RequestId, VideoReply, VideoRequest, VideoRequestInfo,
    VideoRequestor, NO_REPLY,
};
pub use source::{ObserverId, SourceEvent, SourceId, VideoSource};
