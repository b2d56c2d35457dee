pub mod map;
pub mod stamp;

pub use map::{SeekMode, TimeMap};
pub use stamp::{FrameIndex, Time, TimeStamp};
