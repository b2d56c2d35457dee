//! Domain-scoped timestamps

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Time value in microseconds.
pub type Time = i64;

/// Index of a frame within its source.
pub type FrameIndex = i64;

/// A point in a video, addressed by time, frame index, or both.
///
/// Each component lives in a domain. Two stamps only compare on a component
/// if both carry it and both share that component's domain. Time is
/// consulted first; frame indices break ties between equal times.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeStamp {
    pub time: Option<Time>,
    pub frame: Option<FrameIndex>,
    pub time_domain: i32,
    pub frame_domain: i32,
}

impl TimeStamp {
    pub fn new(time: Time, frame: FrameIndex) -> Self {
        Self {
            time: Some(time),
            frame: Some(frame),
            ..Self::default()
        }
    }

    pub fn from_time(time: Time) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    pub fn from_frame(frame: FrameIndex) -> Self {
        Self {
            frame: Some(frame),
            ..Self::default()
        }
    }

    pub fn with_time_domain(mut self, domain: i32) -> Self {
        self.time_domain = domain;
        self
    }

    pub fn with_frame_domain(mut self, domain: i32) -> Self {
        self.frame_domain = domain;
        self
    }

    pub fn has_valid_time(&self) -> bool {
        self.time.is_some()
    }

    pub fn has_valid_frame(&self) -> bool {
        self.frame.is_some()
    }

    /// True if either component is present.
    pub fn is_valid(&self) -> bool {
        self.time.is_some() || self.frame.is_some()
    }

    fn comparable_times(&self, other: &Self) -> Option<(Time, Time)> {
        match (self.time, other.time) {
            (Some(a), Some(b)) if self.time_domain == other.time_domain => Some((a, b)),
            _ => None,
        }
    }

    fn comparable_frames(&self, other: &Self) -> Option<(FrameIndex, FrameIndex)> {
        match (self.frame, other.frame) {
            (Some(a), Some(b)) if self.frame_domain == other.frame_domain => Some((a, b)),
            _ => None,
        }
    }
}

impl PartialEq for TimeStamp {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for TimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let times = self.comparable_times(other);
        let frames = self.comparable_frames(other);

        match (times, frames) {
            (None, None) => None,
            (Some((a, b)), None) => Some(a.cmp(&b)),
            (None, Some((a, b))) => Some(a.cmp(&b)),
            (Some((ta, tb)), Some((fa, fb))) => Some(ta.cmp(&tb).then(fa.cmp(&fb))),
        }
    }
}
