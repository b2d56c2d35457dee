//! Lock-free request accounting

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

/// Point-in-time copy of a source's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub requests: usize,
    pub replies: usize,
    pub empty_replies: usize,
    pub coalesced: usize,
    pub suppressed: usize,
}

/// Point-in-time copy of a distributor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributorStats {
    pub consumer_requests: usize,
    pub upstream_requests: usize,
    pub deduplicated: usize,
    pub cache_hits: usize,
    pub stale_dropped: usize,
    pub delivered: usize,
}

#[derive(Default)]
struct SourceInner {
    requests: AtomicUsize,
    replies: AtomicUsize,
    empty_replies: AtomicUsize,
    coalesced: AtomicUsize,
    suppressed: AtomicUsize,
}

/// Counters updated from the provider thread.
#[derive(Default)]
pub struct SourceCounters {
    stats: CachePadded<SourceInner>,
}

impl SourceCounters {
    pub fn request(&self) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framesync.source.requests").increment(1);
    }

    pub fn reply(&self, with_frame: bool) {
        self.stats.replies.fetch_add(1, Ordering::Relaxed);
        if !with_frame {
            self.stats.empty_replies.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framesync.source.empty_replies").increment(1);
        }
        metrics::counter!("framesync.source.replies").increment(1);
    }

    pub fn coalesced(&self) {
        self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framesync.source.coalesced").increment(1);
    }

    pub fn suppressed(&self) {
        self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framesync.source.suppressed").increment(1);
    }

    pub fn snapshot(&self) -> SourceStats {
        SourceStats {
            requests: self.stats.requests.load(Ordering::Relaxed),
            replies: self.stats.replies.load(Ordering::Relaxed),
            empty_replies: self.stats.empty_replies.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            suppressed: self.stats.suppressed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct DistributorInner {
    consumer_requests: AtomicUsize,
    upstream_requests: AtomicUsize,
    deduplicated: AtomicUsize,
    cache_hits: AtomicUsize,
    stale_dropped: AtomicUsize,
    delivered: AtomicUsize,
}

/// Counters updated by a distributor.
#[derive(Default)]
pub struct DistributorCounters {
    stats: CachePadded<DistributorInner>,
}

impl DistributorCounters {
    pub fn consumer_request(&self) {
        self.stats.consumer_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_request(&self) {
        self.stats.upstream_requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framesync.distributor.upstream_requests").increment(1);
    }

    pub fn deduplicated(&self) {
        self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framesync.distributor.deduplicated").increment(1);
    }

    pub fn cache_hit(&self) {
        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framesync.distributor.cache_hits").increment(1);
    }

    pub fn stale_dropped(&self, count: usize) {
        self.stats.stale_dropped.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("framesync.distributor.stale_dropped").increment(count as u64);
    }

    pub fn delivered(&self, count: usize) {
        self.stats.delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DistributorStats {
        DistributorStats {
            consumer_requests: self.stats.consumer_requests.load(Ordering::Relaxed),
            upstream_requests: self.stats.upstream_requests.load(Ordering::Relaxed),
            deduplicated: self.stats.deduplicated.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            stale_dropped: self.stats.stale_dropped.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
        }
    }
}
