pub mod context;
pub mod stats;

pub use context::{Context, ContextHandle};
pub use stats::{DistributorStats, SourceStats};
