pub mod batch;
pub mod heartbeat;

pub use batch::{DedupBatchLoader, LoadError, DEFAULT_BATCH_SIZE};
pub use heartbeat::HeartbeatMerger;
