pub mod export;
pub mod pattern;
pub mod retire;
pub mod runner;

pub use export::{ExportError, ExportStatus, FileExporter};
pub use pattern::FilePattern;
pub use retire::{RetireError, RetireOutcome, RetirementManager};
pub use runner::{Watcher, WatcherConfig, WatcherError, WatcherHandle};
