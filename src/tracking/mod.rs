pub mod store;
pub mod types;

pub use store::{Selector, TrackingStore};
pub use types::{FilePatch, TrackedFile, TrackingError};
