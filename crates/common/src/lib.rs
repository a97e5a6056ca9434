pub mod config;
pub mod error;
pub mod snapshot;
pub mod source;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use snapshot::SnapshotHandle;
pub use source::{CandleSource, NotificationSink};
pub use types::*;
