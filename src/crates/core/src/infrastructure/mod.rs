//! Infrastructure module
//!
//! Provides low-level services: upstream client, stream transcoding, storage

pub mod storage;
pub mod transcode;
pub mod upstream;

pub use storage::SqliteStore;
pub use transcode::{FinishInfo, StreamTimeouts, TagFilter, TranscodeOptions};
pub use upstream::UpstreamClient;
