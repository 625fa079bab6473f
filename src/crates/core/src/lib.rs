// GrokGate Core Library - gateway business logic
// Three-layer architecture: Util -> Infrastructure -> Service

pub mod infrastructure;
pub mod service;
pub mod util;

// Re-exports for the server app
pub use infrastructure::storage::SqliteStore;
pub use infrastructure::transcode::{FinishInfo, TranscodeOptions};
pub use infrastructure::upstream::UpstreamClient;
pub use service::batch::{BatchTask, BatchTaskRegistry};
pub use service::settings::SettingsService;
pub use util::errors::{GatewayError, GatewayResult};
