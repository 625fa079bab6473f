//! Service layer
//!
//! Business services composed by the server: settings, batch tasks,
//! request logs, refresh progress, token pool.

pub mod batch;
pub mod logs;
pub mod progress;
pub mod settings;
pub mod tokens;

pub use batch::{BatchTask, BatchTaskRegistry};
pub use logs::RequestLogStore;
pub use progress::RefreshProgressStore;
pub use settings::SettingsService;
pub use tokens::TokenPool;
