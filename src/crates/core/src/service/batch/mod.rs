//! Batch jobs
//!
//! Task lifecycle + pub/sub, the bounded worker pool that drives a task,
//! and the SSE bridge for live observation.

pub mod sse;
pub mod task;
pub mod worker;

pub use sse::task_sse_stream;
pub use task::{
    Attach, BatchTask, BatchTaskRegistry, RecordOutcome, Subscription, TaskEvent, TaskSnapshot,
    TaskStatus, DEFAULT_EXPIRY,
};
pub use worker::run_in_batches;
