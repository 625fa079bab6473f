//! Upstream Grok service integration
//!
//! Frame model for the NDJSON dialect and a thin HTTP client over it.

pub mod client;
pub mod frames;

pub use client::{UpstreamClient, UpstreamConfig};
pub use frames::GrokFrame;
