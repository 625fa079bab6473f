//! Stream transcoding
//!
//! The NDJSON -> OpenAI SSE pipeline: tag filter, wire types, asset URL
//! rewriting, and the transcoder state machine.

pub mod assets;
pub mod openai;
pub mod tag_filter;
pub mod transcoder;

pub use assets::{decode_asset_path, encode_asset_path, img_proxy_url, AssetTarget};
pub use openai::{new_completion_id, sse_data, sse_done, ChatCompletion, ChatCompletionChunk};
pub use tag_filter::TagFilter;
pub use transcoder::{collect_content, transcode, FinishInfo, StreamTimeouts, TranscodeOptions};
