//! OpenAI-compatible wire types
//!
//! Serialize-only shapes for the downstream surface: streaming
//! `chat.completion.chunk` events and the non-stream `chat.completion`
//! object, plus SSE framing helpers.

use bytes::Bytes;
use serde::Serialize;

/// One streaming chunk: `{id, object, created, model, choices}`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// A content delta chunk. The first chunk of a stream carries the
    /// assistant role marker.
    pub fn delta(id: &str, model: &str, content: impl Into<String>, first: bool) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: first.then(|| "assistant".to_string()),
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }

    /// A terminal chunk carrying `finish_reason` and optional final content.
    pub fn finish(id: &str, model: &str, content: Option<String>, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content,
                },
                finish_reason: Some(reason.to_string()),
            }],
        }
    }
}

/// Non-stream completion object. `usage` is always serialized as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

impl ChatCompletion {
    pub fn new(id: &str, model: &str, content: String) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: CompletionMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
            usage: None,
        }
    }
}

/// Encode one SSE record: `data: <json>\n\n`.
pub fn sse_data<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_string(value) {
        Ok(json) => Bytes::from(format!("data: {}\n\n", json)),
        // Serialize of our own types cannot fail in practice; emit a
        // well-formed empty record rather than corrupting the stream.
        Err(_) => Bytes::from_static(b"data: {}\n\n"),
    }
}

/// The stream terminator: `data: [DONE]\n\n`.
pub fn sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// A fresh SSE id base: `chatcmpl-` + 32 hex chars.
pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_chunk_shape() {
        let chunk = ChatCompletionChunk::delta("chatcmpl-1", "grok-4", "hi", true);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["index"], 0);
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["choices"][0]["delta"]["content"], "hi");
        assert_eq!(json["choices"][0]["finish_reason"], serde_json::Value::Null);
    }

    #[test]
    fn test_finish_chunk_shape() {
        let chunk = ChatCompletionChunk::finish("chatcmpl-1", "grok-4", None, "stop");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        // No content key at all when delta is empty
        assert!(json["choices"][0]["delta"].get("content").is_none());
    }

    #[test]
    fn test_sse_framing() {
        let bytes = sse_data(&serde_json::json!({"a": 1}));
        assert_eq!(&bytes[..], b"data: {\"a\":1}\n\n");
        assert_eq!(&sse_done()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn test_completion_usage_is_null() {
        let completion = ChatCompletion::new("chatcmpl-1", "grok-4", "answer".to_string());
        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["usage"], serde_json::Value::Null);
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_completion_id_is_32_hex() {
        let id = new_completion_id();
        let hex = id.strip_prefix("chatcmpl-").unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
