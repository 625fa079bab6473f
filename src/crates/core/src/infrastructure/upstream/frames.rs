//! Grok NDJSON frame model
//!
//! One frame per newline-terminated JSON line. Frames are heterogeneous:
//! every recognized shape is an optional field and unknown shapes are
//! dropped by serde. Parse failures are handled by the caller (skipped
//! without aborting the stream).

use serde::Deserialize;

/// One upstream NDJSON frame.
#[derive(Debug, Default, Deserialize)]
pub struct GrokFrame {
    pub error: Option<FrameError>,
    pub result: Option<FrameResult>,
}

/// Terminal upstream failure carried inside a frame.
#[derive(Debug, Deserialize)]
pub struct FrameError {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FrameResult {
    pub response: Option<ResponseEnvelope>,
}

/// Nested envelope holding zero or more of the recognized shapes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub user_response: Option<UserResponse>,
    /// Text delta: string or array. Arrays are ignored in text mode;
    /// upstream semantics of arrays are undocumented.
    pub token: Option<serde_json::Value>,
    pub is_thinking: Option<bool>,
    /// Layout hint; value `"header"` wraps the delta in blank lines.
    pub message_tag: Option<String>,
    /// Presence switches the stream into image mode.
    pub image_attachment_info: Option<serde_json::Value>,
    pub model_response: Option<ModelResponse>,
    pub streaming_video_generation_response: Option<VideoGenerationUpdate>,
    pub tool_usage_card_id: Option<serde_json::Value>,
    pub web_search_results: Option<WebSearchResults>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub model: Option<String>,
}

/// Non-stream completion fields plus terminal image URLs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub model: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub generated_image_urls: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerationUpdate {
    pub progress: Option<i64>,
    pub video_url: Option<String>,
    pub thumbnail_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchResults {
    pub results: Option<Vec<WebSearchResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchResult {
    pub title: Option<String>,
    pub url: Option<String>,
    pub preview: Option<String>,
}

impl GrokFrame {
    /// Parse a single NDJSON line. `None` on parse failure.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    pub fn response(&self) -> Option<&ResponseEnvelope> {
        self.result.as_ref().and_then(|r| r.response.as_ref())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.message.as_deref())
    }
}

impl ResponseEnvelope {
    /// The text delta, only when upstream sent a plain string token.
    pub fn token_str(&self) -> Option<&str> {
        match &self.token {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_frame() {
        let frame = GrokFrame::parse(r#"{"result":{"response":{"token":"hello","isThinking":false}}}"#)
            .expect("frame should parse");
        let resp = frame.response().expect("envelope present");
        assert_eq!(resp.token_str(), Some("hello"));
        assert_eq!(resp.is_thinking, Some(false));
    }

    #[test]
    fn test_array_token_is_not_a_string() {
        let frame = GrokFrame::parse(r#"{"result":{"response":{"token":["a","b"]}}}"#).unwrap();
        assert_eq!(frame.response().unwrap().token_str(), None);
    }

    #[test]
    fn test_parse_failure_is_none() {
        assert!(GrokFrame::parse("not json").is_none());
        assert!(GrokFrame::parse("").is_none());
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let frame = GrokFrame::parse(r#"{"result":{"response":{"somethingNew":1,"token":"x"}}}"#)
            .expect("unknown fields must not fail the frame");
        assert_eq!(frame.response().unwrap().token_str(), Some("x"));
    }

    #[test]
    fn test_error_frame() {
        let frame = GrokFrame::parse(r#"{"error":{"message":"quota exceeded"}}"#).unwrap();
        assert_eq!(frame.error_message(), Some("quota exceeded"));
    }

    #[test]
    fn test_video_frame() {
        let frame = GrokFrame::parse(
            r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":42,"videoUrl":"https://x/y.mp4"}}}}"#,
        )
        .unwrap();
        let video = frame
            .response()
            .unwrap()
            .streaming_video_generation_response
            .as_ref()
            .unwrap();
        assert_eq!(video.progress, Some(42));
        assert_eq!(video.video_url.as_deref(), Some("https://x/y.mp4"));
    }
}
