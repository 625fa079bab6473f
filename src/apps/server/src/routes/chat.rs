//! Chat completion surface
//!
//! `POST /v1/chat/completions` bridges one downstream request onto the
//! upstream conversation stream and hands the body to the transcoder.

use crate::routes::error_json;
use crate::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use grokgate_core::infrastructure::transcode::{
    collect_content, new_completion_id, transcode, ChatCompletion, FinishInfo, TranscodeOptions,
};
use grokgate_core::infrastructure::upstream::UpstreamClient;
use grokgate_core::service::logs::RequestLogEntry;
use grokgate_core::service::tokens::token_suffix;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// String or OpenAI content-part array.
    pub content: serde_json::Value,
}

impl ChatMessage {
    /// Flatten string-or-parts content to plain text.
    fn text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// Upstream takes a single flat message; roles are joined as plain lines.
fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn request_origin(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|host| format!("http://{}", host))
        .unwrap_or_else(|| "http://localhost:8000".to_string())
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let bundle = match state.settings.load().await {
        Ok(bundle) => bundle,
        Err(e) => {
            tracing::error!("settings load failed: {}", e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "settings unavailable");
        }
    };

    if request.messages.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "messages must not be empty");
    }

    let Some(token_entry) = state.tokens.pick(&request.model) else {
        return error_json(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("no upstream tokens available for model {}", request.model),
        );
    };

    let prompt = flatten_messages(&request.messages);
    let payload = UpstreamClient::conversation_payload(&request.model, &prompt);
    let cf_clearance = (!bundle.grok.cf_clearance.is_empty())
        .then_some(bundle.grok.cf_clearance.as_str());

    let ip = client_ip(&headers);
    let logs = state.logs.clone();
    let model_for_log = request.model.clone();
    let key_name = token_entry.key_name.clone();
    let suffix = token_suffix(&token_entry.token);

    let upstream_response = match state
        .upstream
        .open_conversation_stream(&token_entry.token, cf_clearance, &payload)
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("upstream connect failed: {}", e);
            let entry = RequestLogEntry {
                ip,
                model: model_for_log,
                duration_seconds: 0.0,
                status: 502,
                key_name,
                token_suffix: suffix,
                error: Some(e.to_string()),
            };
            tokio::spawn(async move {
                if let Err(e) = logs.insert(entry).await {
                    tracing::warn!("request log insert failed: {}", e);
                }
            });
            return error_json(StatusCode::BAD_GATEWAY, "upstream connection failed");
        }
    };

    let response_id = new_completion_id();
    let options = TranscodeOptions {
        response_id: response_id.clone(),
        model: request.model.clone(),
        filter_tags: bundle.global.filter_tags.clone(),
        show_thinking: bundle.global.show_thinking,
        video_poster_preview: bundle.global.video_poster_preview,
        base_url: (!bundle.global.base_url.is_empty()).then(|| bundle.global.base_url.clone()),
        origin: request_origin(&headers),
        timeouts: bundle.performance.stream_timeouts(),
    };

    let on_finish = move |finish: FinishInfo| {
        let entry = RequestLogEntry {
            ip,
            model: model_for_log,
            duration_seconds: finish.duration_seconds,
            status: finish.status,
            key_name,
            token_suffix: suffix,
            error: None,
        };
        tokio::spawn(async move {
            if let Err(e) = logs.insert(entry).await {
                tracing::warn!("request log insert failed: {}", e);
            }
        });
    };

    let sse = transcode(
        Box::pin(upstream_response.bytes_stream()),
        options,
        on_finish,
    );

    if request.stream {
        let body = Body::from_stream(sse.map(Ok::<_, std::convert::Infallible>));
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        let (content, model_seen) = collect_content(sse).await;
        let model = model_seen.unwrap_or(request.model);
        Json(ChatCompletion::new(&response_id, &model, content)).into_response()
    }
}

/// `GET /v1/models` - the configured model table.
pub async fn list_models(State(state): State<AppState>) -> Response {
    let bundle = match state.settings.load().await {
        Ok(bundle) => bundle,
        Err(e) => {
            tracing::error!("settings load failed: {}", e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "settings unavailable");
        }
    };
    let created = chrono::Utc::now().timestamp();
    let data: Vec<serde_json::Value> = bundle
        .grok
        .models
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "xai",
            })
        })
        .collect();
    Json(serde_json::json!({ "object": "list", "data": data })).into_response()
}
