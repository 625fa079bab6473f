//! NDJSON frame stream -> OpenAI SSE transcoder
//!
//! Converts the upstream Grok dialect into `chat.completion.chunk` events
//! chunk by chunk: cross-frame tag filtering, thinking-mode bracketing,
//! image/video side streams, and layered stream timeouts. One transcoder
//! task per HTTP response; state is never shared across streams.

use super::assets;
use super::openai::{sse_data, sse_done, ChatCompletionChunk};
use super::tag_filter::TagFilter;
use crate::infrastructure::upstream::frames::{GrokFrame, ResponseEnvelope};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, warn};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Reads never block longer than this even when a budget is disabled.
const READ_BUDGET_CAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Layered stream timeout budgets. A zero duration disables that budget.
#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    /// Budget for the first upstream frame.
    pub first_response: Duration,
    /// Gap budget between reads once the stream has started (backstop).
    pub chunk: Duration,
    /// Whole-response budget; the only budget that truncates an in-flight read.
    pub total: Duration,
    /// Gap budget between frames.
    pub idle: Duration,
    /// Replaces `idle` while the stream is in video mode.
    pub video_idle: Duration,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            first_response: Duration::from_secs(30),
            chunk: Duration::from_secs(120),
            total: Duration::from_secs(600),
            idle: Duration::from_secs(60),
            video_idle: Duration::from_secs(300),
        }
    }
}

/// Per-stream transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// SSE id base (`chatcmpl-...`).
    pub response_id: String,
    /// Requested model; replaced by the upstream's authoritative name when
    /// a `userResponse.model` frame arrives.
    pub model: String,
    /// Tag names suppressed by the cross-chunk filter.
    pub filter_tags: Vec<String>,
    pub show_thinking: bool,
    pub video_poster_preview: bool,
    /// Public base URL for proxied assets; falls back to `origin`.
    pub base_url: Option<String>,
    /// Request origin, e.g. `http://localhost:8000`.
    pub origin: String,
    pub timeouts: StreamTimeouts,
}

/// Handed to the completion callback exactly once on any terminal path.
#[derive(Debug, Clone, Copy)]
pub struct FinishInfo {
    pub status: u16,
    pub duration_seconds: f64,
}

/// How the frame loop ended.
#[derive(Debug)]
enum StreamEnd {
    /// Upstream EOF.
    Eof,
    /// A deadline or the per-read timer fired. Clean stop, status preserved.
    TimerExpiry,
    /// Upstream stalled beyond the idle budget. Clean stop, status preserved.
    IdleTimeout,
    /// The per-frame handler already emitted the terminal chunk.
    Closed,
    /// The upstream read itself failed.
    TransportError(String),
}

/// What a single frame asked the loop to do.
enum FrameFlow {
    Continue,
    Close,
}

struct TranscodeState {
    current_model: String,
    first_received: bool,
    first_chunk_sent: bool,
    final_status: u16,
    is_image: bool,
    is_video: bool,
    is_thinking: bool,
    thinking_finished: bool,
    video_progress_started: bool,
    last_video_progress: i64,
    filter: TagFilter,
}

impl TranscodeState {
    fn new(options: &TranscodeOptions) -> Self {
        Self {
            current_model: options.model.clone(),
            first_received: false,
            first_chunk_sent: false,
            final_status: 200,
            is_image: false,
            is_video: false,
            is_thinking: false,
            thinking_finished: false,
            video_progress_started: false,
            last_video_progress: 0,
            filter: TagFilter::new(options.filter_tags.clone()),
        }
    }
}

/// Transcode an upstream byte stream into an OpenAI SSE byte stream.
///
/// The frame loop runs on its own task and writes `data:` records to an
/// unbounded channel; the returned stream drains it. `on_finish` is
/// invoked exactly once on any terminal path (normal end, timeout,
/// upstream error, transport failure), before the stream closes. The
/// output always ends with a `finish_reason` chunk and `data: [DONE]`.
pub fn transcode<S, E>(
    upstream: S,
    options: TranscodeOptions,
    on_finish: impl FnOnce(FinishInfo) + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Bytes> + Send>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_transcode(upstream, tx, options, on_finish));
    Box::pin(UnboundedReceiverStream::new(rx))
}

async fn run_transcode<S, E>(
    mut upstream: S,
    tx: mpsc::UnboundedSender<Bytes>,
    options: TranscodeOptions,
    on_finish: impl FnOnce(FinishInfo) + Send + 'static,
) where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let started = Instant::now();
    let mut state = TranscodeState::new(&options);

    let end = drive(&mut upstream, &tx, &mut state, &options, started).await;

    match end {
        StreamEnd::Eof => {
            let pending = state.filter.flush();
            if !pending.is_empty() {
                emit_delta(&tx, &mut state, &options, pending);
            }
            emit_finish(&tx, &state, &options, None, "stop");
        }
        StreamEnd::TimerExpiry => {
            debug!("stream timer expired, flushing stop");
            emit_finish(&tx, &state, &options, None, "stop");
        }
        StreamEnd::IdleTimeout => {
            warn!("upstream idle beyond budget, flushing stop");
            emit_finish(&tx, &state, &options, None, "stop");
        }
        StreamEnd::Closed => {}
        StreamEnd::TransportError(message) => {
            let lower = message.to_lowercase();
            if lower.contains("http/2") || lower.contains("curl: (92)") || lower.contains("stream")
            {
                warn!("upstream transport hiccup: {}", message);
                state.final_status = 502;
                emit_finish(&tx, &state, &options, None, "stop");
            } else {
                state.final_status = 500;
                emit_finish(
                    &tx,
                    &state,
                    &options,
                    Some(format!("处理错误: {}", message)),
                    "error",
                );
            }
        }
    }

    let _ = tx.send(sse_done());
    on_finish(FinishInfo {
        status: state.final_status,
        duration_seconds: started.elapsed().as_secs_f64(),
    });
    // tx drops here, closing the output stream; the upstream reader is
    // released with it.
}

/// The frame loop. Checks deadlines before every read, races each read
/// against `min(first_received ? chunk : first_response, total remaining)`,
/// and feeds complete NDJSON lines to the per-frame handler.
async fn drive<S, E>(
    upstream: &mut S,
    tx: &mpsc::UnboundedSender<Bytes>,
    state: &mut TranscodeState,
    options: &TranscodeOptions,
    started: Instant,
) -> StreamEnd
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: std::fmt::Display,
{
    let budgets = options.timeouts;
    let mut last_chunk = started;
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let now = Instant::now();
        let since_start = now.duration_since(started);
        let since_chunk = now.duration_since(last_chunk);

        // Deadline checks, first match wins.
        if !state.first_received
            && !budgets.first_response.is_zero()
            && since_start > budgets.first_response
        {
            return StreamEnd::TimerExpiry;
        }
        if !budgets.total.is_zero() && since_start > budgets.total {
            return StreamEnd::TimerExpiry;
        }
        let effective_idle = if state.is_video {
            budgets.video_idle
        } else {
            budgets.idle
        };
        if state.first_received && !effective_idle.is_zero() && since_chunk > effective_idle {
            return StreamEnd::IdleTimeout;
        }
        if state.first_received && !budgets.chunk.is_zero() && since_chunk > budgets.chunk {
            return StreamEnd::TimerExpiry;
        }

        let base = if state.first_received {
            budgets.chunk
        } else {
            budgets.first_response
        };
        let mut read_budget = if base.is_zero() { READ_BUDGET_CAP } else { base };
        if !budgets.total.is_zero() {
            read_budget = read_budget.min(budgets.total.saturating_sub(since_start));
        }

        let read = match timeout(read_budget, upstream.next()).await {
            Err(_) => return StreamEnd::TimerExpiry,
            Ok(item) => item,
        };

        match read {
            None => {
                // Final line may lack a trailing newline.
                if let Some(frame) = GrokFrame::parse(&String::from_utf8_lossy(&buf)) {
                    state.first_received = true;
                    if let FrameFlow::Close = handle_frame(&frame, tx, state, options) {
                        return StreamEnd::Closed;
                    }
                }
                return StreamEnd::Eof;
            }
            Some(Err(e)) => return StreamEnd::TransportError(e.to_string()),
            Some(Ok(bytes)) => {
                buf.extend_from_slice(&bytes);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(frame) = GrokFrame::parse(&line) else {
                        if !line.trim().is_empty() {
                            debug!("skipping unparsable upstream line");
                        }
                        continue;
                    };
                    state.first_received = true;
                    last_chunk = Instant::now();
                    if let FrameFlow::Close = handle_frame(&frame, tx, state, options) {
                        return StreamEnd::Closed;
                    }
                }
            }
        }
    }
}

/// One parsed frame. Emits zero or more chunks; `Close` means the terminal
/// chunk has already been written.
fn handle_frame(
    frame: &GrokFrame,
    tx: &mpsc::UnboundedSender<Bytes>,
    state: &mut TranscodeState,
    options: &TranscodeOptions,
) -> FrameFlow {
    if let Some(message) = frame.error_message() {
        state.final_status = 500;
        emit_finish(tx, state, options, Some(format!("Error: {}", message)), "stop");
        return FrameFlow::Close;
    }

    let Some(envelope) = frame.response() else {
        return FrameFlow::Continue;
    };

    if let Some(model) = envelope
        .user_response
        .as_ref()
        .and_then(|u| u.model.as_deref())
    {
        if !model.is_empty() {
            state.current_model = model.to_string();
        }
    }

    if let Some(video) = &envelope.streaming_video_generation_response {
        state.is_video = true;
        if let Some(progress) = video.progress {
            if progress > state.last_video_progress {
                state.last_video_progress = progress;
                if options.show_thinking {
                    let opening = if state.video_progress_started {
                        ""
                    } else {
                        state.video_progress_started = true;
                        "<think>"
                    };
                    let closing = if progress >= 100 { "</think>" } else { "" };
                    let line = format!("{}视频已生成{}%{}\n", opening, progress, closing);
                    emit_delta(tx, state, options, line);
                }
            }
        }
        if let Some(video_url) = video.video_url.as_deref() {
            let proxied = proxy_url(options, video_url);
            let poster = video
                .thumbnail_image_url
                .as_deref()
                .map(|u| proxy_url(options, u));
            let html =
                assets::video_html(&proxied, poster.as_deref(), options.video_poster_preview);
            emit_delta(tx, state, options, html);
        }
        return FrameFlow::Continue;
    }

    if envelope.image_attachment_info.is_some() {
        state.is_image = true;
    }

    if state.is_image {
        return handle_image_frame(envelope, tx, state, options);
    }

    handle_text_frame(envelope, tx, state, options)
}

fn handle_image_frame(
    envelope: &ResponseEnvelope,
    tx: &mpsc::UnboundedSender<Bytes>,
    state: &mut TranscodeState,
    options: &TranscodeOptions,
) -> FrameFlow {
    if let Some(raw_urls) = envelope
        .model_response
        .as_ref()
        .and_then(|m| m.generated_image_urls.as_deref())
    {
        let urls = assets::normalize_generated_asset_urls(raw_urls);
        if !urls.is_empty() {
            let proxied: Vec<String> = urls.iter().map(|u| proxy_url(options, u)).collect();
            let content = assets::markdown_image_links(&proxied);
            emit_finish(tx, state, options, Some(content), "stop");
            return FrameFlow::Close;
        }
    }
    if let Some(token) = envelope.token_str() {
        // No tag filtering in image mode.
        if !token.is_empty() {
            emit_delta(tx, state, options, token.to_string());
        }
    }
    FrameFlow::Continue
}

fn handle_text_frame(
    envelope: &ResponseEnvelope,
    tx: &mpsc::UnboundedSender<Bytes>,
    state: &mut TranscodeState,
    options: &TranscodeOptions,
) -> FrameFlow {
    // Arrays are ignored; only non-empty string tokens proceed.
    let Some(token) = envelope.token_str().filter(|t| !t.is_empty()) else {
        return FrameFlow::Continue;
    };

    let filtered = state.filter.filter(token);
    if filtered.is_empty() {
        return FrameFlow::Continue;
    }
    let mut text = filtered;

    let current_is_thinking = envelope.is_thinking.unwrap_or(false);

    if envelope.tool_usage_card_id.is_some() {
        if let Some(results) = envelope
            .web_search_results
            .as_ref()
            .and_then(|w| w.results.as_deref())
        {
            // Search citations surface inside thinking regions only.
            if current_is_thinking && options.show_thinking {
                for result in results {
                    let title = result.title.as_deref().unwrap_or("");
                    let url = result.url.as_deref().unwrap_or("");
                    let preview = result
                        .preview
                        .as_deref()
                        .unwrap_or("")
                        .replace(['\n', '\r'], " ");
                    text.push_str(&format!("\n- [{}]({} \"{}\")", title, url, preview));
                }
                text.push('\n');
            } else {
                return FrameFlow::Continue;
            }
        }
    }

    if envelope.message_tag.as_deref() == Some("header") {
        text = format!("\n\n{}\n\n", text);
    }

    let mut skip = false;
    if !state.is_thinking && current_is_thinking {
        if options.show_thinking {
            text = format!("<think>\n{}", text);
        } else {
            skip = true;
        }
    } else if state.is_thinking && !current_is_thinking {
        if options.show_thinking {
            text = format!("\n</think>\n{}", text);
        }
        state.thinking_finished = true;
    }
    if current_is_thinking && !options.show_thinking {
        skip = true;
    }
    // Thinking must not re-open once closed.
    if state.thinking_finished && current_is_thinking {
        skip = true;
    }
    state.is_thinking = current_is_thinking;

    if !skip {
        emit_delta(tx, state, options, text);
    }
    FrameFlow::Continue
}

fn proxy_url(options: &TranscodeOptions, raw: &str) -> String {
    assets::img_proxy_url(
        options.base_url.as_deref(),
        &options.origin,
        &assets::encode_asset_path(raw),
    )
}

fn emit_delta(
    tx: &mpsc::UnboundedSender<Bytes>,
    state: &mut TranscodeState,
    options: &TranscodeOptions,
    content: String,
) {
    let first = !state.first_chunk_sent;
    state.first_chunk_sent = true;
    let chunk =
        ChatCompletionChunk::delta(&options.response_id, &state.current_model, content, first);
    let _ = tx.send(sse_data(&chunk));
}

fn emit_finish(
    tx: &mpsc::UnboundedSender<Bytes>,
    state: &TranscodeState,
    options: &TranscodeOptions,
    content: Option<String>,
    reason: &str,
) {
    let chunk =
        ChatCompletionChunk::finish(&options.response_id, &state.current_model, content, reason);
    let _ = tx.send(sse_data(&chunk));
}

/// Drain a transcoded SSE byte stream and accumulate the delta content
/// into a single string (the non-stream response path). Returns the
/// concatenated content and the last model name seen.
pub async fn collect_content(
    mut stream: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
) -> (String, Option<String>) {
    let mut raw = Vec::new();
    while let Some(bytes) = stream.next().await {
        raw.extend_from_slice(&bytes);
    }
    let mut content = String::new();
    let mut model = None;
    for line in String::from_utf8_lossy(&raw).lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload == "[DONE]" {
            break;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            continue;
        };
        if let Some(m) = value.get("model").and_then(|m| m.as_str()) {
            model = Some(m.to_string());
        }
        if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
            content.push_str(delta);
        }
    }
    (content, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn options() -> TranscodeOptions {
        TranscodeOptions {
            response_id: "chatcmpl-test".to_string(),
            model: "grok-4".to_string(),
            filter_tags: Vec::new(),
            show_thinking: true,
            video_poster_preview: false,
            base_url: None,
            origin: "http://localhost:8000".to_string(),
            timeouts: StreamTimeouts::default(),
        }
    }

    fn body(lines: &[&str]) -> Vec<Result<Bytes, std::io::Error>> {
        lines
            .iter()
            .map(|l| Ok(Bytes::from(format!("{}\n", l))))
            .collect()
    }

    struct Run {
        records: Vec<serde_json::Value>,
        done: bool,
        finish: Option<FinishInfo>,
        finish_calls: usize,
    }

    impl Run {
        fn deltas(&self) -> String {
            self.records
                .iter()
                .filter_map(|r| r["choices"][0]["delta"]["content"].as_str())
                .collect()
        }

        fn finish_reasons(&self) -> Vec<String> {
            self.records
                .iter()
                .filter_map(|r| r["choices"][0]["finish_reason"].as_str())
                .map(|s| s.to_string())
                .collect()
        }
    }

    async fn run_stream<S>(upstream: S, options: TranscodeOptions) -> Run
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        let info: Arc<Mutex<Option<FinishInfo>>> = Arc::new(Mutex::new(None));
        let calls_cb = calls.clone();
        let info_cb = info.clone();

        let mut out = transcode(upstream, options, move |finish| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            *info_cb.lock().unwrap() = Some(finish);
        });

        let mut raw = Vec::new();
        while let Some(bytes) = out.next().await {
            raw.extend_from_slice(&bytes);
        }

        let mut records = Vec::new();
        let mut done = false;
        for line in String::from_utf8_lossy(&raw).lines() {
            if let Some(payload) = line.strip_prefix("data: ") {
                if payload == "[DONE]" {
                    done = true;
                } else {
                    records.push(serde_json::from_str(payload).expect("well-formed SSE json"));
                }
            }
        }
        let finish = *info.lock().unwrap();
        Run {
            records,
            done,
            finish,
            finish_calls: calls.load(Ordering::SeqCst),
        }
    }

    async fn run_lines(lines: &[&str], options: TranscodeOptions) -> Run {
        run_stream(futures::stream::iter(body(lines)), options).await
    }

    #[tokio::test]
    async fn test_thinking_then_answer_with_show_thinking() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"isThinking":true,"token":"A"}}}"#,
                r#"{"result":{"response":{"isThinking":true,"token":"B"}}}"#,
                r#"{"result":{"response":{"isThinking":false,"token":"C"}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.deltas(), "<think>\nAB\n</think>\nC");
        assert_eq!(run.finish_reasons(), vec!["stop"]);
        assert!(run.done);
        assert_eq!(run.finish_calls, 1);
        assert_eq!(run.finish.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_thinking_hidden_without_show_thinking() {
        let mut opts = options();
        opts.show_thinking = false;
        let run = run_lines(
            &[
                r#"{"result":{"response":{"isThinking":true,"token":"A"}}}"#,
                r#"{"result":{"response":{"isThinking":true,"token":"B"}}}"#,
                r#"{"result":{"response":{"isThinking":false,"token":"C"}}}"#,
            ],
            opts,
        )
        .await;
        assert_eq!(run.deltas(), "C");
    }

    #[tokio::test]
    async fn test_thinking_does_not_reopen() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"isThinking":true,"token":"A"}}}"#,
                r#"{"result":{"response":{"isThinking":false,"token":"B"}}}"#,
                r#"{"result":{"response":{"isThinking":true,"token":"ghost"}}}"#,
                r#"{"result":{"response":{"isThinking":false,"token":"C"}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.deltas(), "<think>\nA\n</think>\nBC");
    }

    #[tokio::test]
    async fn test_cross_chunk_tag_suppression() {
        let mut opts = options();
        opts.filter_tags = vec!["xaiartifact".to_string()];
        let run = run_lines(
            &[
                r#"{"result":{"response":{"token":"Hello <xai"}}}"#,
                r#"{"result":{"response":{"token":"artifact>secret</xaiartifact> World"}}}"#,
            ],
            opts,
        )
        .await;
        assert_eq!(run.deltas(), "Hello  World");
        assert_eq!(run.finish_reasons(), vec!["stop"]);
    }

    #[tokio::test]
    async fn test_model_update_from_user_response() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"userResponse":{"model":"grok-4-mini"},"token":"x"}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.records[0]["model"], "grok-4-mini");
    }

    #[tokio::test]
    async fn test_header_message_tag_wrapping() {
        let run = run_lines(
            &[r#"{"result":{"response":{"token":"Title","messageTag":"header"}}}"#],
            options(),
        )
        .await;
        assert_eq!(run.deltas(), "\n\nTitle\n\n");
    }

    #[tokio::test]
    async fn test_upstream_error_frame() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"token":"partial"}}}"#,
                r#"{"error":{"message":"quota exceeded"}}"#,
            ],
            options(),
        )
        .await;
        assert!(run.deltas().contains("Error: quota exceeded"));
        assert_eq!(run.finish_reasons(), vec!["stop"]);
        assert!(run.done);
        assert_eq!(run.finish.unwrap().status, 500);
        assert_eq!(run.finish_calls, 1);
    }

    #[tokio::test]
    async fn test_unparsable_lines_are_skipped() {
        let run = run_lines(
            &[
                "not json at all",
                r#"{"result":{"response":{"token":"ok"}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.deltas(), "ok");
    }

    #[tokio::test]
    async fn test_video_progress_bracketing() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":10}}}}"#,
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":60}}}}"#,
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":100}}}}"#,
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":100,"videoUrl":"https://x/y.mp4"}}}}"#,
            ],
            options(),
        )
        .await;
        let deltas = run.deltas();
        assert!(deltas.starts_with("<think>视频已生成10%\n视频已生成60%\n视频已生成100%</think>\n"));
        assert!(deltas.contains("<video src="));
        assert!(deltas.contains("/images/u_"));
        assert_eq!(run.finish_reasons(), vec!["stop"]);
    }

    #[tokio::test]
    async fn test_video_progress_not_repeated_for_stale_updates() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":50}}}}"#,
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":50}}}}"#,
                r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":40}}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.deltas(), "<think>视频已生成50%\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_idle_overrides_idle() {
        let mut opts = options();
        opts.timeouts.idle = Duration::from_secs(5);
        opts.timeouts.video_idle = Duration::from_secs(60);
        opts.timeouts.chunk = Duration::from_secs(120);
        opts.timeouts.total = Duration::ZERO;

        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();
        tokio::spawn(async move {
            let _ = tx.send(Ok(Bytes::from(
                "{\"result\":{\"response\":{\"streamingVideoGenerationResponse\":{\"progress\":10}}}}\n",
            )));
            tokio::time::sleep(Duration::from_secs(30)).await;
            // Dropping the sender ends the upstream stream.
        });

        let run = run_stream(UnboundedReceiverStream::new(rx), opts).await;
        assert_eq!(run.finish.unwrap().status, 200);
        assert_eq!(run.finish_reasons(), vec!["stop"]);
        assert!(run.done);
        // No error chunk was emitted.
        assert!(!run.deltas().contains("处理错误"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fires_in_text_mode() {
        let mut opts = options();
        opts.timeouts.idle = Duration::from_secs(5);
        opts.timeouts.chunk = Duration::from_secs(120);
        opts.timeouts.total = Duration::ZERO;

        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();
        tokio::spawn(async move {
            let _ = tx.send(Ok(Bytes::from(
                "{\"result\":{\"response\":{\"token\":\"hi\"}}}\n",
            )));
            tokio::time::sleep(Duration::from_secs(10)).await;
            // A keepalive that is not a frame: read completes but the
            // frame clock does not advance, so the idle deadline fires.
            let _ = tx.send(Ok(Bytes::from("ping\n")));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(tx);
        });

        let run = run_stream(UnboundedReceiverStream::new(rx), opts).await;
        // Idle timeout is a clean stop: status preserved, no error chunk.
        assert_eq!(run.finish.unwrap().status, 200);
        assert_eq!(run.deltas(), "hi");
        assert_eq!(run.finish_reasons(), vec!["stop"]);
        assert!(run.done);
        assert_eq!(run.finish_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_response_timeout() {
        let mut opts = options();
        opts.timeouts.first_response = Duration::from_secs(2);
        opts.timeouts.total = Duration::ZERO;

        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(tx);
        });

        let run = run_stream(UnboundedReceiverStream::new(rx), opts).await;
        assert_eq!(run.finish_reasons(), vec!["stop"]);
        assert!(run.done);
        assert_eq!(run.finish.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_http2_transport_error_becomes_clean_stop() {
        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from("{\"result\":{\"response\":{\"token\":\"a\"}}}\n")),
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "curl: (92) HTTP/2 stream was not closed cleanly",
            )),
        ]);
        let run = run_stream(upstream, options()).await;
        assert_eq!(run.deltas(), "a");
        assert_eq!(run.finish_reasons(), vec!["stop"]);
        assert_eq!(run.finish.unwrap().status, 502);
    }

    #[tokio::test]
    async fn test_other_transport_error_emits_error_chunk() {
        let upstream = futures::stream::iter(vec![Err::<Bytes, std::io::Error>(
            std::io::Error::new(std::io::ErrorKind::Other, "connection reset by peer"),
        )]);
        let run = run_stream(upstream, options()).await;
        assert!(run.deltas().contains("处理错误: "));
        assert_eq!(run.finish_reasons(), vec!["error"]);
        assert_eq!(run.finish.unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_image_mode_generated_urls() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"imageAttachmentInfo":{},"token":"generating"}}}"#,
                r#"{"result":{"response":{"modelResponse":{"generatedImageUrls":["https://assets.grok.com/a.png","https://assets.grok.com/b.png"]}}}}"#,
            ],
            options(),
        )
        .await;
        let deltas = run.deltas();
        assert!(deltas.starts_with("generating"));
        assert!(deltas.contains("![Generated Image](http://localhost:8000/images/u_"));
        assert_eq!(deltas.matches("![Generated Image]").count(), 2);
        assert_eq!(run.finish_reasons(), vec!["stop"]);
    }

    #[tokio::test]
    async fn test_image_mode_does_not_filter_tokens() {
        let mut opts = options();
        opts.filter_tags = vec!["xaiartifact".to_string()];
        let run = run_lines(
            &[
                r#"{"result":{"response":{"imageAttachmentInfo":{}}}}"#,
                r#"{"result":{"response":{"token":"<xaiartifact>"}}}"#,
            ],
            opts,
        )
        .await;
        assert_eq!(run.deltas(), "<xaiartifact>");
    }

    #[tokio::test]
    async fn test_search_citations_inside_thinking() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"isThinking":true,"token":"searching","toolUsageCardId":"c1","webSearchResults":{"results":[{"title":"T","url":"https://t","preview":"line1\nline2"}]}}}}"#,
            ],
            options(),
        )
        .await;
        let deltas = run.deltas();
        assert!(deltas.contains("- [T](https://t \"line1 line2\")"));
    }

    #[tokio::test]
    async fn test_search_citations_skipped_outside_thinking() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"isThinking":false,"token":"searching","toolUsageCardId":"c1","webSearchResults":{"results":[{"title":"T","url":"https://t","preview":"p"}]}}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.deltas(), "");
    }

    #[tokio::test]
    async fn test_role_marker_only_on_first_chunk() {
        let run = run_lines(
            &[
                r#"{"result":{"response":{"token":"a"}}}"#,
                r#"{"result":{"response":{"token":"b"}}}"#,
            ],
            options(),
        )
        .await;
        assert_eq!(run.records[0]["choices"][0]["delta"]["role"], "assistant");
        assert!(run.records[1]["choices"][0]["delta"].get("role").is_none());
    }

    #[tokio::test]
    async fn test_collect_content() {
        let out = transcode(
            futures::stream::iter(body(&[
                r#"{"result":{"response":{"token":"Hello "}}}"#,
                r#"{"result":{"response":{"userResponse":{"model":"grok-4-fast"},"token":"World"}}}"#,
            ])),
            options(),
            |_| {},
        );
        let (content, model) = collect_content(out).await;
        assert_eq!(content, "Hello World");
        assert_eq!(model.as_deref(), Some("grok-4-fast"));
    }
}
