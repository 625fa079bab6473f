//! Admin surface
//!
//! Settings get/save, request statistics, refresh progress, and the batch
//! token-refresh job with live SSE progress.

use crate::routes::error_json;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use grokgate_core::service::batch::{
    run_in_batches, task_sse_stream, RecordOutcome, TaskEvent, DEFAULT_EXPIRY,
};
use grokgate_core::service::progress::ProgressUpdate;
use grokgate_core::service::settings::SettingsBundle;

/// `GET /admin/settings`
pub async fn get_settings(State(state): State<AppState>) -> Response {
    match state.settings.load().await {
        Ok(bundle) => Json(bundle).into_response(),
        Err(e) => {
            tracing::error!("settings load failed: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "settings unavailable")
        }
    }
}

/// `PUT /admin/settings` - atomic write of all six sections.
pub async fn save_settings(
    State(state): State<AppState>,
    Json(bundle): Json<SettingsBundle>,
) -> Response {
    match state.settings.save(&bundle).await {
        Ok(()) => {
            state.tokens.reload(&bundle.token);
            Json(serde_json::json!({"success": true})).into_response()
        }
        Err(e) => {
            tracing::error!("settings save failed: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "settings save failed")
        }
    }
}

/// `GET /admin/stats`
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.logs.stats().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            tracing::error!("stats query failed: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable")
        }
    }
}

/// `GET /admin/refresh/progress`
pub async fn refresh_progress(State(state): State<AppState>) -> Response {
    match state.progress.get().await {
        Ok(progress) => Json(progress).into_response(),
        Err(e) => {
            tracing::error!("progress read failed: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "progress unavailable")
        }
    }
}

/// `POST /admin/tokens/refresh` - start a batch refresh over the token
/// pool; returns the task id for SSE observation.
pub async fn start_token_refresh(State(state): State<AppState>) -> Response {
    let entries = state.tokens.entries();
    if entries.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "token pool is empty");
    }

    let concurrency = match state.settings.load().await {
        Ok(bundle) => bundle.performance.batch_concurrency,
        Err(_) => 5,
    };

    let task = state.registry.create(entries.len() as u64);
    let task_id = task.id().to_string();

    if let Err(e) = state
        .progress
        .update(ProgressUpdate::started(entries.len() as i64))
        .await
    {
        tracing::warn!("progress reset failed: {}", e);
    }

    // Mirror each progress event into the durable snapshot.
    let mut mirror = task.subscribe();
    let progress_store = state.progress.clone();
    let mirror_task = task.clone();
    tokio::spawn(async move {
        while let Some(event) = mirror.receiver.recv().await {
            match event {
                TaskEvent::Progress {
                    processed, ok, fail, ..
                } => {
                    let update = ProgressUpdate {
                        current: Some(processed as i64),
                        success: Some(ok as i64),
                        failed: Some(fail as i64),
                        ..ProgressUpdate::default()
                    };
                    if let Err(e) = progress_store.update(update).await {
                        tracing::warn!("progress mirror failed: {}", e);
                    }
                }
                event if event.is_terminal() => {
                    if let Err(e) = progress_store.update(ProgressUpdate::finished()).await {
                        tracing::warn!("progress finish failed: {}", e);
                    }
                    break;
                }
                _ => {}
            }
        }
        mirror_task.unsubscribe(mirror.id);
    });

    let upstream = state.upstream.clone();
    let settings = state.settings.clone();
    let registry = state.registry.clone();
    let job_task = task.clone();
    tokio::spawn(async move {
        let cf_clearance = settings
            .load()
            .await
            .ok()
            .map(|b| b.grok.cf_clearance)
            .filter(|cf| !cf.is_empty());

        let probe_upstream = upstream.clone();
        let probe_cf = cf_clearance.clone();
        run_in_batches(
            entries,
            job_task.clone(),
            move |entry| {
                let upstream = probe_upstream.clone();
                let cf = probe_cf.clone();
                async move {
                    match upstream
                        .refresh_token_probe(&entry.token, cf.as_deref())
                        .await
                    {
                        Ok(()) => Ok(RecordOutcome::succeeded(entry.key_name)),
                        Err(e) => Ok(RecordOutcome::failed(entry.key_name, e.to_string())),
                    }
                }
            },
            concurrency,
        )
        .await;

        if !job_task.is_cancelled() {
            let snapshot = job_task.snapshot();
            let warning =
                (snapshot.fail > 0).then(|| format!("{} tokens failed to refresh", snapshot.fail));
            job_task.finish(
                serde_json::json!({
                    "total": snapshot.total,
                    "success": snapshot.ok,
                    "failed": snapshot.fail,
                }),
                warning,
            );
        }
        registry.expire(job_task.id(), DEFAULT_EXPIRY);
    });

    Json(serde_json::json!({"task_id": task_id})).into_response()
}

/// `GET /admin/tasks/{id}/stream` - live task events as SSE. A subscriber
/// arriving after completion still receives `init` plus the final event.
pub async fn task_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(task) = state.registry.get(&id) else {
        return error_json(StatusCode::NOT_FOUND, "task not found or expired");
    };
    let body = Body::from_stream(task_sse_stream(task).map(Ok::<_, std::convert::Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `POST /admin/tasks/{id}/cancel` - cooperative cancel; workers stop
/// between items and the terminal event follows once the pool drains.
pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(task) = state.registry.get(&id) else {
        return error_json(StatusCode::NOT_FOUND, "task not found or expired");
    };
    task.cancel();
    Json(serde_json::json!({"success": true})).into_response()
}
