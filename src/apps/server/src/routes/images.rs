//! Asset proxy
//!
//! `GET /images/{encoded}` decodes the `u_`/`p_` base64url path segment
//! and streams the upstream bytes back. Thin passthrough; no caching or
//! range handling here.

use crate::routes::error_json;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use grokgate_core::infrastructure::transcode::{decode_asset_path, AssetTarget};

pub async fn proxy_asset(
    State(state): State<AppState>,
    Path(encoded): Path<String>,
) -> Response {
    let Some(target) = decode_asset_path(&encoded) else {
        return error_json(StatusCode::NOT_FOUND, "unknown asset path");
    };

    let target_url = match target {
        AssetTarget::Url(url) => url,
        AssetTarget::Path(path) => state.upstream.asset_url(&path),
    };

    let cf_clearance = match state.settings.load().await {
        Ok(bundle) if !bundle.grok.cf_clearance.is_empty() => Some(bundle.grok.cf_clearance),
        _ => None,
    };

    match state
        .upstream
        .fetch_asset(&target_url, cf_clearance.as_deref())
        .await
    {
        Ok(resp) => {
            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = Body::from_stream(resp.bytes_stream());
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            tracing::warn!("asset fetch failed for {}: {}", target_url, e);
            error_json(StatusCode::BAD_GATEWAY, "asset fetch failed")
        }
    }
}
