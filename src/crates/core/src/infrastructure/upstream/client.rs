//! Upstream HTTP client
//!
//! Thin client over the Grok conversation API: cookie assembly, optional
//! proxy, and bounded retry with backoff. The response body is handed to
//! the transcoder as a raw byte stream.

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use reqwest::{Client, Proxy, Response};
use std::time::Duration;

/// Upstream connection configuration, sourced from the `grok` settings
/// section.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub user_agent: String,
    pub proxy_url: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://grok.com".to_string(),
            user_agent: "GrokGate/1.0".to_string(),
            proxy_url: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = Self::create_http_client(&config);
        Self { client, config }
    }

    /// Create an HTTP client (supports proxy configuration)
    fn create_http_client(config: &UpstreamConfig) -> Client {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(Duration::from_secs(60)));

        match &config.proxy_url {
            Some(url) if !url.is_empty() => match Proxy::all(url) {
                Ok(proxy) => {
                    info!("Using upstream proxy: {}", url);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    error!("Proxy configuration failed: {}, proceeding without proxy", e);
                    builder = builder.no_proxy();
                }
            },
            _ => {
                builder = builder.no_proxy();
            }
        }

        match builder.build() {
            Ok(client) => client,
            Err(e) => {
                error!("HTTP client initialization failed: {}, using default client", e);
                Client::new()
            }
        }
    }

    /// Cookie header for one request. `cf_clearance` arrives already
    /// re-prefixed by the settings layer.
    fn cookie_header(token: &str, cf_clearance: Option<&str>) -> String {
        match cf_clearance {
            Some(cf) if !cf.is_empty() => format!("sso={}; {}", token, cf),
            _ => format!("sso={}", token),
        }
    }

    /// The conversation request body for one chat completion.
    pub fn conversation_payload(model: &str, message: &str) -> serde_json::Value {
        serde_json::json!({
            "temporary": true,
            "modelName": model,
            "message": message,
            "fileAttachments": [],
            "imageAttachments": [],
            "disableSearch": false,
            "enableImageGeneration": true,
            "returnImageBytes": false,
            "enableImageStreaming": true,
            "imageGenerationCount": 2,
            "toolOverrides": {},
        })
    }

    /// Open a streaming conversation. Retries connection failures and
    /// non-client-error statuses with exponential backoff; client errors
    /// (4xx) return immediately.
    pub async fn open_conversation_stream(
        &self,
        token: &str,
        cf_clearance: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<Response> {
        let url = format!("{}/rest/app-chat/conversations/new", self.config.base_url);
        let cookie = Self::cookie_header(token, cf_clearance);

        let max_tries = 3;
        let base_wait_time_ms = 500u64;
        let mut last_error = None;

        for attempt in 0..max_tries {
            let request_start = std::time::Instant::now();
            let response_result = self
                .client
                .post(&url)
                .header("Cookie", cookie.as_str())
                .header("Accept", "text/event-stream")
                .json(payload)
                .send()
                .await;

            match response_result {
                Ok(resp) => {
                    let connect_time = request_start.elapsed().as_millis();
                    let status = resp.status();

                    if status.is_client_error() {
                        let error_text = resp
                            .text()
                            .await
                            .unwrap_or_else(|e| format!("Failed to read error response: {}", e));
                        error!("Upstream client error {}: {}", status, error_text);
                        return Err(anyhow!("Upstream client error {}: {}", status, error_text));
                    }

                    if status.is_success() {
                        debug!(
                            "Upstream stream connected: {}ms, status: {}, attempt: {}/{}",
                            connect_time,
                            status,
                            attempt + 1,
                            max_tries
                        );
                        return Ok(resp);
                    }

                    let error_text = resp
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("Failed to read error response: {}", e));
                    let error = anyhow!("Upstream error {}: {}", status, error_text);
                    warn!(
                        "Upstream request failed (attempt {}/{}): {}",
                        attempt + 1,
                        max_tries,
                        error
                    );
                    last_error = Some(error);
                }
                Err(e) => {
                    let connect_time = request_start.elapsed().as_millis();
                    warn!(
                        "Upstream connection failed: {}ms, attempt {}/{}, error: {}",
                        connect_time,
                        attempt + 1,
                        max_tries,
                        e
                    );
                    last_error = Some(anyhow!("Upstream connection failed: {}", e));
                }
            }

            if attempt < max_tries - 1 {
                let delay_ms = base_wait_time_ms * (1 << attempt.min(3));
                debug!("Retrying after {}ms (attempt {})", delay_ms, attempt + 2);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Err(anyhow!(
            "Upstream request failed after {} attempts: {}",
            max_tries,
            last_error.unwrap_or_else(|| anyhow!("Unknown error"))
        ))
    }

    /// Validity probe for one pool token, used by the batch refresh job.
    pub async fn refresh_token_probe(
        &self,
        token: &str,
        cf_clearance: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/rest/rate-limits", self.config.base_url);
        let cookie = Self::cookie_header(token, cf_clearance);

        let resp = self
            .client
            .post(&url)
            .header("Cookie", cookie.as_str())
            .json(&serde_json::json!({"requestKind": "DEFAULT"}))
            .send()
            .await
            .map_err(|e| anyhow!("Token probe request failed: {}", e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(anyhow!("Token probe rejected with status {}", status))
        }
    }

    /// Fetch proxied asset bytes for the `/images/{path}` surface.
    pub async fn fetch_asset(
        &self,
        target_url: &str,
        cf_clearance: Option<&str>,
    ) -> Result<Response> {
        let mut request = self.client.get(target_url);
        if let Some(cf) = cf_clearance {
            if !cf.is_empty() {
                request = request.header("Cookie", cf);
            }
        }
        let resp = request
            .send()
            .await
            .map_err(|e| anyhow!("Asset fetch failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(anyhow!("Asset fetch rejected with status {}", resp.status()));
        }
        Ok(resp)
    }

    /// Resolve a decoded asset path against the upstream asset host.
    pub fn asset_url(&self, path: &str) -> String {
        format!("https://assets.grok.com{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_assembly() {
        assert_eq!(UpstreamClient::cookie_header("tok", None), "sso=tok");
        assert_eq!(
            UpstreamClient::cookie_header("tok", Some("cf_clearance=abc")),
            "sso=tok; cf_clearance=abc"
        );
        assert_eq!(UpstreamClient::cookie_header("tok", Some("")), "sso=tok");
    }

    #[test]
    fn test_conversation_payload_shape() {
        let payload = UpstreamClient::conversation_payload("grok-4", "hello");
        assert_eq!(payload["modelName"], "grok-4");
        assert_eq!(payload["message"], "hello");
        assert_eq!(payload["temporary"], true);
    }
}
