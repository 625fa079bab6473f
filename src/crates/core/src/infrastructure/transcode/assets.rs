//! Asset URL rewriting
//!
//! Upstream image and video URLs are never handed to clients directly;
//! they are rewritten to gateway-proxied `/images/{path}` paths where the
//! path segment is a base64url-tagged encoding of the original location.

use base64::engine::general_purpose::{URL_SAFE_NO_PAD, STANDARD};
use base64::Engine as _;
use url::Url;

/// Map any upstream URL to a single path segment.
///
/// Absolute URLs (query/hash included) become `u_<base64url>`; anything
/// else is treated as a path, gets a leading `/` if absent, and becomes
/// `p_<base64url>`. Base64url is unpadded.
pub fn encode_asset_path(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => format!("u_{}", URL_SAFE_NO_PAD.encode(parsed.to_string())),
        Err(_) => {
            let path = if raw.starts_with('/') {
                raw.to_string()
            } else {
                format!("/{}", raw)
            };
            format!("p_{}", URL_SAFE_NO_PAD.encode(path))
        }
    }
}

/// A decoded asset location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetTarget {
    /// Full upstream URL.
    Url(String),
    /// Path relative to the upstream asset host.
    Path(String),
}

/// Inverse of [`encode_asset_path`]. `None` for unknown prefixes or
/// malformed base64.
pub fn decode_asset_path(encoded: &str) -> Option<AssetTarget> {
    let decode = |payload: &str| {
        // Tolerate padded input from hand-built URLs.
        URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| STANDARD.decode(payload))
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    };
    if let Some(payload) = encoded.strip_prefix("u_") {
        decode(payload).map(AssetTarget::Url)
    } else if let Some(payload) = encoded.strip_prefix("p_") {
        decode(payload).map(AssetTarget::Path)
    } else {
        None
    }
}

/// Gateway-proxied URL for an encoded asset path:
/// `{base_url || origin}/images/{path}`.
pub fn img_proxy_url(base_url: Option<&str>, origin: &str, path: &str) -> String {
    let base = match base_url {
        Some(b) if !b.is_empty() => b,
        _ => origin,
    };
    format!("{}/images/{}", base.trim_end_matches('/'), path)
}

/// Keep only usable generated-asset URLs: non-empty strings, not `"/"`,
/// and not URLs whose parsed form has pathname `"/"` with no query or
/// fragment.
pub fn normalize_generated_asset_urls(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.is_empty() && *s != "/")
        .filter(|s| match Url::parse(s) {
            Ok(parsed) => {
                parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some()
            }
            // Unparsable values are path-style; keep them.
            Err(_) => true,
        })
        .map(|s| s.to_string())
        .collect()
}

/// Markdown image links, one per URL, joined by newlines.
pub fn markdown_image_links(urls: &[String]) -> String {
    urls.iter()
        .map(|u| format!("![Generated Image]({})", u))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Video HTML snippet. Two shapes selected by `poster_preview`: a bare
/// `<video>` element, or a clickable poster block with an overlay play
/// triangle when a thumbnail is available.
pub fn video_html(video_url: &str, poster_url: Option<&str>, poster_preview: bool) -> String {
    match (poster_preview, poster_url) {
        (true, Some(poster)) => format!(
            concat!(
                "<a href=\"{video}\" target=\"_blank\">",
                "<div style=\"position:relative;display:inline-block;width:500px;height:300px;\">",
                "<img src=\"{poster}\" width=\"500\" height=\"300\" ",
                "style=\"object-fit:cover;border-radius:8px;\" />",
                "<div style=\"position:absolute;top:50%;left:50%;",
                "transform:translate(-50%,-50%);width:0;height:0;",
                "border-left:30px solid rgba(255,255,255,0.9);",
                "border-top:18px solid transparent;",
                "border-bottom:18px solid transparent;\"></div>",
                "</div></a>"
            ),
            video = escape_attr(video_url),
            poster = escape_attr(poster),
        ),
        _ => format!(
            "<video src=\"{}\" controls width=\"500\" height=\"300\"></video>",
            escape_attr(video_url)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absolute_url_round_trip() {
        let raw = "https://assets.grok.com/img/abc.png?sig=1#frag";
        let encoded = encode_asset_path(raw);
        assert!(encoded.starts_with("u_"));
        assert!(!encoded.contains('='));
        match decode_asset_path(&encoded) {
            Some(AssetTarget::Url(u)) => assert_eq!(u, raw),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_path_gets_leading_slash() {
        let encoded = encode_asset_path("users/img.png");
        assert!(encoded.starts_with("p_"));
        assert_eq!(
            decode_asset_path(&encoded),
            Some(AssetTarget::Path("/users/img.png".to_string()))
        );
    }

    #[test]
    fn test_prefixes_are_disjoint() {
        let as_url = encode_asset_path("https://x.test/a");
        let as_path = encode_asset_path("/a");
        assert!(as_url.starts_with("u_"));
        assert!(as_path.starts_with("p_"));
        assert!(decode_asset_path("z_abc").is_none());
    }

    #[test]
    fn test_img_proxy_url_prefers_base_url() {
        assert_eq!(
            img_proxy_url(Some("https://gw.example/"), "http://localhost:8000", "u_x"),
            "https://gw.example/images/u_x"
        );
        assert_eq!(
            img_proxy_url(None, "http://localhost:8000", "p_y"),
            "http://localhost:8000/images/p_y"
        );
        assert_eq!(
            img_proxy_url(Some(""), "http://localhost:8000", "p_y"),
            "http://localhost:8000/images/p_y"
        );
    }

    #[test]
    fn test_normalize_drops_junk() {
        let values = vec![
            json!("https://assets.grok.com/img/a.png"),
            json!(""),
            json!("/"),
            json!("https://assets.grok.com/"),
            json!("https://assets.grok.com/?q=1"),
            json!(42),
            json!("relative/path.png"),
        ];
        let kept = normalize_generated_asset_urls(&values);
        assert_eq!(
            kept,
            vec![
                "https://assets.grok.com/img/a.png".to_string(),
                "https://assets.grok.com/?q=1".to_string(),
                "relative/path.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_video_html_shapes() {
        let bare = video_html("https://x/y.mp4", None, false);
        assert!(bare.starts_with("<video src=\"https://x/y.mp4\""));
        assert!(bare.contains("controls"));

        let poster = video_html("https://x/y\".mp4", Some("https://x/p.jpg"), true);
        assert!(poster.contains("&quot;"));
        assert!(poster.contains("border-left:30px"));
        assert!(poster.contains("<img src=\"https://x/p.jpg\""));

        // Poster preview without a thumbnail falls back to the bare player
        let fallback = video_html("https://x/y.mp4", None, true);
        assert!(fallback.starts_with("<video"));
    }

    #[test]
    fn test_markdown_links() {
        let urls = vec!["u1".to_string(), "u2".to_string()];
        assert_eq!(
            markdown_image_links(&urls),
            "![Generated Image](u1)\n![Generated Image](u2)"
        );
    }
}
