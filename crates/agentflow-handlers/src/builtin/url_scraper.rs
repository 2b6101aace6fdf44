use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use agentflow_core::config::HandlersConfig;
use agentflow_core::traits::NodeHandler;
use agentflow_core::{HandlerContext, HandlerError, NodeConfig, NodeInputs, Payload};

/// Fetches the page named by the `urlSearch` config key and returns its text.
///
/// Connection errors, timeouts, 429 and 5xx responses are transient; a missing
/// or malformed URL and other 4xx responses are permanent.
pub struct UrlScraperHandler {
    config: HandlersConfig,
}

impl UrlScraperHandler {
    pub fn new(config: HandlersConfig) -> Self {
        Self { config }
    }
}

impl NodeHandler for UrlScraperHandler {
    fn name(&self) -> &str {
        "url_scraper"
    }

    fn invoke(
        &self,
        ctx: HandlerContext,
        config: NodeConfig,
        _inputs: NodeInputs,
    ) -> BoxFuture<'_, Result<Payload, HandlerError>> {
        Box::pin(async move {
            let url = config
                .get("urlSearch")
                .or_else(|| config.get("url"))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| HandlerError::permanent("URL Scraper has no urlSearch configured"))?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(HandlerError::permanent(format!("unsupported URL: {}", url)));
            }

            debug!(node_id = %ctx.node_id, url, attempt = ctx.attempt, "Fetching URL");

            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(self.config.http_timeout_secs))
                .user_agent(self.config.user_agent.as_str())
                .build()
                .map_err(|e| HandlerError::permanent(format!("Failed to create HTTP client: {}", e)))?;

            let resp = client.get(url).send().await.map_err(classify_request_error)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(classify_status(status));
            }

            let content_type = resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let body = resp
                .text()
                .await
                .map_err(|e| HandlerError::transient(format!("Failed to read response body: {}", e)))?;

            let text = if content_type.contains("html") {
                strip_html_tags(&body)
                    .map_err(|e| HandlerError::permanent(format!("HTML stripping failed: {}", e)))?
            } else {
                body
            };

            let (content, truncated) = truncate_chars(text, self.config.max_content_length);
            Ok(json!({
                "url": url,
                "status": status.as_u16(),
                "content": content,
                "truncated": truncated,
            }))
        })
    }
}

fn classify_request_error(e: reqwest::Error) -> HandlerError {
    if e.is_builder() {
        HandlerError::permanent(format!("Invalid request: {}", e))
    } else {
        HandlerError::transient(format!("Request failed: {}", e))
    }
}

fn classify_status(status: StatusCode) -> HandlerError {
    let message = format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        HandlerError::transient(message)
    } else {
        HandlerError::permanent(message)
    }
}

fn truncate_chars(text: String, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text, false),
    }
}

/// Basic HTML tag stripping using regex.
fn strip_html_tags(html: &str) -> Result<String, regex::Error> {
    // Remove script and style blocks entirely
    let cleaned = Regex::new(r"(?is)<script[^>]*>.*?</script>")?.replace_all(html, "");
    let cleaned = Regex::new(r"(?is)<style[^>]*>.*?</style>")?.replace_all(&cleaned, "");
    let text = Regex::new(r"<[^>]+>")?.replace_all(&cleaned, "");

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let text = Regex::new(r"\n{3,}")?.replace_all(&text, "\n\n");
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                content_type,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{}/page", addr)
    }

    fn config_for(url: &str) -> NodeConfig {
        let mut config = NodeConfig::new();
        config.insert("urlSearch".into(), json!(url));
        config
    }

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>p{}</style><script>x()</script></head>\
                    <body><p>Fish &amp; chips</p></body></html>";
        assert_eq!(strip_html_tags(html).unwrap(), "Fish & chips");
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND).is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN).is_transient());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let (text, truncated) = truncate_chars("héllo".to_string(), 2);
        assert_eq!(text, "hé");
        assert!(truncated);
        let (text, truncated) = truncate_chars("abc".to_string(), 10);
        assert_eq!(text, "abc");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_missing_url_is_permanent() {
        let handler = UrlScraperHandler::new(HandlersConfig::default());
        let err = handler
            .invoke(HandlerContext::detached("u"), NodeConfig::new(), NodeInputs::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        let err = handler
            .invoke(HandlerContext::detached("u"), config_for("ftp://example.com"), NodeInputs::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_fetches_and_strips_html() {
        let url = serve_once("200 OK", "text/html", "<h1>Agentflow</h1><p>pipelines</p>").await;
        let handler = UrlScraperHandler::new(HandlersConfig::default());
        let out = handler
            .invoke(HandlerContext::detached("u"), config_for(&url), NodeInputs::new())
            .await
            .unwrap();
        assert_eq!(out["status"], 200);
        assert_eq!(out["content"], "Agentflowpipelines");
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let url = serve_once("503 Service Unavailable", "text/plain", "busy").await;
        let handler = UrlScraperHandler::new(HandlersConfig::default());
        let err = handler
            .invoke(HandlerContext::detached("u"), config_for(&url), NodeInputs::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("503"));
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        let url = serve_once("404 Not Found", "text/plain", "nope").await;
        let handler = UrlScraperHandler::new(HandlersConfig::default());
        let err = handler
            .invoke(HandlerContext::detached("u"), config_for(&url), NodeInputs::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
