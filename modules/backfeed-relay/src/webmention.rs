// Webmention transport. Endpoint resolution is the minimal Link-header
// handshake; full HTML discovery is out of scope here, matching what the
// upstream sender library handled.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use backfeed_common::BackfeedError;

/// Classified result of one webmention send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebmentionOutcome {
    /// The endpoint accepted the mention.
    Accepted,
    /// The target advertises no webmention endpoint; structurally
    /// undeliverable, never retried.
    NoEndpoint,
    /// The endpoint rejected the mention or replied unexpectedly. Retryable.
    Failed { detail: String },
}

#[async_trait]
pub trait WebmentionClient: Send + Sync {
    /// Send one webmention from `source_url` to `target_url`. Transport-level
    /// failures (connect, timeout) surface as Err; everything the remote end
    /// actually said is classified in the outcome.
    async fn send(
        &self,
        source_url: &str,
        target_url: &str,
    ) -> Result<WebmentionOutcome, BackfeedError>;
}

pub struct HttpWebmentionClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebmentionClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn resolve_endpoint(&self, target_url: &str) -> Result<Option<String>, BackfeedError> {
        let resp = self
            .client
            .get(target_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BackfeedError::Http(e.to_string()))?;

        let endpoint = resp
            .headers()
            .get_all(reqwest::header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(webmention_href);

        let endpoint = match endpoint {
            Some(href) => href,
            None => return Ok(None),
        };

        // The header value may be relative to the target.
        let base = Url::parse(target_url).map_err(|e| BackfeedError::Http(e.to_string()))?;
        let resolved = base
            .join(&endpoint)
            .map_err(|e| BackfeedError::Http(e.to_string()))?;
        Ok(Some(resolved.to_string()))
    }
}

#[async_trait]
impl WebmentionClient for HttpWebmentionClient {
    async fn send(
        &self,
        source_url: &str,
        target_url: &str,
    ) -> Result<WebmentionOutcome, BackfeedError> {
        let endpoint = match self.resolve_endpoint(target_url).await? {
            Some(endpoint) => endpoint,
            None => return Ok(WebmentionOutcome::NoEndpoint),
        };
        debug!(endpoint = endpoint.as_str(), target = target_url, "Resolved webmention endpoint");

        let resp = self
            .client
            .post(&endpoint)
            .timeout(self.timeout)
            .form(&[("source", source_url), ("target", target_url)])
            .send()
            .await
            .map_err(|e| BackfeedError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(WebmentionOutcome::Accepted)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Ok(WebmentionOutcome::Failed {
                detail: format!("{status}: {body}"),
            })
        }
    }
}

/// Extract the href of a `rel="webmention"` link from one Link header value.
/// Header form: `<https://example.com/wm>; rel="webmention"`, possibly with
/// several comma-separated links and several space-separated rel tokens.
fn webmention_href(header: &str) -> Option<String> {
    for link in header.split(',') {
        let mut parts = link.split(';');
        let href = parts.next()?.trim();
        let href = href.strip_prefix('<')?.strip_suffix('>')?;

        for param in parts {
            let (key, value) = match param.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            if key.trim() != "rel" {
                continue;
            }
            let value = value.trim().trim_matches('"');
            let is_webmention = value
                .split_ascii_whitespace()
                .any(|rel| rel == "webmention" || rel == "http://webmention.org/");
            if is_webmention {
                return Some(href.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_link_header() {
        assert_eq!(
            webmention_href(r#"<https://example.com/wm>; rel="webmention""#),
            Some("https://example.com/wm".to_string())
        );
    }

    #[test]
    fn parses_unquoted_and_legacy_rel() {
        assert_eq!(
            webmention_href("<https://example.com/wm>; rel=webmention"),
            Some("https://example.com/wm".to_string())
        );
        assert_eq!(
            webmention_href(r#"<https://example.com/wm>; rel="http://webmention.org/""#),
            Some("https://example.com/wm".to_string())
        );
    }

    #[test]
    fn picks_webmention_out_of_multiple_links() {
        let header = r#"<https://example.com/style>; rel="stylesheet", <https://example.com/wm>; rel="webmention""#;
        assert_eq!(
            webmention_href(header),
            Some("https://example.com/wm".to_string())
        );
    }

    #[test]
    fn matches_rel_token_lists() {
        assert_eq!(
            webmention_href(r#"<https://example.com/wm>; rel="webmention somethingelse""#),
            Some("https://example.com/wm".to_string())
        );
    }

    #[test]
    fn ignores_unrelated_links() {
        assert_eq!(
            webmention_href(r#"<https://example.com/next>; rel="next""#),
            None
        );
        assert_eq!(webmention_href("garbage"), None);
    }
}
