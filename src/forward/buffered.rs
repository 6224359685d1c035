//! Buffered upstream fetch.
//!
//! One GET per call through a non-pooling `reqwest` client: no redirects
//! followed, no retries, no keep-alive. The body is read up to a cap and
//! truncated past it.

use std::error::Error as _;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONNECTION};

use crate::config::{LimitsConfig, UpstreamConfig};
use crate::forward::{UpstreamError, UpstreamResponse};
use crate::http::Headers;
use crate::session::Target;

/// Fetches a whole upstream response into memory.
#[derive(Debug, Clone)]
pub struct BufferedForwarder {
    client: reqwest::Client,
    timeout: Duration,
    max_body: usize,
}

impl BufferedForwarder {
    pub fn new(upstream: &UpstreamConfig, limits: &LimitsConfig) -> Result<Self, UpstreamError> {
        let timeout = Duration::from_secs(upstream.timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(upstream.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            max_body: limits.max_buffered_body_bytes,
        })
    }

    /// GET `path_and_query` on `target` and buffer the response.
    pub async fn fetch(
        &self,
        target: &Target,
        path_and_query: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = target.url_for(path_and_query);
        tracing::debug!(url = %url, "Fetching upstream");

        let mut response = self
            .client
            .get(&url)
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "close")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        // hyper keeps the upstream phrase only when it differs from the
        // canonical one.
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            let room = self.max_body.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        if truncated {
            tracing::warn!(
                url = %url,
                limit = self.max_body,
                "Upstream body exceeded buffer cap, truncated"
            );
        }

        Ok(UpstreamResponse {
            status: status.as_u16(),
            reason,
            headers,
            body,
            truncated,
        })
    }

    fn classify(&self, error: reqwest::Error) -> UpstreamError {
        if error.is_timeout() {
            return UpstreamError::Timeout(self.timeout);
        }
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        UpstreamError::Unavailable(message)
    }
}
