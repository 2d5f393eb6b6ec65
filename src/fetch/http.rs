//! HTTP plumbing shared by every upstream candidate
//!
//! Maps the outcome of a GET onto `CandidateError` so callers only ever deal
//! with one error type per attempt.

use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde_json::Value;

use super::fallback::CandidateError;

/// Default transport timeout for a single upstream request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Some public finance hosts reject requests without a browser-like agent
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; skydesk/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Longest upstream error body kept in a `CandidateError`
const MAX_ERROR_BODY: usize = 200;

/// Thin wrapper over a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Creates a source whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GETs `url` and decodes the body as JSON
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<Value, CandidateError> {
        let text = self.get_text(url, query, headers).await?;
        serde_json::from_str(&text).map_err(|e| CandidateError::Decode(e.to_string()))
    }

    /// GETs `url` and returns the raw body
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<String, CandidateError> {
        let response = self.send(Method::GET, url, query, headers).await?;
        response
            .text()
            .await
            .map_err(|e| CandidateError::Transport(e.to_string()))
    }

    /// POSTs to `url` with an empty body and decodes the JSON reply
    pub async fn post_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Value, CandidateError> {
        let response = self.send(Method::POST, url, query, &[]).await?;
        response
            .json()
            .await
            .map_err(|e| CandidateError::Decode(e.to_string()))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<Response, CandidateError> {
        let mut request = self.client.request(method, url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CandidateError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CandidateError::UpstreamStatus {
                status: status.as_u16(),
                body: truncate(body.trim(), MAX_ERROR_BODY),
            });
        }
        Ok(response)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
