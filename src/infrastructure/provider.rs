use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::json;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Credit-consuming AI features. One invocation costs one credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FeatureKind {
    Generate,
    Grammar,
    Seo,
}

/// External collaborator performing the actual AI work. The Feature
/// Gate calls through this seam so tests can substitute a mock.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    #[must_use]
    async fn run(&self, feature: FeatureKind, input: &str) -> Result<String, ProviderError>;
}

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503)
}

pub struct HttpContentProvider {
    client: Client,
    base_url: String,
}

impl HttpContentProvider {
    pub fn new(api_key: String, base_url: String) -> Result<Self, ProviderError> {
        let mut headers = header::HeaderMap::new();
        let auth_value = match header::HeaderValue::from_str(&format!("Bearer {}", api_key)) {
            Ok(val) => val,
            Err(e) => {
                return Err(ProviderError::InvalidConfig(format!(
                    "Invalid API key format: {}",
                    e
                )))
            }
        };
        headers.insert(header::AUTHORIZATION, auth_value);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, base_url })
    }

    fn instruction(feature: FeatureKind) -> &'static str {
        match feature {
            FeatureKind::Generate => "You are a content writer. Write the requested content.",
            FeatureKind::Grammar => "Check the following text for grammar issues and correct them.",
            FeatureKind::Seo => "Analyze the following content for SEO and suggest improvements.",
        }
    }

    async fn send_with_retry(
        &self,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error: Option<String> = None;

        for attempt in 0..MAX_RETRIES {
            let response = self.client.post(&url).json(&body).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if status == 429 {
                        return Err(ProviderError::RateLimited);
                    }

                    if is_retryable_status(status) && attempt < MAX_RETRIES - 1 {
                        let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        sleep(Duration::from_millis(backoff)).await;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if attempt < MAX_RETRIES - 1 {
                        let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(ProviderError::RequestFailed(
            last_error.unwrap_or_else(|| "Max retries exceeded".to_string()),
        ))
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn run(&self, feature: FeatureKind, input: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": Self::instruction(feature)},
                {"role": "user", "content": input},
            ],
        });

        let resp = self.send_with_retry(body).await?;
        let status = resp.status();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "status {}: {}",
                status, text
            )));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing completion content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn feature_kind_parses_route_segments() {
        assert_eq!(FeatureKind::from_str("generate").unwrap(), FeatureKind::Generate);
        assert_eq!(FeatureKind::from_str("grammar").unwrap(), FeatureKind::Grammar);
        assert_eq!(FeatureKind::from_str("seo").unwrap(), FeatureKind::Seo);
        assert!(FeatureKind::from_str("plagiarism").is_err());
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(429));
    }
}
