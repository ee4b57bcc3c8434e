use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::FetchError;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; listing-ingest/0.1; +https://example.com/bot)";

/// HTTP client shared by the site adapters. Every request carries the
/// configured timeout, and responses are classified into [`FetchError`]s.
#[derive(Debug, Clone)]
pub struct PageClient {
    client: Client,
}

impl PageClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(FetchError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| classify_transport_error(url, &e))
    }
}

fn classify_transport_error(url: &Url, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transient {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}
