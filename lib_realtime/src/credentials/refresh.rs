//! HTTP exchange of a refresh token for a new access token.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};

use crate::error::{RealtimeError, Result};

/// Upper bound for one refresh request, retries excluded.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "token", alias = "access_token")]
    access_token: String,
    /// Rotated refresh token, when the server issues one.
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// POSTs `{"refreshToken": ...}` to the endpoint and expects
/// `{"accessToken": ..., "refreshToken"?: ...}` back. Transient failures are
/// retried with exponential backoff.
pub struct RefreshClient {
    inner: ClientWithMiddleware,
    endpoint: Url,
    refresh_token: Mutex<String>,
}

impl RefreshClient {
    pub fn new(endpoint: &str, refresh_token: String) -> Result<Self> {
        Self::with_timeout(endpoint, refresh_token, REQUEST_TIMEOUT)
    }

    /// Like `new`, with a custom per-request timeout.
    pub fn with_timeout(endpoint: &str, refresh_token: String, request_timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RealtimeError::Refresh(e.to_string()))?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            inner,
            endpoint,
            refresh_token: Mutex::new(refresh_token),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the new access token.
    pub async fn exchange(&self) -> Result<String> {
        let current = self
            .refresh_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let body = serde_json::to_string(&RefreshRequest {
            refresh_token: &current,
        })?;

        let response = self
            .inner
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| RealtimeError::Refresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RealtimeError::Refresh(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RealtimeError::Refresh(e.to_string()))?;

        if let Some(rotated) = parsed.refresh_token {
            *self.refresh_token.lock().unwrap_or_else(PoisonError::into_inner) = rotated;
        }
        log::info!("Access token refreshed via {}", self.endpoint);
        Ok(parsed.access_token)
    }
}
