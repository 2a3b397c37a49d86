//! CLI side of the device flow: start a login, poll until approved, keep the key.

pub mod credentials;

pub use credentials::{CredentialStore, FileCredentialStore, StoredCredential};

use std::time::Duration as StdDuration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::device::{
    ApproveRequest, ApproveResponse, ErrorBody, ErrorCode, IssuedKey, PollOutcome, PollRequest,
    PollResponse, StartRequest, StartResponse,
};
use crate::error::{KeygateError, Result};

/// HTTP client for a keygate server.
///
/// # Example
/// ```no_run
/// use keygate::client::LoginClient;
///
/// # async fn run() -> keygate::error::Result<()> {
/// let client = LoginClient::new("http://127.0.0.1:8787");
/// let session = client.start(Some("laptop")).await?;
/// println!("Open {} and enter {}", session.verification_uri, session.user_code);
/// let key = client.wait_for_key(&session).await?;
/// # let _ = key;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LoginClient {
    client: reqwest::Client,
    base_url: String,
    min_interval: StdDuration,
}

impl LoginClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            min_interval: StdDuration::from_secs(1),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Lower bound for the wait between polls. The server's interval wins when larger.
    pub fn with_min_interval(mut self, interval: StdDuration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn start(&self, client_name: Option<&str>) -> Result<StartResponse> {
        let body = StartRequest {
            client_name: client_name.map(str::to_string),
        };
        let resp = self
            .client
            .post(self.url("/device/start"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// One poll. `invalid_code` is an outcome here, not an error.
    pub async fn poll(&self, device_code: &str) -> Result<PollOutcome> {
        let body = PollRequest {
            device_code: device_code.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/device/poll"))
            .json(&body)
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK | StatusCode::BAD_REQUEST => {
                let parsed: PollResponse = read_json(resp).await?;
                Ok(parsed.into())
            }
            _ => Err(error_from_response(resp).await),
        }
    }

    /// Poll every `interval` seconds until the key arrives or the flow ends.
    ///
    /// Transient failures are retried until the session's `expires_in` elapses.
    pub async fn wait_for_key(&self, session: &StartResponse) -> Result<IssuedKey> {
        let interval = StdDuration::from_secs(session.interval).max(self.min_interval);
        let budget = StdDuration::from_secs(session.expires_in) + interval;
        let deadline = Instant::now() + budget;

        loop {
            tokio::time::sleep(interval).await;
            match self.poll(&session.device_code).await {
                Ok(PollOutcome::Approved { key }) => return Ok(key),
                Ok(outcome) if outcome.is_terminal() => return Err(ended(outcome)),
                Ok(_) => debug!("authorization pending"),
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "poll failed, retrying");
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Err(KeygateError::Timeout(budget.as_millis() as u64));
            }
        }
    }

    /// Approve a pending login. The server must expose its approval routes.
    pub async fn approve(&self, user_code: &str) -> Result<ApproveResponse> {
        let body = ApproveRequest {
            user_code: user_code.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/device/approve"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn ended(outcome: PollOutcome) -> KeygateError {
    let code = match outcome {
        PollOutcome::Consumed => ErrorCode::AlreadyUsed,
        PollOutcome::Expired => ErrorCode::Expired,
        _ => ErrorCode::InvalidCode,
    };
    KeygateError::Flow(code)
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn error_from_response(resp: reqwest::Response) -> KeygateError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let code = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.error);
    let message = match code {
        Some(code) => code.to_string(),
        None if text.is_empty() => status.to_string(),
        None => text,
    };
    KeygateError::Api {
        status: status.as_u16(),
        message,
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_flows_map_to_error_codes() {
        assert!(matches!(
            ended(PollOutcome::Consumed),
            KeygateError::Flow(ErrorCode::AlreadyUsed)
        ));
        assert!(matches!(
            ended(PollOutcome::Expired),
            KeygateError::Flow(ErrorCode::Expired)
        ));
        assert!(matches!(
            ended(PollOutcome::InvalidCode),
            KeygateError::Flow(ErrorCode::InvalidCode)
        ));
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = LoginClient::new("http://localhost:8787/");
        assert_eq!(client.base_url(), "http://localhost:8787");
        assert_eq!(client.url("/device/poll"), "http://localhost:8787/device/poll");
    }
}
