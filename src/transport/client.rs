use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::error::{SyncError, TransportFailure};
use crate::transport::http::{ReqwestWire, WireClient};
use crate::transport::{
    ApiResult, Credentials, RequestDescriptor, Sleeper, TokioSleeper, parse_retry_after,
};

/// Remote location and retry policy for a `Transport`.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Host joined with the API prefix, always ending in the prefix.
    pub base_url: String,
    pub credentials: Credentials,
    /// Additional attempts after the first.
    pub retries: u32,
    pub timeout: Duration,
    /// Statuses re-sent immediately (429 is handled separately).
    pub retry_on_status: Vec<u16>,
}

impl TransportSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: join_base_url(&config.remote.host, &config.remote.api_prefix),
            credentials: Credentials::from_config(&config.remote),
            retries: config.transport.retries,
            timeout: config.transport.timeout(),
            retry_on_status: config.transport.retry_on_status.clone(),
        }
    }
}

fn join_base_url(host: &str, prefix: &str) -> String {
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        prefix.trim_start_matches('/')
    )
}

/// Sends API calls with retry, rate-limit compliance and authentication.
///
/// Retries (up to `retries` extra attempts) happen on:
/// - timeouts and connection failures,
/// - HTTP 429, after sleeping exactly the `Retry-After` duration,
/// - statuses listed in `retry_on_status`, immediately.
///
/// Everything else returns after the first attempt.
pub struct Transport {
    wire: Arc<dyn WireClient>,
    sleeper: Arc<dyn Sleeper>,
    settings: TransportSettings,
}

impl Transport {
    pub fn new(wire: Arc<dyn WireClient>, settings: TransportSettings) -> Self {
        Self {
            wire,
            sleeper: Arc::new(TokioSleeper),
            settings,
        }
    }

    /// Production transport over reqwest, honoring proxy and TLS settings.
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let wire = ReqwestWire::new(&config.remote, &config.proxy)?;
        Ok(Self::new(Arc::new(wire), TransportSettings::from_config(config)))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    pub async fn get(&self, path: &str) -> ApiResult {
        self.send(&RequestDescriptor::get(path)).await
    }

    pub async fn post(&self, path: &str, payload: Value) -> ApiResult {
        self.send(&RequestDescriptor::post(path, payload)).await
    }

    /// Timeout and retry budget come from the descriptor when set there.
    pub async fn send(&self, request: &RequestDescriptor) -> ApiResult {
        let url = self.url_for(&request.path);
        let retries = request.retries.unwrap_or(self.settings.retries);
        let timeout = request.timeout.unwrap_or(self.settings.timeout);
        let mut last = ApiResult::transport_failure(TransportFailure::HostIssue);

        for attempt in 0..=retries {
            let has_budget = attempt < retries;

            tracing::debug!(
                method = request.method.as_str(),
                url = %url,
                attempt = attempt + 1,
                payload = ?request.payload,
                "API call"
            );

            let response = match self
                .wire
                .execute(&url, request, &self.settings.credentials, timeout)
                .await
            {
                Ok(response) => response,
                Err(kind) => {
                    last = ApiResult::transport_failure(kind);
                    if kind.is_retryable() && has_budget {
                        tracing::warn!(
                            url = %url,
                            attempt = attempt + 1,
                            ?kind,
                            "request failed, retrying"
                        );
                        continue;
                    }
                    tracing::warn!(url = %url, ?kind, "request failed: {}", kind.message());
                    return last;
                }
            };

            let result = ApiResult::from_response(response.status, &response.body);
            tracing::debug!(
                url = %url,
                status = response.status,
                body = ?result.body,
                "API response"
            );

            if response.status == 429 {
                if !has_budget {
                    return result;
                }
                match response.retry_after.as_deref().and_then(parse_retry_after) {
                    Some(wait) => {
                        tracing::warn!(
                            url = %url,
                            wait_secs = wait.as_secs_f64(),
                            "rate limited, waiting as instructed"
                        );
                        self.sleeper.sleep(wait).await;
                    }
                    None => {
                        tracing::warn!(url = %url, "rate limited without a usable Retry-After, retrying");
                    }
                }
                last = result;
                continue;
            }

            if self.settings.retry_on_status.contains(&response.status) && has_budget {
                tracing::warn!(url = %url, status = response.status, "server error, retrying");
                last = result;
                continue;
            }

            return result;
        }

        last
    }
}
