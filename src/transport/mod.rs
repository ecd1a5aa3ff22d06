pub mod client;
pub mod http;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::{SyncError, TransportFailure};

/// Prefix some legacy servers prepend to every body after basic auth.
const LEGACY_AUTH_BANNER: &[u8] = b"USER AUTHENTICATION SUCCESSFUL!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Everything needed to (re)send one API call. Built fresh per call and
/// resent unchanged on retry.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Endpoint relative to the API prefix, e.g. `get_cases/1&suite_id=2`.
    pub path: String,
    pub payload: Option<Value>,
    pub attachments: Vec<Attachment>,
    pub headers: Vec<(String, String)>,
    /// Per-call timeout; the transport default when `None`.
    pub timeout: Option<Duration>,
    /// Per-call retry budget (extra attempts); the transport default when `None`.
    pub retries: Option<u32>,
}

impl RequestDescriptor {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            payload: None,
            attachments: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            retries: None,
        }
    }

    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            payload: Some(payload),
            attachments: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            retries: None,
        }
    }

    /// POST with no JSON body; add parts with `with_attachment`.
    pub fn upload(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            payload: None,
            attachments: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            retries: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// JSON content type is only declared when no multipart parts are sent.
    pub fn is_multipart(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Decoded response body: structured when it parsed as JSON, raw otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Json(v) => v,
            Self::Text(s) => Value::String(s),
        }
    }
}

/// Outcome of one `Transport::send`.
///
/// `status` is `None` when no HTTP response was received at all; `failure`
/// then carries the classified cause. `error` is empty exactly when the call
/// succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    pub status: Option<u16>,
    pub body: Body,
    pub error: String,
    pub failure: Option<TransportFailure>,
}

impl ApiResult {
    pub fn transport_failure(kind: TransportFailure) -> Self {
        Self {
            status: None,
            body: Body::Text(String::new()),
            error: kind.message().to_string(),
            failure: Some(kind),
        }
    }

    /// Decode a raw HTTP response. Success is decided by status alone; the
    /// body only contributes the error text on non-2xx responses.
    pub fn from_response(status: u16, raw: &[u8]) -> Self {
        let raw = raw.strip_prefix(LEGACY_AUTH_BANNER).unwrap_or(raw);
        let success = (200..300).contains(&status);

        let body = if raw.iter().all(u8::is_ascii_whitespace) {
            if success {
                Body::Json(Value::Object(Default::default()))
            } else {
                Body::Text(String::new())
            }
        } else {
            match serde_json::from_slice::<Value>(raw) {
                Ok(v) => Body::Json(v),
                Err(_) => Body::Text(String::from_utf8_lossy(raw).into_owned()),
            }
        };

        let error = if success {
            String::new()
        } else {
            let from_body = match &body {
                Body::Json(v) => v.get("error").and_then(Value::as_str).map(str::to_string),
                Body::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
                Body::Text(_) => None,
            };
            from_body
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("HTTP {status}"))
        };

        Self {
            status: Some(status),
            body,
            error,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }

    pub fn json(&self) -> Option<&Value> {
        self.body.as_json()
    }

    /// Convert into the crate's error model, dropping the status on success.
    pub fn into_value(self) -> Result<Value, SyncError> {
        if self.is_success() {
            return Ok(self.body.into_value());
        }
        match (self.status, self.failure) {
            (Some(status), _) => Err(SyncError::Remote {
                status,
                message: self.error,
            }),
            (None, Some(kind)) => Err(SyncError::Transport(kind)),
            (None, None) => Err(SyncError::Other(self.error)),
        }
    }
}

/// Basic-auth credentials. The API key, when set, replaces the password.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub api_key: String,
}

impl Credentials {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            username: remote.username.clone(),
            password: remote.password.clone(),
            api_key: remote.api_key.clone(),
        }
    }

    pub fn secret(&self) -> &str {
        if self.api_key.is_empty() {
            &self.password
        } else {
            &self.api_key
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Waits between attempts. Injected so tests can observe the requested
/// duration without real elapsed time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Parse a `Retry-After` value given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
