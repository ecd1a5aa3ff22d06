use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, NoProxy, Proxy};

use crate::config::{ProxyConfig, RemoteConfig};
use crate::error::{SyncError, TransportFailure};
use crate::transport::{Credentials, Method, RequestDescriptor};

const USER_AGENT: &str = concat!("trsync/", env!("CARGO_PKG_VERSION"));

/// Raw HTTP exchange before any decoding.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    /// `Retry-After` header, verbatim.
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

/// A single HTTP attempt. No retries, no decoding: `Transport` owns both.
#[async_trait]
pub trait WireClient: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        request: &RequestDescriptor,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<WireResponse, TransportFailure>;
}

pub struct ReqwestWire {
    client: Client,
}

impl ReqwestWire {
    pub fn new(remote: &RemoteConfig, proxy: &ProxyConfig) -> Result<Self, SyncError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!remote.verify_tls);

        if let Some(proxy) = build_proxy(proxy)? {
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Translate proxy settings into a reqwest proxy covering http and https.
fn build_proxy(config: &ProxyConfig) -> Result<Option<Proxy>, SyncError> {
    let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };

    let mut proxy = Proxy::all(&url)
        .map_err(|e| SyncError::Config(format!("invalid proxy configuration: {e}")))?;

    if let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) {
        let (name, password) = user.split_once(':').unwrap_or((user, ""));
        proxy = proxy.basic_auth(name, password);
    }

    if !config.bypass.is_empty() {
        proxy = proxy.no_proxy(NoProxy::from_string(&config.bypass.join(",")));
    }

    tracing::debug!(proxy = %url, bypass = ?config.bypass, "proxy configured");
    Ok(Some(proxy))
}

fn classify(err: &reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::NoResponse
    } else if err.is_connect() {
        TransportFailure::Connection
    } else {
        TransportFailure::HostIssue
    }
}

#[async_trait]
impl WireClient for ReqwestWire {
    async fn execute(
        &self,
        url: &str,
        request: &RequestDescriptor,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<WireResponse, TransportFailure> {
        let mut req = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .basic_auth(&credentials.username, Some(credentials.secret()))
        .timeout(timeout);

        for (name, value) in &request.headers {
            req = req.header(name, value);
        }

        if request.is_multipart() {
            let mut form = Form::new();
            for attachment in &request.attachments {
                let part = Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone());
                form = form.part(attachment.field.clone(), part);
            }
            req = req.multipart(form);
        } else {
            req = req.header("Content-Type", "application/json");
            if let Some(payload) = &request.payload {
                req = req.json(payload);
            }
        }

        let response = req.send().await.map_err(|e| {
            let kind = classify(&e);
            tracing::debug!(url = %url, error = %e, ?kind, "HTTP request failed");
            kind
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| classify(&e))?.to_vec();

        Ok(WireResponse {
            status,
            retry_after,
            body,
        })
    }
}
