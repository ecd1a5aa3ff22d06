use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::SyncError;

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "trsync.toml";

/// Top-level configuration for one engine session.
///
/// Loaded from `trsync.toml` (or the file named by `TRSYNC_CONFIG`), then
/// overridden by `TRSYNC_*` environment variables. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub transport: TransportConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub workers: WorkerConfig,
    pub validation: ValidationConfig,
    pub batch: BatchConfig,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    /// Path between the host and the endpoint name.
    pub api_prefix: String,
    pub username: String,
    pub password: String,
    /// Preferred over `password` when non-empty.
    pub api_key: String,
    /// Verify TLS certificates. Disable only for self-signed test servers.
    pub verify_tls: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_prefix: "index.php?/api/v2/".to_string(),
            username: String::new(),
            password: String::new(),
            api_key: String::new(),
            verify_tls: true,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("api_prefix", &self.api_prefix)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("api_key", &redacted(&self.api_key))
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Additional attempts after the first one.
    pub retries: u32,
    pub timeout_secs: f64,
    /// Statuses re-sent without sleeping (429 always retries, honoring Retry-After).
    pub retry_on_status: Vec<u16>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_secs: 30.0,
            retry_on_status: vec![500, 502],
        }
    }
}

impl TransportConfig {
    /// Per-call timeout; non-finite or non-positive values fall back to the default.
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs.is_finite() && self.timeout_secs > 0.0 {
            Duration::from_secs_f64(self.timeout_secs)
        } else {
            tracing::warn!(
                timeout_secs = self.timeout_secs,
                "invalid timeout, using default of 30s"
            );
            Duration::from_secs(30)
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy URL; `http://` is assumed when no scheme is given.
    pub url: Option<String>,
    /// `user:password` for proxy basic auth.
    pub user: Option<String>,
    /// Hosts (or patterns) that bypass the proxy.
    pub bypass: Vec<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("user", &self.user.as_ref().map(|_| "[REDACTED]"))
            .field("bypass", &self.bypass)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size: 512 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Fan page requests out over a worker pool instead of following `next`.
    pub parallel: bool,
    /// Page requests per fan-out round.
    pub batch_pages: usize,
    /// Hard cap on pages fetched in parallel mode.
    pub max_pages: usize,
    /// Consecutive empty pages treated as the end of the collection.
    pub empty_page_streak: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            batch_pages: 100,
            max_pages: 10_000,
            empty_page_streak: 10,
        }
    }
}

/// Worker pool sizes, one per operation class.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub pages: usize,
    pub batch: usize,
    pub validation: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pages: 10,
            batch: 10,
            validation: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Above this many candidates (with none missing), ids are trusted.
    pub large_batch_threshold: usize,
    /// At or above this many local items (with some missing), fetch in bulk.
    pub large_report_threshold: usize,
    /// Up to this many candidates are checked one after another.
    pub sequential_limit: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            large_batch_threshold: 1000,
            large_report_threshold: 1000,
            sequential_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Results per submitted chunk.
    pub size: usize,
    /// Compare remote echoes against submitted payloads.
    pub verify: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 50,
            verify: false,
        }
    }
}

impl Config {
    /// Load config from `TRSYNC_CONFIG` or `./trsync.toml` (missing file is fine),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, SyncError> {
        let path = env::var("TRSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&text)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self, SyncError> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Environment variables win over file values.
    pub fn apply_env(&mut self) {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = var("TRSYNC_HOST") {
            self.remote.host = v;
        }
        if let Some(v) = var("TRSYNC_USERNAME") {
            self.remote.username = v;
        }
        if let Some(v) = var("TRSYNC_PASSWORD") {
            self.remote.password = v;
        }
        if let Some(v) = var("TRSYNC_API_KEY") {
            self.remote.api_key = v;
        }
        if let Some(v) = var("TRSYNC_PROXY") {
            self.proxy.url = Some(v);
        }
        if let Some(v) = var("TRSYNC_PROXY_USER") {
            self.proxy.user = Some(v);
        }
        if let Some(v) = var("TRSYNC_NOPROXY") {
            self.proxy.bypass = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Reject configurations that would deadlock or loop forever.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.remote.host.is_empty() {
            return Err(SyncError::Config(
                "remote host is not set (TRSYNC_HOST or [remote].host)".to_string(),
            ));
        }
        if self.cache.max_size == 0 {
            return Err(SyncError::Config("cache.max_size must be at least 1".to_string()));
        }
        for (name, size) in [
            ("workers.pages", self.workers.pages),
            ("workers.batch", self.workers.batch),
            ("workers.validation", self.workers.validation),
            ("pagination.batch_pages", self.pagination.batch_pages),
            ("pagination.empty_page_streak", self.pagination.empty_page_streak),
            ("batch.size", self.batch.size),
        ] {
            if size == 0 {
                return Err(SyncError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "[REDACTED]" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.transport.retries, 3);
        assert_eq!(config.transport.retry_on_status, vec![500, 502]);
        assert_eq!(config.cache.max_size, 512);
        assert!(!config.pagination.parallel);
        assert_eq!(config.pagination.batch_pages, 100);
        assert_eq!(config.pagination.empty_page_streak, 10);
        assert_eq!(config.validation.large_batch_threshold, 1000);
        assert_eq!(config.validation.large_report_threshold, 1000);
        assert_eq!(config.validation.sequential_limit, 50);
        assert_eq!(config.remote.api_prefix, "index.php?/api/v2/");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [remote]
            host = "https://example.testrail.io"
            username = "ci@example.com"

            [pagination]
            parallel = true

            [workers]
            pages = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.host, "https://example.testrail.io");
        assert!(config.pagination.parallel);
        assert_eq!(config.pagination.max_pages, 10_000);
        assert_eq!(config.workers.pages, 4);
        assert_eq!(config.workers.batch, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = Config::from_toml("[remote\nhost=").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let mut config = Config::default();
        config.remote.host = "https://example.testrail.io".to_string();
        config.workers.validation = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.validation"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = Config::default();
        config.remote.host = "https://example.testrail.io".to_string();
        config.batch.size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch.size"));
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.remote.password = "hunter2".to_string();
        config.remote.api_key = "key-123".to_string();
        config.proxy.user = Some("proxy:secret".to_string());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("key-123"));
        assert!(!dbg.contains("proxy:secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn nonpositive_timeout_falls_back() {
        let transport = TransportConfig {
            timeout_secs: -1.0,
            ..TransportConfig::default()
        };
        assert_eq!(transport.timeout(), Duration::from_secs(30));
    }
}
