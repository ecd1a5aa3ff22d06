use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchExecutor, BatchReport, Progress};
use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::config::Config;
use crate::error::SyncError;
use crate::pagination::{Collection, PageFetcher};
use crate::transport::client::Transport;
use crate::transport::{Attachment, RequestDescriptor};
use crate::validation::{
    Confirmation, EntityScope, MatcherKind, RemoteLookup, Thresholds, ValidationStrategist,
};
use crate::verify::{verify_echo, verify_echo_list};

/// One POST in a batch.
#[derive(Debug, Clone)]
pub struct Submission {
    pub path: String,
    pub payload: Value,
    /// Progress units this submission accounts for.
    pub units: u64,
    /// When set, `payload[items_key]` is a list echoed back as a list.
    pub items_key: Option<String>,
}

impl Submission {
    pub fn new(path: impl Into<String>, payload: Value) -> Self {
        Self {
            path: path.into(),
            payload,
            units: 1,
            items_key: None,
        }
    }

    /// Split `items` into chunks of at most `size`, each posted as
    /// `{items_key: [...]}` and weighted by its length.
    pub fn chunked(path: &str, items_key: &str, items: Vec<Value>, size: usize) -> Vec<Self> {
        items
            .chunks(size.max(1))
            .map(|chunk| {
                let mut payload = serde_json::Map::new();
                payload.insert(items_key.to_string(), Value::Array(chunk.to_vec()));
                Self {
                    path: path.to_string(),
                    payload: Value::Object(payload),
                    units: chunk.len() as u64,
                    items_key: Some(items_key.to_string()),
                }
            })
            .collect()
    }

    fn echo_matches(&self, returned: &Value) -> bool {
        match &self.items_key {
            Some(key) => match (
                self.payload.get(key).and_then(Value::as_array),
                returned.as_array(),
            ) {
                (Some(sent), Some(echoed)) => verify_echo_list(sent, echoed),
                _ => false,
            },
            None => verify_echo(&self.payload, returned),
        }
    }
}

/// Entry point for one synchronization session: owns the transport and the
/// response cache, and builds a fresh worker pool per operation.
pub struct SyncEngine {
    config: Config,
    transport: Arc<Transport>,
    cache: ResponseCache<Value>,
    progress: Progress,
}

impl SyncEngine {
    pub fn new(config: Config) -> Result<Self, SyncError> {
        let transport = Transport::from_config(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: Config, transport: Transport) -> Self {
        let cache = ResponseCache::new(config.cache.max_size);
        Self {
            config,
            transport: Arc::new(transport),
            cache,
            progress: Progress::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Units completed by every batch submitted through this engine.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Every item of a paginated collection. Cached per collection unless
    /// `force_refresh`, under a key separate from `get` on the same path.
    /// Failures are never cached.
    pub async fn fetch_all(
        &self,
        collection: &Collection,
        force_refresh: bool,
    ) -> Result<Vec<Value>, SyncError> {
        let key = CacheKey::collection(&collection.path, &collection.items_key);
        let value = self
            .cache
            .get_or_fetch(&key, force_refresh, || async {
                let fetcher = PageFetcher::new(
                    self.transport.clone(),
                    self.config.pagination.clone(),
                    self.config.workers.pages,
                );
                fetcher.fetch_all(collection).await.map(Value::Array)
            })
            .await?;

        match value {
            Value::Array(items) => Ok(items),
            other => Err(SyncError::InvalidPage {
                path: collection.path.clone(),
                reason: format!("cached entry is not a list: {other}"),
            }),
        }
    }

    /// Single cached GET.
    pub async fn get(&self, path: &str, force_refresh: bool) -> Result<Value, SyncError> {
        let key = CacheKey::from_path(path);
        self.cache
            .get_or_fetch(&key, force_refresh, || async {
                self.transport.get(path).await.into_value()
            })
            .await
    }

    /// Uncached POST.
    pub async fn post(&self, path: &str, payload: Value) -> Result<Value, SyncError> {
        self.transport.post(path, payload).await.into_value()
    }

    /// Multipart upload, e.g. `add_attachment_to_result/{id}`. Uncached.
    pub async fn attach(&self, path: &str, attachment: Attachment) -> Result<Value, SyncError> {
        let request = RequestDescriptor::upload(path).with_attachment(attachment);
        self.transport.send(&request).await.into_value()
    }

    /// Split `items` into submissions of at most `batch.size` entries each.
    pub fn chunk(&self, path: &str, items_key: &str, items: Vec<Value>) -> Vec<Submission> {
        Submission::chunked(path, items_key, items, self.config.batch.size)
    }

    /// POST every submission concurrently on `workers.batch`; the first
    /// failure (or echo mismatch with `batch.verify` on) aborts the rest.
    pub async fn submit_batch(
        &self,
        submissions: Vec<Submission>,
        interrupt: Option<CancellationToken>,
    ) -> BatchReport<Value> {
        let mut executor =
            BatchExecutor::new(self.config.workers.batch).with_progress(self.progress.clone());
        if let Some(token) = interrupt {
            executor = executor.with_interrupt(token);
        }

        let transport = self.transport.clone();
        let verify = self.config.batch.verify;
        let total = submissions.len();
        tracing::info!(total, verify, "submitting batch");

        let report = executor
            .run_weighted(
                submissions,
                |s| s.units,
                move |submission: Submission| {
                    let transport = transport.clone();
                    async move {
                        let returned = transport
                            .post(&submission.path, submission.payload.clone())
                            .await
                            .into_value()?;
                        if verify && !submission.echo_matches(&returned) {
                            return Err(SyncError::DataIntegrity {
                                path: submission.path,
                            });
                        }
                        Ok(returned)
                    }
                },
            )
            .await;

        tracing::info!(
            total,
            succeeded = report.results.len(),
            cancelled = report.cancelled,
            "batch finished"
        );
        report
    }

    /// Confirm that `candidates` exist in `scope`, choosing the cheapest
    /// strategy for the report size.
    pub async fn confirm_ids(
        &self,
        scope: &EntityScope,
        matcher: MatcherKind,
        candidates: &BTreeSet<u64>,
        all_present_locally: bool,
        total_local_count: usize,
    ) -> Result<Confirmation, SyncError> {
        let strategist = ValidationStrategist::new(
            matcher,
            Thresholds::from(&self.config.validation),
            self.config.workers.validation,
        );
        strategist
            .confirm_ids(self, scope, candidates, all_present_locally, total_local_count)
            .await
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.cache.invalidate_pattern(pattern)
    }

    /// Drop every entry, keeping hit/miss counters.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Drop every entry and reset the counters.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Log cache effectiveness at the end of a session.
    pub fn finish(&self) {
        let stats = self.stats();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            size = stats.size,
            hit_rate = %format!("{:.1}%", stats.hit_rate),
            "cache statistics"
        );
    }
}

#[async_trait]
impl RemoteLookup for SyncEngine {
    async fn fetch_collection(&self, collection: &Collection) -> Result<Vec<Value>, SyncError> {
        self.fetch_all(collection, false).await
    }

    async fn fetch_entity(&self, path: &str) -> Result<Value, SyncError> {
        self.transport.get(path).await.into_value()
    }
}
