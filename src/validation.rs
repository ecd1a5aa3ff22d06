use std::collections::BTreeSet;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ValidationConfig;
use crate::error::SyncError;
use crate::pagination::Collection;

/// How local entities are associated with remote ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    /// Resolved by an automation attribute; needs the full collection anyway.
    AutomationId,
    Name,
    Property,
}

impl MatcherKind {
    pub fn keys_on_ids(&self) -> bool {
        !matches!(self, Self::AutomationId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Above this many candidates (with nothing missing) ids are trusted.
    pub large_batch: usize,
    /// At or above this many local items (with something missing) one bulk fetch is used.
    pub large_report: usize,
    /// Individual checks run sequentially up to this many candidates.
    pub sequential_limit: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for Thresholds {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            large_batch: config.large_batch_threshold,
            large_report: config.large_report_threshold,
            sequential_limit: config.sequential_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FetchForMatching,
    Trust,
    BulkFetch,
    Individual { parallel: bool },
}

/// Pick the cheapest way to confirm candidate ids. Rules in priority order:
///
/// 1. matcher not keyed on ids: fetch the collection for matching;
/// 2. nothing missing and more than `large_batch` candidates: trust them;
/// 3. something missing and `total_local_count >= large_report`: one bulk fetch;
/// 4. otherwise check individually, in parallel above `sequential_limit`.
pub fn select_strategy(
    matcher: MatcherKind,
    candidate_count: usize,
    missing_count: usize,
    total_local_count: usize,
    thresholds: &Thresholds,
) -> Strategy {
    if !matcher.keys_on_ids() {
        return Strategy::FetchForMatching;
    }
    if missing_count == 0 && candidate_count > thresholds.large_batch {
        return Strategy::Trust;
    }
    if missing_count > 0 && total_local_count >= thresholds.large_report {
        return Strategy::BulkFetch;
    }
    Strategy::Individual {
        parallel: candidate_count > thresholds.sequential_limit,
    }
}

/// Remote side of validation. Implemented by the engine; stubbed in tests.
#[async_trait]
pub trait RemoteLookup: Send + Sync {
    async fn fetch_collection(&self, collection: &Collection) -> Result<Vec<Value>, SyncError>;

    async fn fetch_entity(&self, path: &str) -> Result<Value, SyncError>;
}

/// Where candidate ids live remotely.
#[derive(Debug, Clone)]
pub struct EntityScope {
    /// Full collection used for bulk and matching fetches.
    pub collection: Collection,
    /// Single-entity endpoint; the id is appended, e.g. `get_case/`.
    pub entity_path_prefix: String,
    /// Field on the entity naming its container.
    pub container_field: String,
    pub container_id: u64,
}

impl EntityScope {
    /// Cases of one suite in a project.
    pub fn cases(project_id: u64, suite_id: u64) -> Self {
        Self {
            collection: Collection::new(
                format!("get_cases/{project_id}&suite_id={suite_id}"),
                "cases",
            ),
            entity_path_prefix: "get_case/".to_string(),
            container_field: "suite_id".to_string(),
            container_id: suite_id,
        }
    }

    fn entity_path(&self, id: u64) -> String {
        format!("{}{id}", self.entity_path_prefix)
    }
}

#[derive(Debug)]
pub struct Confirmation {
    pub strategy: Strategy,
    pub confirmed: BTreeSet<u64>,
    /// `Unconfirmed` naming every candidate that could not be confirmed.
    pub error: Option<SyncError>,
    /// Collection fetched by `FetchForMatching`, for the caller's matcher.
    pub fetched: Option<Vec<Value>>,
}

impl Confirmation {
    fn new(strategy: Strategy, candidates: &BTreeSet<u64>, confirmed: BTreeSet<u64>) -> Self {
        let missing: Vec<u64> = candidates.difference(&confirmed).copied().collect();
        let error = (!missing.is_empty()).then(|| SyncError::Unconfirmed { ids: missing });
        Self {
            strategy,
            confirmed,
            error,
            fetched: None,
        }
    }
}

pub struct ValidationStrategist {
    matcher: MatcherKind,
    thresholds: Thresholds,
    workers: usize,
}

impl ValidationStrategist {
    pub fn new(matcher: MatcherKind, thresholds: Thresholds, workers: usize) -> Self {
        Self {
            matcher,
            thresholds,
            workers: workers.max(1),
        }
    }

    /// Confirm which `candidates` exist remotely inside `scope`.
    ///
    /// `Err` only when a collection fetch fails; unconfirmed ids are reported
    /// through `Confirmation::error`.
    pub async fn confirm_ids(
        &self,
        lookup: &dyn RemoteLookup,
        scope: &EntityScope,
        candidates: &BTreeSet<u64>,
        all_present_locally: bool,
        total_local_count: usize,
    ) -> Result<Confirmation, SyncError> {
        let missing_count = if all_present_locally {
            0
        } else {
            total_local_count.saturating_sub(candidates.len()).max(1)
        };
        let strategy = select_strategy(
            self.matcher,
            candidates.len(),
            missing_count,
            total_local_count,
            &self.thresholds,
        );
        tracing::info!(
            ?strategy,
            candidates = candidates.len(),
            missing = missing_count,
            total = total_local_count,
            "validation strategy selected"
        );

        match strategy {
            Strategy::FetchForMatching => {
                let items = lookup.fetch_collection(&scope.collection).await?;
                let remote = item_ids(&items);
                let confirmed = candidates.intersection(&remote).copied().collect();
                let mut confirmation = Confirmation::new(strategy, candidates, confirmed);
                confirmation.fetched = Some(items);
                Ok(confirmation)
            }
            Strategy::Trust => {
                tracing::info!(
                    count = candidates.len(),
                    "all local items carry ids, trusting them without validation"
                );
                Ok(Confirmation::new(strategy, candidates, candidates.clone()))
            }
            _ if candidates.is_empty() => Ok(Confirmation::new(strategy, candidates, BTreeSet::new())),
            Strategy::BulkFetch => {
                let items = lookup.fetch_collection(&scope.collection).await?;
                let remote = item_ids(&items);
                let confirmed = candidates.intersection(&remote).copied().collect();
                Ok(Confirmation::new(strategy, candidates, confirmed))
            }
            Strategy::Individual { parallel } => {
                let confirmed = if parallel {
                    self.check_parallel(lookup, scope, candidates).await
                } else {
                    check_sequential(lookup, scope, candidates).await
                };
                Ok(Confirmation::new(strategy, candidates, confirmed))
            }
        }
    }

    async fn check_parallel(
        &self,
        lookup: &dyn RemoteLookup,
        scope: &EntityScope,
        candidates: &BTreeSet<u64>,
    ) -> BTreeSet<u64> {
        stream::iter(candidates.iter().copied())
            .map(|id| async move { (id, check_one(lookup, scope, id).await) })
            .buffer_unordered(self.workers)
            .filter_map(|(id, ok)| async move { ok.then_some(id) })
            .collect()
            .await
    }
}

async fn check_sequential(
    lookup: &dyn RemoteLookup,
    scope: &EntityScope,
    candidates: &BTreeSet<u64>,
) -> BTreeSet<u64> {
    let mut confirmed = BTreeSet::new();
    for &id in candidates {
        if check_one(lookup, scope, id).await {
            confirmed.insert(id);
        }
    }
    confirmed
}

/// Confirmed only if the entity loads and sits in the expected container.
async fn check_one(lookup: &dyn RemoteLookup, scope: &EntityScope, id: u64) -> bool {
    match lookup.fetch_entity(&scope.entity_path(id)).await {
        Ok(entity) => {
            let container = entity.get(&scope.container_field).and_then(Value::as_u64);
            if container != Some(scope.container_id) {
                tracing::debug!(
                    id,
                    expected = scope.container_id,
                    found = ?container,
                    "entity belongs to a different container"
                );
                return false;
            }
            true
        }
        Err(e) => {
            tracing::debug!(id, error = %e, "entity lookup failed");
            false
        }
    }
}

fn item_ids(items: &[Value]) -> BTreeSet<u64> {
    items
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_u64))
        .collect()
}
