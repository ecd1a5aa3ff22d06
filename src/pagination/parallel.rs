use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::SyncError;
use crate::pagination::page::{link_param, with_offset};
use crate::pagination::{Collection, Page, PageFetcher, fetch_page};

/// Where the parallel run stopped, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    LastPage,
    EmptyStreak,
    PageCap,
}

impl PageFetcher {
    /// Fetch by offset in fixed-size rounds on a bounded pool. Any page error
    /// or malformed page discards the parallel result and refetches the whole
    /// collection sequentially.
    pub async fn fetch_parallel(&self, collection: &Collection) -> Result<Vec<Value>, SyncError> {
        match self.try_parallel(collection).await {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(
                    path = %collection.path,
                    error = %e,
                    "parallel pagination failed, refetching sequentially"
                );
                self.fetch_sequential(collection).await
            }
        }
    }

    async fn try_parallel(&self, collection: &Collection) -> Result<Vec<Value>, SyncError> {
        let first = fetch_page(&self.transport, &collection.path, &collection.items_key).await?;
        let (mut items, next, limit) = match first {
            Page::Bare(list) => return Ok(list),
            Page::Envelope { items, next, limit } => (items, next, limit),
        };
        let Some(next) = next else {
            return Ok(items);
        };

        let page_size = link_param(&next, "limit")
            .or(limit)
            .filter(|&l| l > 0)
            .unwrap_or(items.len() as u64);
        if page_size == 0 {
            return Err(SyncError::InvalidPage {
                path: collection.path.clone(),
                reason: "cannot derive page size from first page".to_string(),
            });
        }
        let first_offset = link_param(&next, "offset").unwrap_or(page_size);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let batch_pages = self.config.batch_pages.max(1);
        let empty_limit = self.config.empty_page_streak.max(1);
        let mut pages_fetched = 1usize;
        let mut next_index = 0u64;
        let mut empty_streak = 0usize;

        let stop = loop {
            let remaining = self.config.max_pages.saturating_sub(pages_fetched);
            if remaining == 0 {
                break StopReason::PageCap;
            }
            let round = batch_pages.min(remaining);

            let mut set = JoinSet::new();
            for k in 0..round as u64 {
                let index = next_index + k;
                let offset = page_offset(collection, first_offset, index, page_size)?;
                let link = with_offset(&next, offset);
                let transport = self.transport.clone();
                let semaphore = semaphore.clone();
                let items_key = collection.items_key.clone();
                set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| SyncError::Cancelled)?;
                    let page = fetch_page(&transport, &link, &items_key).await?;
                    Ok::<_, SyncError>((index, page))
                });
            }

            let mut round_pages = Vec::with_capacity(round);
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(pair)) => round_pages.push(pair),
                    Ok(Err(e)) => return Err(e),
                    Err(join_err) => {
                        return Err(SyncError::Other(format!("page task failed: {join_err}")));
                    }
                }
            }

            next_index += round as u64;
            pages_fetched += round;
            round_pages.sort_by_key(|(index, _)| *index);

            let mut stopped = None;
            for (index, page) in round_pages {
                let Page::Envelope {
                    items: page_items,
                    next: page_next,
                    ..
                } = page
                else {
                    let offset = page_offset(collection, first_offset, index, page_size)?;
                    return Err(SyncError::InvalidPage {
                        path: with_offset(&next, offset),
                        reason: "bare list inside a paginated collection".to_string(),
                    });
                };

                if page_items.is_empty() {
                    empty_streak += 1;
                } else {
                    empty_streak = 0;
                    items.extend(page_items);
                }

                if page_next.is_none() {
                    stopped = Some(StopReason::LastPage);
                    break;
                }
                if empty_streak >= empty_limit {
                    stopped = Some(StopReason::EmptyStreak);
                    break;
                }
            }

            if let Some(reason) = stopped {
                break reason;
            }
        };

        if stop == StopReason::PageCap {
            tracing::warn!(
                path = %collection.path,
                max_pages = self.config.max_pages,
                "parallel pagination hit the page cap, collection may be truncated"
            );
        }
        tracing::debug!(
            path = %collection.path,
            pages = pages_fetched,
            items = items.len(),
            ?stop,
            "collection fetched in parallel"
        );
        Ok(items)
    }
}

/// Offset of the `index`-th page after the first. Fails instead of wrapping
/// when the remote reports an absurd page size.
fn page_offset(
    collection: &Collection,
    first_offset: u64,
    index: u64,
    page_size: u64,
) -> Result<u64, SyncError> {
    index
        .checked_mul(page_size)
        .and_then(|step| step.checked_add(first_offset))
        .ok_or_else(|| SyncError::InvalidPage {
            path: collection.path.clone(),
            reason: format!("page offset overflows (page size {page_size})"),
        })
}
