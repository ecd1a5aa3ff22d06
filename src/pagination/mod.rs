pub mod page;
pub mod parallel;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::config::PaginationConfig;
use crate::error::SyncError;
use crate::transport::client::Transport;

pub use page::{Collection, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    /// Follow `_links.next` one page at a time.
    Sequential,
    /// Fan page requests out by offset, falling back to sequential on any failure.
    Parallel,
}

/// Materializes a full collection from a paginated endpoint.
pub struct PageFetcher {
    transport: Arc<Transport>,
    config: PaginationConfig,
    workers: usize,
}

impl PageFetcher {
    pub fn new(transport: Arc<Transport>, config: PaginationConfig, workers: usize) -> Self {
        Self {
            transport,
            config,
            workers: workers.max(1),
        }
    }

    pub fn mode(&self) -> PaginationMode {
        if self.config.parallel {
            PaginationMode::Parallel
        } else {
            PaginationMode::Sequential
        }
    }

    pub async fn fetch_all(&self, collection: &Collection) -> Result<Vec<Value>, SyncError> {
        match self.mode() {
            PaginationMode::Sequential => self.fetch_sequential(collection).await,
            PaginationMode::Parallel => self.fetch_parallel(collection).await,
        }
    }

    /// Follow `next` links until none remain. Any page error discards what
    /// was accumulated so far.
    pub async fn fetch_sequential(&self, collection: &Collection) -> Result<Vec<Value>, SyncError> {
        let mut items = Vec::new();
        let mut link = collection.path.clone();
        let mut visited = HashSet::new();
        let mut pages = 0usize;

        loop {
            if !visited.insert(link.clone()) {
                return Err(SyncError::InvalidPage {
                    path: link,
                    reason: "next link points to an already visited page".to_string(),
                });
            }

            let page = fetch_page(&self.transport, &link, &collection.items_key).await?;
            pages += 1;

            match page {
                Page::Bare(list) if pages == 1 => return Ok(list),
                Page::Bare(list) => {
                    items.extend(list);
                    break;
                }
                Page::Envelope {
                    items: page_items,
                    next,
                    ..
                } => {
                    items.extend(page_items);
                    match next {
                        Some(next) => link = next,
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(
            path = %collection.path,
            pages,
            items = items.len(),
            "collection fetched sequentially"
        );
        Ok(items)
    }
}

/// Fetch and shape-check a single page. Shared by both pagination modes.
pub(crate) async fn fetch_page(
    transport: &Transport,
    link: &str,
    items_key: &str,
) -> Result<Page, SyncError> {
    let body = transport.get(link).await.into_value()?;
    Page::parse(link, items_key, body)
}
