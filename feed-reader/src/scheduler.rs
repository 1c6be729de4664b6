//! Concurrent refresh of every URL in a working set.
//!
//! Each URL gets its own task, bounded by a semaphore. Tasks share nothing
//! mutable: every task returns a [`FeedOutcome`] and the caller reduces them
//! once all tasks have joined.

use crate::fetcher::{FetchOutcome, Fetcher};
use crate::parser::FeedParser;
use crate::storage::LocalStorage;
use crate::types::{AggregatorError, CacheInfo, CacheInfoItem, ParsedFeed, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// What happened to one URL during a run.
#[derive(Debug)]
pub struct FeedOutcome {
    pub url: String,
    /// Watermark as it was before this run touched it.
    pub previous_last_check: DateTime<Utc>,
    /// Bookkeeping after this run, to be written back.
    pub cache_info: CacheInfoItem,
    /// A new body was downloaded, as opposed to reusing the stored one.
    pub fetched: bool,
    pub feed: Result<ParsedFeed>,
}

impl FeedOutcome {
    /// Outcome for a feed whose task never reported back.
    fn failed(cache_info: CacheInfoItem) -> Self {
        Self {
            url: cache_info.url.clone(),
            previous_last_check: cache_info.last_check,
            feed: Err(AggregatorError::TaskFailed(cache_info.url.clone())),
            cache_info,
            fetched: false,
        }
    }
}

pub struct FetchScheduler {
    fetcher: Arc<Fetcher>,
    storage: Arc<LocalStorage>,
    parser: FeedParser,
    max_concurrency: usize,
}

impl FetchScheduler {
    pub fn new(fetcher: Arc<Fetcher>, storage: Arc<LocalStorage>) -> Self {
        let max_concurrency = fetcher.config().max_concurrency.max(1);
        Self {
            fetcher,
            storage,
            parser: FeedParser::new(),
            max_concurrency,
        }
    }

    /// Refreshes every item of `working_set` and waits for all of them.
    /// Outcomes are returned sorted by URL, one per input item. A task that
    /// dies before reporting yields a failed outcome with its bookkeeping
    /// unchanged.
    pub async fn run(&self, working_set: CacheInfo) -> Vec<FeedOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        for item in working_set.values().cloned() {
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let storage = self.storage.clone();
            let parser = self.parser;
            join_set.spawn(async move {
                // Held for the task duration to cap in-flight requests.
                let _permit = semaphore.acquire_owned().await;
                refresh_feed(&fetcher, &storage, parser, item).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Feed task failed: {}", e),
            }
        }

        if outcomes.len() < working_set.len() {
            let reported: HashSet<String> = outcomes.iter().map(|o| o.url.clone()).collect();
            for item in working_set.into_values() {
                if !reported.contains(&item.url) {
                    outcomes.push(FeedOutcome::failed(item));
                }
            }
        }

        outcomes.sort_by(|a, b| a.url.cmp(&b.url));
        debug!("Refreshed {} feeds", outcomes.len());
        outcomes
    }
}

async fn refresh_feed(
    fetcher: &Fetcher,
    storage: &LocalStorage,
    parser: FeedParser,
    mut cache_info: CacheInfoItem,
) -> FeedOutcome {
    let url = cache_info.url.clone();
    let previous_last_check = cache_info.last_check;

    let fetched = match fetch_and_store(fetcher, storage, &mut cache_info).await {
        Ok(fetched) => fetched,
        Err(e) => {
            error!("Failed to fetch feed: {}: {}", url, e);
            return FeedOutcome {
                url,
                previous_last_check,
                cache_info,
                fetched: false,
                feed: Err(e),
            };
        }
    };

    let feed = if storage.has_feed_cache(&url) {
        let feed = storage
            .read_feed_cache(&url)
            .and_then(|body| parser.parse_feed(&body));
        if let Err(e) = &feed {
            error!("Failed to parse feed: {}: {}", url, e);
        }
        feed
    } else {
        warn!("No cached body for {} yet", url);
        Err(AggregatorError::General(format!("no cached body for {}", url)))
    };

    FeedOutcome {
        url,
        previous_last_check,
        cache_info,
        fetched,
        feed,
    }
}

/// Runs the conditional fetch, persists a new body if one arrived and folds
/// the outcome into `cache_info`. Leaves `cache_info` untouched on error.
async fn fetch_and_store(fetcher: &Fetcher, storage: &LocalStorage, cache_info: &mut CacheInfoItem) -> Result<bool> {
    let outcome = fetcher.fetch_feed(cache_info).await?;
    if let FetchOutcome::Fetched { body, .. } = &outcome {
        storage.save_feed_cache(&cache_info.url, body)?;
    }
    outcome.apply(cache_info, fetcher.now());
    Ok(outcome.is_fetched())
}
