use crate::fetcher::{Fetcher, ReqwestTransport};
use crate::scheduler::{FeedOutcome, FetchScheduler};
use crate::storage::LocalStorage;
use crate::traits::{Clock, HttpTransport};
use crate::types::{
    epoch, AggregatorError, CacheInfo, CacheInfoItem, Config, FeedItem, FeedOptions, FetchConfig, ListEntry, Result,
    RunSummary,
};
use crate::utils::url::normalize_feed_url;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Items selected for display together with the statistics of the run.
#[derive(Debug, Clone)]
pub struct AggregateOutput {
    pub items: Vec<FeedItem>,
    pub summary: RunSummary,
}

/// Entry point tying list storage, the cache and the fetch pipeline together.
pub struct FeedAggregator {
    storage: Arc<LocalStorage>,
    fetcher: Arc<Fetcher>,
    scheduler: FetchScheduler,
}

impl FeedAggregator {
    pub fn new(storage: Arc<LocalStorage>, clock: Arc<dyn Clock>, fetch_config: FetchConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&fetch_config)?);
        Ok(Self::with_transport(storage, transport, clock, fetch_config))
    }

    pub fn with_transport(
        storage: Arc<LocalStorage>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        fetch_config: FetchConfig,
    ) -> Self {
        let fetcher = Arc::new(Fetcher::new(transport, clock, fetch_config));
        let scheduler = FetchScheduler::new(fetcher.clone(), storage.clone());
        Self {
            storage,
            fetcher,
            scheduler,
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    /// Validates every URL before touching the list.
    pub fn follow(&self, urls: &[String], list: &str) -> Result<usize> {
        if urls.is_empty() {
            return Err(AggregatorError::InvalidInput("please provide at least one URL".to_string()));
        }
        let urls = urls
            .iter()
            .map(|url| normalize_feed_url(url))
            .collect::<Result<Vec<_>>>()?;
        self.storage.add_urls(&urls, list)
    }

    /// Per-URL removal results in input order. Addresses are matched in the
    /// same normalized form `follow` stored them in.
    pub fn unfollow(&self, urls: &[String], list: &str) -> Result<Vec<(String, bool)>> {
        let normalized: Vec<String> = urls
            .iter()
            .map(|url| normalize_feed_url(url).unwrap_or_else(|_| url.clone()))
            .collect();
        let found = self.storage.remove_urls(&normalized, list)?;
        Ok(urls.iter().cloned().zip(found).collect())
    }

    pub fn lists(&self) -> Result<Vec<String>> {
        self.storage.list_names()
    }

    pub fn list_feeds(&self, list: &str) -> Result<Vec<ListEntry>> {
        self.storage.list_entries(list)
    }

    pub fn rename_list(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.storage.rename_list(old_name, new_name)
    }

    pub fn merge_lists(&self, into: &str, from: &str) -> Result<()> {
        self.storage.merge_lists(into, from)
    }

    pub fn remove_list(&self, list: &str) -> Result<()> {
        self.storage.remove_list(list)
    }

    /// Refreshes the feeds of the requested lists and returns the items to show.
    pub async fn feed(&self, opts: &FeedOptions) -> Result<AggregateOutput> {
        let started_at = self.fetcher.now();
        let mut config = self.storage.load_config()?;

        let lists = if opts.lists.is_empty() {
            let names = self.storage.list_names()?;
            if names.is_empty() {
                return Err(AggregatorError::NoFeeds);
            }
            names
        } else {
            opts.lists.clone()
        };
        let urls = self.storage.load_url_set(&lists)?;

        let mut cache_info = self.storage.load_cache_info()?;
        let working_set: CacheInfo = urls
            .keys()
            .map(|url| {
                let item = cache_info.get(url).cloned().unwrap_or_else(|| CacheInfoItem::new(url.as_str()));
                (url.clone(), item)
            })
            .collect();

        let outcomes = self.scheduler.run(working_set).await;
        for outcome in &outcomes {
            cache_info.insert(outcome.url.clone(), outcome.cache_info.clone());
        }
        self.storage.save_cache_info(&cache_info)?;

        let mut summary = RunSummary {
            started_at,
            feeds_count: urls.len(),
            ..Default::default()
        };
        let items = merge_outcomes(outcomes, opts, &config, &mut summary);
        info!(
            "Collected {} items from {} feeds ({} cached, {} fetched, {} failed)",
            summary.items_count, summary.feeds_count, summary.feeds_cached, summary.feeds_fetched, summary.feeds_failed
        );

        if !items.is_empty() {
            config.last_run = Some(self.fetcher.now());
            self.storage.save_config(&config)?;
        }

        Ok(AggregateOutput { items, summary })
    }
}

/// Reduces per-feed outcomes into the final item list: filters by `since`,
/// tags new items, assigns feed colors, sorts newest first and applies the
/// limit. Failed feeds contribute nothing.
pub fn merge_outcomes(
    outcomes: Vec<FeedOutcome>,
    opts: &FeedOptions,
    config: &Config,
    summary: &mut RunSummary,
) -> Vec<FeedItem> {
    let mut colors: HashMap<String, u8> = HashMap::new();
    let mut items = Vec::new();

    for outcome in outcomes {
        let feed = match outcome.feed {
            Ok(feed) => feed,
            Err(_) => {
                summary.feeds_failed += 1;
                continue;
            }
        };
        if outcome.fetched {
            summary.feeds_fetched += 1;
        } else {
            summary.feeds_cached += 1;
        }

        let next_color = (colors.len() % 256) as u8;
        let color = *colors
            .entry(feed.title.clone())
            .or_insert_with(|| config.map_color(next_color));

        for entry in feed.entries {
            let published_at = entry.published_at.unwrap_or_else(epoch);
            if opts.since.is_some_and(|since| published_at < since) {
                continue;
            }
            items.push(FeedItem {
                feed_title: feed.title.clone(),
                item_title: entry.title,
                link: entry.link,
                published_at,
                is_new: published_at > outcome.previous_last_check,
                feed_color: color,
            });
        }
    }

    summary.items_count = items.len();
    sort_items(&mut items);
    if opts.limit > 0 {
        items.truncate(opts.limit);
    }
    summary.items_shown = items.len();
    items
}

/// Newest first; ties fall back to feed title, then link.
pub fn sort_items(items: &mut [FeedItem]) {
    items.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.feed_title.cmp(&b.feed_title))
            .then_with(|| a.link.cmp(&b.link))
    });
}
