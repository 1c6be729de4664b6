use super::{write_atomic, LocalStorage};
use crate::types::{from_unix, AggregatorError, CacheInfo, CacheInfoItem, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

const CACHE_INFO_FILE: &str = "cache_info";
const FEED_CACHE_PREFIX: &str = "feed_";

impl LocalStorage {
    pub fn load_cache_info(&self) -> Result<CacheInfo> {
        let path = self.cache_dir.join(CACHE_INFO_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheInfo::new()),
            Err(e) => return Err(e.into()),
        };
        let mut cache_info = CacheInfo::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let item = parse_cache_info_line(line)?;
            cache_info.insert(item.url.clone(), item);
        }
        Ok(cache_info)
    }

    /// Overwrites the whole table.
    pub fn save_cache_info(&self, cache_info: &CacheInfo) -> Result<()> {
        let contents: String = cache_info.values().map(encode_cache_info_line).collect();
        write_atomic(&self.cache_dir.join(CACHE_INFO_FILE), contents.as_bytes())?;
        debug!("Saved cache info for {} feeds", cache_info.len());
        Ok(())
    }

    pub fn save_feed_cache(&self, url: &str, body: &[u8]) -> Result<()> {
        write_atomic(&self.feed_cache_path(url), body)
    }

    pub fn read_feed_cache(&self, url: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.feed_cache_path(url))?)
    }

    pub fn has_feed_cache(&self, url: &str) -> bool {
        self.feed_cache_path(url).exists()
    }

    /// Deletes cache metadata and cached bodies for `urls`.
    pub fn remove_feed_caches(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let mut cache_info = self.load_cache_info()?;
        for url in urls {
            cache_info.remove(url);
        }
        self.save_cache_info(&cache_info)?;

        for url in urls {
            match fs::remove_file(self.feed_cache_path(url)) {
                Ok(()) => debug!("Removed cached body for {}", url),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove cached body for {}: {}", url, e),
            }
        }
        Ok(())
    }

    fn feed_cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}{}", FEED_CACHE_PREFIX, urlencoding::encode(url)))
    }
}

fn encode_cache_info_line(item: &CacheInfoItem) -> String {
    format!(
        "{} {} {} {}\n",
        item.url,
        item.last_check.timestamp(),
        urlencoding::encode(&item.etag),
        item.fetch_after.timestamp()
    )
}

/// Accepts both the current four-field form and the older form without
/// the trailing fetch-after timestamp.
fn parse_cache_info_line(line: &str) -> Result<CacheInfoItem> {
    let corrupt = || AggregatorError::Corrupt {
        kind: "cache info",
        line: line.to_string(),
    };
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() < 2 || parts[0].is_empty() {
        return Err(corrupt());
    }
    let last_check: i64 = parts[1].parse().map_err(|_| corrupt())?;
    let etag = match parts.get(2) {
        Some(raw) => urlencoding::decode(&raw.replace('+', "%20"))
            .map_err(|_| corrupt())?
            .into_owned(),
        None => String::new(),
    };
    let fetch_after = parts
        .get(3)
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(0);

    Ok(CacheInfoItem {
        url: parts[0].to_string(),
        last_check: from_unix(last_check),
        etag,
        fetch_after: from_unix(fetch_after),
    })
}
