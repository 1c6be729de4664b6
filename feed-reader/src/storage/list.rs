use super::{validate_list_name, write_atomic, LocalStorage};
use crate::types::{from_unix, AggregatorError, ListEntry, Result, UrlSet};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, info};

impl LocalStorage {
    /// Appends URLs that are not yet in `list`, stamping them with the current time.
    pub fn add_urls(&self, urls: &[String], list: &str) -> Result<usize> {
        let path = self.list_path(list)?;
        let mut entries = self.list_entries(list)?;
        let mut present: HashSet<String> = entries.iter().map(|e| e.address.clone()).collect();
        let now = self.clock.now();

        let mut added = 0;
        for url in urls {
            if !present.insert(url.clone()) {
                debug!("{} already in list {}", url, list);
                continue;
            }
            entries.push(ListEntry {
                added_at: now,
                address: url.clone(),
            });
            added += 1;
        }

        if added > 0 || !path.exists() {
            write_atomic(&path, &encode_entries(&entries))?;
        }
        info!("Added {} of {} URLs to list {}", added, urls.len(), list);
        Ok(added)
    }

    /// Removes URLs from `list`, returning for each input whether it was found.
    /// Each stored entry is credited to the first matching input, so a URL
    /// given twice reports `true` once and `false` for the repeat.
    /// Cache entries no longer referenced by any list are dropped afterwards.
    pub fn remove_urls(&self, urls: &[String], list: &str) -> Result<Vec<bool>> {
        let path = self.list_path(list)?;
        let entries = self.list_entries(list)?;
        if entries.is_empty() {
            return Err(AggregatorError::EmptyList(list.to_string()));
        }

        let mut found = vec![false; urls.len()];
        let remaining: Vec<ListEntry> = entries
            .into_iter()
            .filter(|entry| match urls.iter().position(|u| *u == entry.address) {
                Some(i) => {
                    found[i] = true;
                    false
                }
                None => true,
            })
            .collect();

        write_atomic(&path, &encode_entries(&remaining))?;

        let removed: Vec<String> = urls
            .iter()
            .zip(&found)
            .filter(|(_, hit)| **hit)
            .map(|(url, _)| url.clone())
            .collect();
        info!("Removed {} URLs from list {}", removed.len(), list);
        self.tidy_caches_after_remove(&removed, list)?;
        Ok(found)
    }

    /// Entries of `list` in append order; a missing list reads as empty.
    pub fn list_entries(&self, list: &str) -> Result<Vec<ListEntry>> {
        let path = self.list_path(list)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_entry_line)
            .collect()
    }

    /// Merges the entries of `list` into `urls`, later loads overwriting earlier ones.
    pub fn load_list_into(&self, urls: &mut UrlSet, list: &str) -> Result<()> {
        for entry in self.list_entries(list)? {
            urls.insert(entry.address.clone(), entry);
        }
        Ok(())
    }

    /// Union of the URLs in `lists`, or of every list when `lists` is empty.
    pub fn load_url_set(&self, lists: &[String]) -> Result<UrlSet> {
        let names = if lists.is_empty() {
            self.list_names()?
        } else {
            lists.to_vec()
        };
        let mut urls = UrlSet::new();
        for name in &names {
            self.load_list_into(&mut urls, name)?;
        }
        Ok(urls)
    }

    /// Names of every stored list, sorted.
    pub fn list_names(&self) -> Result<Vec<String>> {
        let dir = self.lists_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_list_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn rename_list(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_path = self.list_path(old_name)?;
        let new_path = self.list_path(new_name)?;
        if new_path.exists() {
            return Err(AggregatorError::ListExists(new_name.to_string()));
        }
        if !old_path.exists() {
            return Err(AggregatorError::ListNotFound(old_name.to_string()));
        }
        fs::rename(&old_path, &new_path)?;
        info!("Renamed list {} to {}", old_name, new_name);
        Ok(())
    }

    /// Moves every entry of `from` into `into` and deletes `from`. Shared URLs
    /// keep their earliest timestamp; the result is sorted by timestamp.
    pub fn merge_lists(&self, into: &str, from: &str) -> Result<()> {
        if into == from {
            return Err(AggregatorError::InvalidInput(format!("cannot merge list {} into itself", into)));
        }
        let into_path = self.list_path(into)?;
        let from_path = self.list_path(from)?;
        if !from_path.exists() {
            return Err(AggregatorError::ListNotFound(from.to_string()));
        }

        let mut merged: BTreeMap<String, ListEntry> = BTreeMap::new();
        for entry in self.list_entries(into)?.into_iter().chain(self.list_entries(from)?) {
            let keep_existing = merged
                .get(&entry.address)
                .is_some_and(|existing| existing.added_at <= entry.added_at);
            if !keep_existing {
                merged.insert(entry.address.clone(), entry);
            }
        }

        let mut entries: Vec<ListEntry> = merged.into_values().collect();
        entries.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.address.cmp(&b.address)));

        write_atomic(&into_path, &encode_entries(&entries))?;
        fs::remove_file(&from_path)?;
        info!("Merged list {} into {} ({} entries)", from, into, entries.len());
        Ok(())
    }

    /// Deletes `list` and drops cache entries only it referenced.
    pub fn remove_list(&self, list: &str) -> Result<()> {
        let path = self.list_path(list)?;
        if !path.exists() {
            return Err(AggregatorError::ListNotFound(list.to_string()));
        }
        let entries = self.list_entries(list)?;
        fs::remove_file(&path)?;
        info!("Removed list {}", list);

        if entries.is_empty() {
            return Ok(());
        }
        let urls: Vec<String> = entries.into_iter().map(|e| e.address).collect();
        self.tidy_caches_after_remove(&urls, list)
    }

    /// Drops cache metadata and bodies for `urls` that no list other than
    /// `list` still references.
    fn tidy_caches_after_remove(&self, urls: &[String], list: &str) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let mut reachable = UrlSet::new();
        for name in self.list_names()? {
            if name == list {
                continue;
            }
            self.load_list_into(&mut reachable, &name)?;
        }

        let orphaned: Vec<String> = urls
            .iter()
            .filter(|url| !reachable.contains_key(url.as_str()))
            .cloned()
            .collect();
        debug!(
            "{} of {} removed URLs are still followed elsewhere",
            urls.len() - orphaned.len(),
            urls.len()
        );
        self.remove_feed_caches(&orphaned)
    }
}

fn encode_entries(entries: &[ListEntry]) -> Vec<u8> {
    entries
        .iter()
        .map(|e| format!("{} {}\n", e.added_at.timestamp(), e.address))
        .collect::<String>()
        .into_bytes()
}

fn parse_entry_line(line: &str) -> Result<ListEntry> {
    let corrupt = || AggregatorError::Corrupt {
        kind: "list",
        line: line.to_string(),
    };
    let (added_at, address) = line.split_once(' ').ok_or_else(corrupt)?;
    let added_at: i64 = added_at.parse().map_err(|_| corrupt())?;
    let address = address.split(' ').next().unwrap_or_default();
    if address.is_empty() {
        return Err(corrupt());
    }
    Ok(ListEntry {
        added_at: from_unix(added_at),
        address: address.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_line() {
        let entry = parse_entry_line("1700000000 https://example.com/feed.xml").unwrap();
        assert_eq!(entry.added_at.timestamp(), 1_700_000_000);
        assert_eq!(entry.address, "https://example.com/feed.xml");
    }

    #[test]
    fn test_parse_entry_line_rejects_garbage() {
        assert!(parse_entry_line("https://example.com").is_err());
        assert!(parse_entry_line("soon https://example.com").is_err());
        assert!(parse_entry_line("1700000000 ").is_err());
    }

    #[test]
    fn test_encode_entries() {
        let entries = vec![
            ListEntry { added_at: from_unix(10), address: "https://a.test/".into() },
            ListEntry { added_at: from_unix(20), address: "https://b.test/".into() },
        ];
        assert_eq!(encode_entries(&entries), b"10 https://a.test/\n20 https://b.test/\n");
    }
}
