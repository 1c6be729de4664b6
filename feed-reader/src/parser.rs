use crate::types::{AggregatorError, ParsedEntry, ParsedFeed, Result};
use feed_rs::parser;
use tracing::debug;

/// Decodes RSS, Atom and JSON Feed documents into the reader's feed model.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed(&self, content: &[u8]) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content)
            .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content).unwrap_or_default();
        let entries = feed.entries.into_iter().map(Self::parse_entry).collect();

        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> ParsedEntry {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let link = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();

        // Atom entries frequently carry only <updated>.
        let published_at = entry.published.or(entry.updated);

        let categories = entry.categories.into_iter().map(|c| c.term).collect();

        ParsedEntry {
            title,
            link,
            published_at,
            categories,
        }
    }
}
