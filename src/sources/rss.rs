use crate::traits::SourceAdapter;
use crate::types::{PipelineError, RawItem, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// RSS/Atom feed connector.
///
/// One concrete plug-in behind the source adapter seam; the pipeline
/// core never names it. Per-entry parse problems are skipped, only
/// connector-level failures (HTTP, feed-level parse) are surfaced.
pub struct RssSource {
    source_id: String,
    name: String,
    url: String,
    priority: i32,
    client: Client,
}

impl RssSource {
    pub fn new(source_id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("ai-news-digest/0.1")
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            source_id: source_id.into(),
            name: name.into(),
            url: url.into(),
            priority: 0,
            client,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn connector_err(&self, message: String) -> PipelineError {
        PipelineError::Connector {
            source_id: self.source_id.clone(),
            message,
        }
    }

    fn entry_to_raw(&self, entry: feed_rs::model::Entry) -> Option<RawItem> {
        let url = entry.links.first()?.href.clone();
        let title = entry.title.map(|t| t.content)?;
        if title.trim().is_empty() {
            return None;
        }

        let body = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();

        let published_at: Option<DateTime<Utc>> = entry.published.or(entry.updated);

        let external_id = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id)
        };

        Some(RawItem {
            source_id: self.source_id.clone(),
            external_id,
            url,
            title,
            body,
            published_at,
        })
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    fn source_id(&self) -> String {
        self.source_id.clone()
    }

    fn source_name(&self) -> String {
        self.name.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn fetch(&self) -> Result<Vec<RawItem>> {
        debug!("Fetching feed: {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.connector_err(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.connector_err(format!("HTTP {}", status)));
        }

        let content = response
            .text()
            .await
            .map_err(|e| self.connector_err(format!("read body failed: {}", e)))?;

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| self.connector_err(format!("feed parse failed: {}", e)))?;

        let total = feed.entries.len();
        let items: Vec<RawItem> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.entry_to_raw(entry))
            .collect();

        if items.len() < total {
            warn!(
                "Skipped {} malformed entries from {}",
                total - items.len(),
                self.source_id
            );
        }
        info!("Fetched {} items from {}", items.len(), self.source_id);
        Ok(items)
    }
}
