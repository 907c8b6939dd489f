#![allow(dead_code)]

use ai_news_digest::traits::{DigestDelivery, SourceAdapter, Summarizer};
use ai_news_digest::types::{
    ContentItem, DeliveryResult, DeliveryStatus, Digest, PipelineError, RawItem, Result, Summary,
};
use ai_news_digest::PipelineConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Config tuned for tests: tiny backoff, small batches.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 10,
        cycle_item_cap: 100,
        worker_count: 4,
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        fetch_timeout: Duration::from_secs(5),
        summarize_timeout: Duration::from_secs(5),
        allow_empty_digest: true,
        stale_cycle_timeout: Duration::from_secs(3600),
        database_url: "sqlite::memory:".to_string(),
    }
}

pub fn raw_item(source_id: &str, title: &str, url: &str) -> RawItem {
    RawItem {
        source_id: source_id.to_string(),
        external_id: None,
        url: url.to_string(),
        title: title.to_string(),
        body: format!("Body of {}.", title),
        published_at: None,
    }
}

/// Source adapter returning a fixed batch.
pub struct StaticSource {
    source_id: String,
    priority: i32,
    items: Vec<RawItem>,
}

impl StaticSource {
    pub fn new(source_id: &str, items: Vec<RawItem>) -> Self {
        Self {
            source_id: source_id.to_string(),
            priority: 0,
            items,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn source_id(&self) -> String {
        self.source_id.clone()
    }

    fn source_name(&self) -> String {
        format!("static source {}", self.source_id)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn fetch(&self) -> Result<Vec<RawItem>> {
        Ok(self.items.clone())
    }
}

/// Source adapter that always fails at the connector level.
pub struct BrokenSource {
    source_id: String,
}

impl BrokenSource {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for BrokenSource {
    fn source_id(&self) -> String {
        self.source_id.clone()
    }

    fn source_name(&self) -> String {
        format!("broken source {}", self.source_id)
    }

    async fn fetch(&self) -> Result<Vec<RawItem>> {
        Err(PipelineError::Connector {
            source_id: self.source_id.clone(),
            message: "connection refused".to_string(),
        })
    }
}

/// Per-item summarizer behavior.
#[derive(Clone, Copy)]
pub enum Script {
    Ok,
    /// Fail this many times, then succeed.
    FailThenOk { failures: u32, retryable: bool },
    AlwaysFail { retryable: bool },
}

/// Summarizer whose behavior is scripted per item title, with attempt
/// counting for assertions.
pub struct ScriptedSummarizer {
    default: Script,
    per_title: HashMap<String, Script>,
    attempts: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
}

impl ScriptedSummarizer {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            per_title: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    pub fn script(mut self, title: &str, script: Script) -> Self {
        self.per_title.insert(title.to_string(), script);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self, title: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(title)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, item: &ContentItem) -> Result<Summary> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(item.title.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let script = self
            .per_title
            .get(&item.title)
            .copied()
            .unwrap_or(self.default);

        let failure = match script {
            Script::Ok => None,
            Script::FailThenOk { failures, retryable } if attempt <= failures => Some(retryable),
            Script::FailThenOk { .. } => None,
            Script::AlwaysFail { retryable } => Some(retryable),
        };

        match failure {
            Some(retryable) => Err(PipelineError::Summarization {
                retryable,
                message: format!("scripted failure #{} for {}", attempt, item.title),
            }),
            None => Ok(Summary {
                short_text: format!("summary: {}", item.title),
                tags: vec!["test".to_string()],
            }),
        }
    }
}

/// Delivery collaborator recording what it was handed.
pub struct RecordingDelivery {
    fail: bool,
    delivered: Mutex<Vec<Uuid>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self {
            fail: false,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<Uuid> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DigestDelivery for RecordingDelivery {
    async fn deliver(&self, digest: &Digest) -> Result<DeliveryResult> {
        if self.fail {
            return Err(PipelineError::Connector {
                source_id: "delivery".to_string(),
                message: "smtp unreachable".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(digest.digest_id);
        Ok(DeliveryResult {
            status: DeliveryStatus::Sent,
            error: None,
        })
    }
}
