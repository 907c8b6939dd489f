use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A candidate item as returned by a source adapter, before deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    /// Source-provided unique identifier (e.g. RSS guid), when available.
    pub external_id: Option<String>,
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a stored content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Collected,
    Processing,
    Processed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Collected => "collected",
            ItemStatus::Processing => "processing",
            ItemStatus::Processed => "processed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collected" => Some(ItemStatus::Collected),
            "processing" => Some(ItemStatus::Processing),
            "processed" => Some(ItemStatus::Processed),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

/// A deduplicated content item as persisted by the item store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub fingerprint: Fingerprint,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub status: ItemStatus,
    pub summary: Option<Summary>,
    pub failure_count: u32,
    pub last_error: Option<String>,
}

impl ContentItem {
    pub fn from_raw(raw: RawItem, fingerprint: Fingerprint, collected_at: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            source_id: raw.source_id,
            url: raw.url,
            title: raw.title,
            body: raw.body,
            published_at: raw.published_at,
            collected_at,
            status: ItemStatus::Collected,
            summary: None,
            failure_count: 0,
            last_error: None,
        }
    }
}

/// Output of the summarizer for a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub short_text: String,
    pub tags: Vec<String>,
}

/// Stage a pipeline cycle has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Idle,
    Collecting,
    Processing,
    Digesting,
    Completed,
    Failed,
}

impl CycleStage {
    /// A cycle in a terminal stage no longer blocks the single-flight gate.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleStage::Completed | CycleStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::Idle => "idle",
            CycleStage::Collecting => "collecting",
            CycleStage::Processing => "processing",
            CycleStage::Digesting => "digesting",
            CycleStage::Completed => "completed",
            CycleStage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(CycleStage::Idle),
            "collecting" => Some(CycleStage::Collecting),
            "processing" => Some(CycleStage::Processing),
            "digesting" => Some(CycleStage::Digesting),
            "completed" => Some(CycleStage::Completed),
            "failed" => Some(CycleStage::Failed),
            _ => None,
        }
    }
}

/// Persistent record of one collect -> process -> digest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCycle {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: CycleStage,
    /// Fingerprints seen this cycle, including re-collected duplicates.
    pub touched: Vec<Fingerprint>,
    pub digest_id: Option<Uuid>,
    pub failure: Option<String>,
}

impl PipelineCycle {
    pub fn start_now() -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            stage: CycleStage::Collecting,
            touched: Vec::new(),
            digest_id: None,
            failure: None,
        }
    }
}

/// Delivery state of a built digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One entry in a digest, in final presentation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub fingerprint: Fingerprint,
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub short_text: String,
    pub tags: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

/// The digest artifact produced for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub digest_id: Uuid,
    pub cycle_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<DigestEntry>,
    pub body: String,
    pub delivery_status: DeliveryStatus,
}

/// Outcome reported by a delivery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// Operator-facing report for one cycle run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub cycle_id: Uuid,
    pub stage_reached: CycleStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items newly inserted by this cycle (duplicates excluded).
    pub collected: usize,
    /// Candidates seen across all adapters, duplicates included.
    pub candidates: usize,
    pub processed: usize,
    pub failed: usize,
    /// Items skipped because another worker already claimed them.
    pub conflicts: usize,
    pub connector_errors: Vec<String>,
    pub digest_id: Option<Uuid>,
    pub digest_entries: usize,
    pub delivery: Option<DeliveryResult>,
    pub fatal: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Source-level failure (network/auth). Isolated per adapter; never
    /// fails the cycle.
    #[error("connector error from {source_id}: {message}")]
    Connector { source_id: String, message: String },

    /// Another worker holds the item; the caller skips it this pass.
    #[error("item {fingerprint} already claimed for processing")]
    Conflict { fingerprint: Fingerprint },

    #[error("summarization failed (retryable: {retryable}): {message}")]
    Summarization { retryable: bool, message: String },

    /// Fatal: nothing proceeds without durable state.
    #[error("item store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("a pipeline cycle is already running")]
    AlreadyRunning,

    #[error("cycle {cycle_id} produced an empty digest")]
    EmptyDigest { cycle_id: Uuid },

    #[error("item not found: {fingerprint}")]
    ItemNotFound { fingerprint: Fingerprint },

    #[error("invalid state transition for {fingerprint}: {from} -> {to}")]
    InvalidTransition {
        fingerprint: Fingerprint,
        from: &'static str,
        to: &'static str,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::StoreUnavailable(e.to_string())
    }
}

impl PipelineError {
    /// True for errors the retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Summarization { retryable, .. } => *retryable,
            PipelineError::Connector { .. } | PipelineError::Http(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
