use crate::types::{DeliveryResult, Digest, ContentItem, RawItem, Result, Summary};
use async_trait::async_trait;

/// Contract every content source implements. The orchestrator depends
/// only on this trait, never on concrete connectors.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier for this source (used in fingerprints and reports).
    fn source_id(&self) -> String;

    /// Human-readable name for logs.
    fn source_name(&self) -> String;

    /// Ordering weight for digest assembly; higher sorts first.
    fn priority(&self) -> i32 {
        0
    }

    /// Fetch a finite batch of candidate items.
    ///
    /// Malformed individual entries are skipped inside the adapter; only
    /// connector-level failures (network, auth) surface as an error.
    async fn fetch(&self) -> Result<Vec<RawItem>>;
}

/// Contract wrapping the summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a single item. Failures carry a retryable flag so the
    /// orchestrator can distinguish transient backend trouble from
    /// content the backend will never accept.
    async fn summarize(&self, item: &ContentItem) -> Result<Summary>;
}

/// Contract for handing a built digest to the outbound transport.
#[async_trait]
pub trait DigestDelivery: Send + Sync {
    async fn deliver(&self, digest: &Digest) -> Result<DeliveryResult>;
}
