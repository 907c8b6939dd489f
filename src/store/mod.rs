mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::fingerprint::Fingerprint;
use crate::types::{
    ContentItem, DeliveryStatus, Digest, ItemStatus, PipelineCycle, Result, Summary,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Durable keyed storage for content items, cycles, and digests.
///
/// The store is the single source of truth: every mutation is durable
/// before the call returns, and the per-item status transitions are
/// atomic so concurrent workers never double-process an item. The cycle
/// operations carry the single-flight gate (a compare-and-set insert)
/// so "is a cycle running" survives process restarts.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a newly collected item if its fingerprint is unknown.
    /// Returns whether an insertion occurred; re-collection of a known
    /// fingerprint is a no-op that resets nothing.
    async fn upsert_raw(&self, item: ContentItem) -> Result<bool>;

    /// Bounded page of items in `status`, oldest collected first.
    async fn list_by_status(&self, status: ItemStatus, limit: usize) -> Result<Vec<ContentItem>>;

    /// Atomic `Collected -> Processing` claim. `Conflict` if the item is
    /// not currently claimable.
    async fn mark_processing(&self, fingerprint: &Fingerprint) -> Result<()>;

    /// Atomic `Processing -> Processed` with the summary attached.
    async fn mark_processed(&self, fingerprint: &Fingerprint, summary: Summary) -> Result<()>;

    /// Record a failed attempt. Increments the failure count and either
    /// releases the item back to `Collected` (retryable, attempts left)
    /// or terminalizes it to `Failed`. Returns the resulting status.
    async fn mark_failed(
        &self,
        fingerprint: &Fingerprint,
        error: &str,
        retryable: bool,
    ) -> Result<ItemStatus>;

    async fn get_item(&self, fingerprint: &Fingerprint) -> Result<Option<ContentItem>>;

    async fn get_items(&self, fingerprints: &[Fingerprint]) -> Result<Vec<ContentItem>>;

    /// Open a new cycle. Fails with `AlreadyRunning` while any cycle is
    /// in a non-terminal stage.
    async fn begin_cycle(&self, cycle: &PipelineCycle) -> Result<()>;

    /// Persist updated cycle metadata (stage, touched set, outcome).
    async fn update_cycle(&self, cycle: &PipelineCycle) -> Result<()>;

    async fn latest_cycle(&self) -> Result<Option<PipelineCycle>>;

    async fn save_digest(&self, digest: &Digest) -> Result<()>;

    /// Update a digest's delivery status. A digest that has reached
    /// `Sent` is immutable; later updates are ignored.
    async fn mark_digest_delivery(&self, digest_id: Uuid, status: DeliveryStatus) -> Result<()>;

    async fn get_digest_for_cycle(&self, cycle_id: Uuid) -> Result<Option<Digest>>;
}
