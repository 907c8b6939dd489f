use super::ItemStore;
use crate::fingerprint::Fingerprint;
use crate::types::{
    ContentItem, CycleStage, DeliveryStatus, Digest, ItemStatus, PipelineCycle, PipelineError,
    Result, Summary,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-memory reference implementation of the item store contract.
///
/// Backs the test suite and doubles as documentation of the transition
/// semantics; one mutex makes every operation atomic.
pub struct MemoryStore {
    retry_limit: u32,
    stale_after: Duration,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    items: HashMap<Fingerprint, ContentItem>,
    cycles: Vec<PipelineCycle>,
    digests: HashMap<Uuid, Digest>,
}

impl MemoryStore {
    /// `retry_limit` is the failure count at which an item terminalizes.
    pub fn new(retry_limit: u32) -> Self {
        Self {
            retry_limit,
            stale_after: Duration::from_secs(3600),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Age past which an unfinished cycle counts as crashed.
    pub fn with_stale_timeout(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert_raw(&self, item: ContentItem) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.items.contains_key(&item.fingerprint) {
            debug!("Known fingerprint {}, upsert is a no-op", item.fingerprint);
            return Ok(false);
        }
        inner.items.insert(item.fingerprint, item);
        Ok(true)
    }

    async fn list_by_status(&self, status: ItemStatus, limit: usize) -> Result<Vec<ContentItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<ContentItem> = inner
            .items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.collected_at
                .cmp(&b.collected_at)
                .then(a.fingerprint.cmp(&b.fingerprint))
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn mark_processing(&self, fingerprint: &Fingerprint) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(fingerprint)
            .ok_or(PipelineError::ItemNotFound {
                fingerprint: *fingerprint,
            })?;
        if item.status != ItemStatus::Collected {
            return Err(PipelineError::Conflict {
                fingerprint: *fingerprint,
            });
        }
        item.status = ItemStatus::Processing;
        Ok(())
    }

    async fn mark_processed(&self, fingerprint: &Fingerprint, summary: Summary) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(fingerprint)
            .ok_or(PipelineError::ItemNotFound {
                fingerprint: *fingerprint,
            })?;
        if item.status != ItemStatus::Processing {
            return Err(PipelineError::InvalidTransition {
                fingerprint: *fingerprint,
                from: item.status.as_str(),
                to: ItemStatus::Processed.as_str(),
            });
        }
        item.status = ItemStatus::Processed;
        item.summary = Some(summary);
        item.last_error = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        fingerprint: &Fingerprint,
        error: &str,
        retryable: bool,
    ) -> Result<ItemStatus> {
        let mut inner = self.inner.lock().await;
        let retry_limit = self.retry_limit;
        let item = inner
            .items
            .get_mut(fingerprint)
            .ok_or(PipelineError::ItemNotFound {
                fingerprint: *fingerprint,
            })?;
        if item.status != ItemStatus::Processing {
            return Err(PipelineError::InvalidTransition {
                fingerprint: *fingerprint,
                from: item.status.as_str(),
                to: ItemStatus::Failed.as_str(),
            });
        }
        item.failure_count += 1;
        item.last_error = Some(error.to_string());
        item.status = if retryable && item.failure_count < retry_limit {
            ItemStatus::Collected
        } else {
            ItemStatus::Failed
        };
        Ok(item.status)
    }

    async fn get_item(&self, fingerprint: &Fingerprint) -> Result<Option<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(inner.items.get(fingerprint).cloned())
    }

    async fn get_items(&self, fingerprints: &[Fingerprint]) -> Result<Vec<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(fingerprints
            .iter()
            .filter_map(|fp| inner.items.get(fp).cloned())
            .collect())
    }

    async fn begin_cycle(&self, cycle: &PipelineCycle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // An unfinished cycle past the stale bound is a crash leftover;
        // terminalize it so the gate cannot wedge permanently.
        let cutoff = Utc::now() - self.stale_after;
        for stale in inner
            .cycles
            .iter_mut()
            .filter(|c| !c.stage.is_terminal() && c.started_at < cutoff)
        {
            warn!(
                "Reclaiming stale cycle {} (started {})",
                stale.cycle_id, stale.started_at
            );
            stale.stage = CycleStage::Failed;
            stale.finished_at = Some(Utc::now());
            stale.failure = Some("crashed or stalled; reclaimed by a later trigger".to_string());
        }
        if inner.cycles.iter().any(|c| !c.stage.is_terminal()) {
            return Err(PipelineError::AlreadyRunning);
        }
        inner.cycles.push(cycle.clone());
        Ok(())
    }

    async fn update_cycle(&self, cycle: &PipelineCycle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner
            .cycles
            .iter_mut()
            .find(|c| c.cycle_id == cycle.cycle_id)
        {
            Some(existing) => {
                *existing = cycle.clone();
                Ok(())
            }
            None => Err(PipelineError::StoreUnavailable(format!(
                "unknown cycle {}",
                cycle.cycle_id
            ))),
        }
    }

    async fn latest_cycle(&self) -> Result<Option<PipelineCycle>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .cycles
            .iter()
            .max_by_key(|c| c.started_at)
            .cloned())
    }

    async fn save_digest(&self, digest: &Digest) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.digests.insert(digest.digest_id, digest.clone());
        Ok(())
    }

    async fn mark_digest_delivery(&self, digest_id: Uuid, status: DeliveryStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.digests.get_mut(&digest_id) {
            Some(digest) if digest.delivery_status == DeliveryStatus::Sent => {
                warn!("Digest {} already sent; ignoring delivery update", digest_id);
                Ok(())
            }
            Some(digest) => {
                digest.delivery_status = status;
                Ok(())
            }
            None => Err(PipelineError::StoreUnavailable(format!(
                "unknown digest {}",
                digest_id
            ))),
        }
    }

    async fn get_digest_for_cycle(&self, cycle_id: Uuid) -> Result<Option<Digest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .digests
            .values()
            .find(|d| d.cycle_id == cycle_id)
            .cloned())
    }
}
