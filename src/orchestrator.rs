use crate::config::PipelineConfig;
use crate::digest_builder::DigestBuilder;
use crate::fingerprint::Fingerprint;
use crate::retry::RetryPolicy;
use crate::store::ItemStore;
use crate::traits::{DigestDelivery, SourceAdapter, Summarizer};
use crate::types::{
    ContentItem, CycleStage, DeliveryResult, DeliveryStatus, ItemStatus, PipelineCycle,
    PipelineError, RawItem, Result, RunReport,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Drives one collect -> process -> digest cycle at a time.
///
/// The orchestrator mediates every item and cycle state transition
/// through the store; per-adapter and per-item failures are contained,
/// and only store-level errors abort a cycle. Generic over the source,
/// summarizer, and delivery seams, never over concrete integrations.
pub struct PipelineOrchestrator {
    store: Arc<dyn ItemStore>,
    sources: Vec<Arc<dyn SourceAdapter>>,
    summarizer: Arc<dyn Summarizer>,
    delivery: Option<Arc<dyn DigestDelivery>>,
    config: PipelineConfig,
    retry: RetryPolicy,
    cancelled: Arc<AtomicBool>,
}

/// Per-item outcome of a processing pass.
enum ItemOutcome {
    Processed,
    Failed,
    /// Another worker already claimed the item; skipped this pass.
    Conflict,
    /// Attempts left but the cycle is draining; item stays collected.
    Released,
    /// Store-level error; aborts the cycle.
    Fatal(PipelineError),
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn ItemStore>,
        summarizer: Arc<dyn Summarizer>,
        config: PipelineConfig,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.max_attempts,
            config.initial_backoff,
            config.max_backoff,
        );
        Self {
            store,
            sources: Vec::new(),
            summarizer,
            delivery: None,
            config,
            retry,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn SourceAdapter>) {
        info!("Registered source: {}", source.source_name());
        self.sources.push(source);
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn DigestDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Ask a running cycle to stop after the in-flight batch completes.
    /// Remaining items stay `Collected` for the next cycle.
    pub fn cancel(&self) {
        info!("Cancellation requested; cycle will drain at the next batch boundary");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run one full cycle. Fails fast with `AlreadyRunning` when another
    /// cycle holds the single-flight gate; any later store-level failure
    /// lands the cycle in `Failed` and is reported, not propagated.
    pub async fn run_cycle(&self) -> Result<RunReport> {
        self.cancelled.store(false, Ordering::SeqCst);

        let mut cycle = PipelineCycle::start_now();
        self.store.begin_cycle(&cycle).await?;
        info!(
            "Cycle {} started with {} sources",
            cycle.cycle_id,
            self.sources.len()
        );

        let mut report = RunReport {
            cycle_id: cycle.cycle_id,
            stage_reached: cycle.stage,
            started_at: cycle.started_at,
            finished_at: cycle.started_at,
            collected: 0,
            candidates: 0,
            processed: 0,
            failed: 0,
            conflicts: 0,
            connector_errors: Vec::new(),
            digest_id: None,
            digest_entries: 0,
            delivery: None,
            fatal: None,
        };

        match self.drive(&mut cycle, &mut report).await {
            Ok(()) => {
                cycle.stage = CycleStage::Completed;
                info!(
                    "Cycle {} completed: {} collected, {} processed, {} failed",
                    cycle.cycle_id, report.collected, report.processed, report.failed
                );
            }
            Err(e) => {
                error!("Cycle {} failed in {:?}: {}", cycle.cycle_id, cycle.stage, e);
                cycle.failure = Some(format!("{} (stage {})", e, cycle.stage.as_str()));
                cycle.stage = CycleStage::Failed;
                report.fatal = cycle.failure.clone();
            }
        }

        cycle.finished_at = Some(Utc::now());
        report.stage_reached = cycle.stage;
        report.finished_at = cycle.finished_at.unwrap_or_else(Utc::now);

        // Closing the cycle record releases the single-flight gate; if
        // even this fails the store is gone and the operator sees it.
        if let Err(e) = self.store.update_cycle(&cycle).await {
            error!("Failed to close cycle {}: {}", cycle.cycle_id, e);
            report.fatal = Some(e.to_string());
        }

        Ok(report)
    }

    async fn drive(&self, cycle: &mut PipelineCycle, report: &mut RunReport) -> Result<()> {
        self.collect(cycle, report).await?;

        cycle.stage = CycleStage::Processing;
        self.store.update_cycle(cycle).await?;
        self.process(cycle, report).await?;

        cycle.stage = CycleStage::Digesting;
        self.store.update_cycle(cycle).await?;
        self.digest(cycle, report).await
    }

    /// Collection stage: every adapter is attempted; failures are logged
    /// and isolated so one flaky source cannot starve the rest.
    async fn collect(&self, cycle: &mut PipelineCycle, report: &mut RunReport) -> Result<()> {
        let fetch_timeout = self.config.fetch_timeout;
        // The map closure is applied eagerly so its type does not appear
        // in the stream (works around rust-lang/rust#102211); the async
        // blocks stay lazy and are only polled by `buffered` below.
        let fetch_futures: Vec<_> = self
            .sources
            .iter()
            .cloned()
            .map(|source| async move {
                let result = timeout(fetch_timeout, source.fetch()).await;
                let outcome = match result {
                    Ok(Ok(items)) => Ok(items),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(PipelineError::Connector {
                        source_id: source.source_id(),
                        message: format!("fetch timed out after {:?}", fetch_timeout),
                    }),
                };
                (source, outcome)
            })
            .collect();
        let fetches = stream::iter(fetch_futures)
            // Fetches run concurrently but results land in registration
            // order, so collected timestamps are deterministic.
            .buffered(self.sources.len().max(1))
            .collect::<Vec<_>>()
            .await;

        let mut touched: HashSet<Fingerprint> = cycle.touched.iter().copied().collect();

        for (source, outcome) in fetches {
            match outcome {
                Ok(raw_items) => {
                    debug!(
                        "Source {} returned {} candidates",
                        source.source_id(),
                        raw_items.len()
                    );
                    for raw in raw_items {
                        report.candidates += 1;
                        let inserted = self.ingest(raw, &mut touched).await?;
                        if inserted {
                            report.collected += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Source {} failed, continuing: {}", source.source_id(), e);
                    report
                        .connector_errors
                        .push(format!("{}: {}", source.source_id(), e));
                }
            }
        }

        cycle.touched = touched.into_iter().collect();
        info!(
            "Collection done: {} new of {} candidates, {} connector errors",
            report.collected,
            report.candidates,
            report.connector_errors.len()
        );
        Ok(())
    }

    async fn ingest(&self, raw: RawItem, touched: &mut HashSet<Fingerprint>) -> Result<bool> {
        let fingerprint = Fingerprint::derive(
            &raw.source_id,
            raw.external_id.as_deref(),
            &raw.url,
            &raw.title,
        );
        // Duplicates still count as touched so an item collected by an
        // earlier cycle can enter this cycle's digest once processed.
        touched.insert(fingerprint);
        let item = ContentItem::from_raw(raw, fingerprint, Utc::now());
        self.store.upsert_raw(item).await
    }

    /// Processing stage: bounded batches, per-item claim, concurrent
    /// summarization up to the worker count.
    async fn process(&self, cycle: &mut PipelineCycle, report: &mut RunReport) -> Result<()> {
        let mut touched: HashSet<Fingerprint> = cycle.touched.iter().copied().collect();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                info!("Draining: leaving remaining items collected");
                break;
            }
            let handled = report.processed + report.failed;
            if handled >= self.config.cycle_item_cap {
                info!("Per-cycle item cap {} reached", self.config.cycle_item_cap);
                break;
            }
            let batch_size = self
                .config
                .batch_size
                .min(self.config.cycle_item_cap - handled);
            let batch = self
                .store
                .list_by_status(ItemStatus::Collected, batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            debug!("Processing batch of {} items", batch.len());
            for item in &batch {
                touched.insert(item.fingerprint);
            }

            let outcomes = stream::iter(batch)
                .map(|item| self.process_one(item))
                .buffer_unordered(self.config.worker_count)
                .collect::<Vec<_>>()
                .await;

            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Processed => report.processed += 1,
                    ItemOutcome::Failed => report.failed += 1,
                    ItemOutcome::Conflict => report.conflicts += 1,
                    ItemOutcome::Released => {}
                    ItemOutcome::Fatal(e) => return Err(e),
                }
            }
        }

        cycle.touched = touched.into_iter().collect();
        self.store.update_cycle(cycle).await?;
        Ok(())
    }

    /// Claim, summarize with bounded retries, and record the outcome for
    /// one item. Every failed attempt is persisted through `mark_failed`
    /// so the attempt bound holds across restarts.
    async fn process_one(&self, item: ContentItem) -> ItemOutcome {
        let fingerprint = item.fingerprint;

        match self.store.mark_processing(&fingerprint).await {
            Ok(()) => {}
            Err(PipelineError::Conflict { .. }) | Err(PipelineError::ItemNotFound { .. }) => {
                debug!("Item {} claimed elsewhere, skipping", fingerprint);
                return ItemOutcome::Conflict;
            }
            Err(e) => return ItemOutcome::Fatal(e),
        }

        let mut delays = self.retry.delays();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let attempt = timeout(
                self.config.summarize_timeout,
                self.summarizer.summarize(&item),
            )
            .await;

            let failure = match attempt {
                Ok(Ok(summary)) => {
                    match self.store.mark_processed(&fingerprint, summary).await {
                        Ok(()) => {
                            debug!("Item {} processed on attempt {}", fingerprint, attempts);
                            return ItemOutcome::Processed;
                        }
                        Err(e) => return ItemOutcome::Fatal(e),
                    }
                }
                Ok(Err(e)) => e,
                Err(_) => PipelineError::Summarization {
                    retryable: true,
                    message: format!(
                        "summarize timed out after {:?}",
                        self.config.summarize_timeout
                    ),
                },
            };

            let retryable = failure.is_retryable();
            warn!(
                "Summarization attempt {} for {} failed (retryable: {}): {}",
                attempts, fingerprint, retryable, failure
            );

            let status = match self
                .store
                .mark_failed(&fingerprint, &failure.to_string(), retryable)
                .await
            {
                Ok(status) => status,
                Err(e) => return ItemOutcome::Fatal(e),
            };

            match status {
                ItemStatus::Failed => {
                    info!(
                        "Item {} terminalized after {} recorded failures",
                        fingerprint, attempts
                    );
                    return ItemOutcome::Failed;
                }
                ItemStatus::Collected => {
                    // Attempts remain; back off, then re-claim and retry
                    // unless the cycle is draining or out of budget.
                    if self.cancelled.load(Ordering::SeqCst)
                        || attempts >= self.retry.max_attempts
                    {
                        return ItemOutcome::Released;
                    }
                    if let Some(delay) = delays.next() {
                        tokio::time::sleep(delay).await;
                    }
                    match self.store.mark_processing(&fingerprint).await {
                        Ok(()) => continue,
                        Err(PipelineError::Conflict { .. }) => return ItemOutcome::Conflict,
                        Err(e) => return ItemOutcome::Fatal(e),
                    }
                }
                other => {
                    return ItemOutcome::Fatal(PipelineError::InvalidTransition {
                        fingerprint,
                        from: ItemStatus::Processing.as_str(),
                        to: other.as_str(),
                    })
                }
            }
        }
    }

    /// Digest stage: assemble from items processed within this cycle's
    /// touched set, persist, and hand off to delivery if configured.
    async fn digest(&self, cycle: &mut PipelineCycle, report: &mut RunReport) -> Result<()> {
        let items = self.store.get_items(&cycle.touched).await?;

        let mut builder = DigestBuilder::new(self.config.allow_empty_digest);
        for source in &self.sources {
            builder.set_priority(&source.source_id(), source.priority());
        }

        let digest = builder.build(cycle.cycle_id, &items)?;
        self.store.save_digest(&digest).await?;

        cycle.digest_id = Some(digest.digest_id);
        report.digest_id = Some(digest.digest_id);
        report.digest_entries = digest.entries.len();
        self.store.update_cycle(cycle).await?;

        if let Some(delivery) = &self.delivery {
            // Delivery failure is reported, never re-runs the cycle;
            // retrying transport is the delivery collaborator's concern.
            let result = match delivery.deliver(&digest).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Digest delivery failed: {}", e);
                    DeliveryResult {
                        status: DeliveryStatus::Failed,
                        error: Some(e.to_string()),
                    }
                }
            };
            self.store
                .mark_digest_delivery(digest.digest_id, result.status)
                .await?;
            report.delivery = Some(result);
        }

        Ok(())
    }
}
