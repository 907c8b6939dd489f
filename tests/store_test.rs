use ai_news_digest::store::{ItemStore, MemoryStore, SqliteStore};
use ai_news_digest::types::{
    ContentItem, CycleStage, DeliveryStatus, Digest, ItemStatus, PipelineCycle, PipelineError,
    RawItem, Summary,
};
use ai_news_digest::Fingerprint;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

const RETRY_LIMIT: u32 = 3;

fn item(title: &str, offset_secs: i64) -> ContentItem {
    let url = format!("https://example.com/{}", title);
    let raw = RawItem {
        source_id: "feed".to_string(),
        external_id: None,
        url: url.clone(),
        title: title.to_string(),
        body: format!("body of {}", title),
        published_at: None,
    };
    let fp = Fingerprint::derive("feed", None, &url, title);
    ContentItem::from_raw(raw, fp, Utc::now() + Duration::seconds(offset_secs))
}

fn summary() -> Summary {
    Summary {
        short_text: "short".to_string(),
        tags: vec!["tag".to_string()],
    }
}

async fn memory_store() -> Arc<dyn ItemStore> {
    Arc::new(MemoryStore::new(RETRY_LIMIT))
}

async fn sqlite_store() -> Arc<dyn ItemStore> {
    Arc::new(
        SqliteStore::connect("sqlite::memory:", RETRY_LIMIT)
            .await
            .expect("in-memory sqlite"),
    )
}

async fn check_upsert_is_idempotent(store: Arc<dyn ItemStore>) {
    let original = item("a", 0);
    let fp = original.fingerprint;
    assert!(store.upsert_raw(original.clone()).await.unwrap());

    // Claim and fail once so re-collection has state it must not reset.
    store.mark_processing(&fp).await.unwrap();
    store.mark_failed(&fp, "boom", true).await.unwrap();

    assert!(!store.upsert_raw(original).await.unwrap());
    let stored = store.get_item(&fp).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Collected);
    assert_eq!(stored.failure_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));
}

async fn check_claim_conflicts(store: Arc<dyn ItemStore>) {
    let it = item("a", 0);
    let fp = it.fingerprint;
    store.upsert_raw(it).await.unwrap();

    let (first, second) = tokio::join!(store.mark_processing(&fp), store.mark_processing(&fp));
    let oks = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1, "exactly one claim wins");
    assert!([first, second]
        .into_iter()
        .any(|r| matches!(r, Err(PipelineError::Conflict { .. }))));
}

async fn check_failure_accounting(store: Arc<dyn ItemStore>) {
    let it = item("a", 0);
    let fp = it.fingerprint;
    store.upsert_raw(it).await.unwrap();

    for attempt in 1..RETRY_LIMIT {
        store.mark_processing(&fp).await.unwrap();
        let status = store.mark_failed(&fp, "transient", true).await.unwrap();
        assert_eq!(status, ItemStatus::Collected, "attempt {} releases", attempt);
    }
    store.mark_processing(&fp).await.unwrap();
    let status = store.mark_failed(&fp, "transient", true).await.unwrap();
    assert_eq!(status, ItemStatus::Failed);

    let stored = store.get_item(&fp).await.unwrap().unwrap();
    assert_eq!(stored.failure_count, RETRY_LIMIT);
    // Failed items are no longer claimable.
    assert!(matches!(
        store.mark_processing(&fp).await,
        Err(PipelineError::Conflict { .. })
    ));
}

async fn check_non_retryable_terminalizes(store: Arc<dyn ItemStore>) {
    let it = item("a", 0);
    let fp = it.fingerprint;
    store.upsert_raw(it).await.unwrap();
    store.mark_processing(&fp).await.unwrap();
    let status = store.mark_failed(&fp, "permanent", false).await.unwrap();
    assert_eq!(status, ItemStatus::Failed);
    let stored = store.get_item(&fp).await.unwrap().unwrap();
    assert_eq!(stored.failure_count, 1);
}

async fn check_processed_keeps_summary(store: Arc<dyn ItemStore>) {
    let it = item("a", 0);
    let fp = it.fingerprint;
    store.upsert_raw(it).await.unwrap();
    store.mark_processing(&fp).await.unwrap();
    store.mark_processed(&fp, summary()).await.unwrap();

    let stored = store.get_item(&fp).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Processed);
    assert_eq!(stored.summary.unwrap(), summary());
    assert!(stored.last_error.is_none());

    // Processed is terminal for the claim path too.
    assert!(store.mark_processed(&fp, summary()).await.is_err());
}

async fn check_list_orders_and_bounds(store: Arc<dyn ItemStore>) {
    store.upsert_raw(item("newest", 20)).await.unwrap();
    store.upsert_raw(item("oldest", 0)).await.unwrap();
    store.upsert_raw(item("middle", 10)).await.unwrap();

    let page = store
        .list_by_status(ItemStatus::Collected, 2)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].title, "oldest");
    assert_eq!(page[1].title, "middle");

    let rest = store
        .list_by_status(ItemStatus::Collected, 10)
        .await
        .unwrap();
    assert_eq!(rest.len(), 3);
    assert_eq!(rest[2].title, "newest");
}

async fn check_cycle_gate(store: Arc<dyn ItemStore>) {
    let mut first = PipelineCycle::start_now();
    store.begin_cycle(&first).await.unwrap();

    assert!(matches!(
        store.begin_cycle(&PipelineCycle::start_now()).await,
        Err(PipelineError::AlreadyRunning)
    ));

    first.stage = CycleStage::Completed;
    first.finished_at = Some(Utc::now());
    store.update_cycle(&first).await.unwrap();

    let second = PipelineCycle::start_now();
    store.begin_cycle(&second).await.unwrap();
    let latest = store.latest_cycle().await.unwrap().unwrap();
    assert_eq!(latest.cycle_id, second.cycle_id);
}

async fn check_stale_cycle_is_reclaimed(store: Arc<dyn ItemStore>) {
    // A cycle abandoned mid-stage, as a crashed process leaves it.
    let mut crashed = PipelineCycle::start_now();
    crashed.started_at = Utc::now() - Duration::hours(2);
    store.begin_cycle(&crashed).await.unwrap();

    // The next trigger terminalizes the leftover instead of wedging.
    let next = PipelineCycle::start_now();
    store.begin_cycle(&next).await.unwrap();

    let latest = store.latest_cycle().await.unwrap().unwrap();
    assert_eq!(latest.cycle_id, next.cycle_id);
    assert_eq!(latest.stage, CycleStage::Collecting);
}

async fn check_digest_roundtrip_and_immutability(store: Arc<dyn ItemStore>) {
    let cycle_id = Uuid::new_v4();
    let digest = Digest {
        digest_id: Uuid::new_v4(),
        cycle_id,
        generated_at: Utc::now(),
        entries: Vec::new(),
        body: "AI News Digest\n".to_string(),
        delivery_status: DeliveryStatus::Pending,
    };
    store.save_digest(&digest).await.unwrap();

    let loaded = store.get_digest_for_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(loaded.digest_id, digest.digest_id);
    assert_eq!(loaded.delivery_status, DeliveryStatus::Pending);

    store
        .mark_digest_delivery(digest.digest_id, DeliveryStatus::Sent)
        .await
        .unwrap();
    store
        .mark_digest_delivery(digest.digest_id, DeliveryStatus::Failed)
        .await
        .unwrap();
    let sent = store.get_digest_for_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(sent.delivery_status, DeliveryStatus::Sent);
}

macro_rules! contract_tests {
    ($module:ident, $make:ident) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn upsert_is_idempotent() {
                check_upsert_is_idempotent($make().await).await;
            }

            #[tokio::test]
            async fn claim_conflicts() {
                check_claim_conflicts($make().await).await;
            }

            #[tokio::test]
            async fn failure_accounting() {
                check_failure_accounting($make().await).await;
            }

            #[tokio::test]
            async fn non_retryable_terminalizes() {
                check_non_retryable_terminalizes($make().await).await;
            }

            #[tokio::test]
            async fn processed_keeps_summary() {
                check_processed_keeps_summary($make().await).await;
            }

            #[tokio::test]
            async fn list_orders_and_bounds() {
                check_list_orders_and_bounds($make().await).await;
            }

            #[tokio::test]
            async fn cycle_gate() {
                check_cycle_gate($make().await).await;
            }

            #[tokio::test]
            async fn stale_cycle_is_reclaimed() {
                check_stale_cycle_is_reclaimed($make().await).await;
            }

            #[tokio::test]
            async fn digest_roundtrip_and_immutability() {
                check_digest_roundtrip_and_immutability($make().await).await;
            }
        }
    };
}

contract_tests!(memory, memory_store);
contract_tests!(sqlite, sqlite_store);
