use super::ItemStore;
use crate::fingerprint::Fingerprint;
use crate::types::{
    ContentItem, CycleStage, DeliveryStatus, Digest, DigestEntry, ItemStatus, PipelineCycle,
    PipelineError, Result, Summary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// SQLite-backed item store. Statements rely on SQLite's atomic single
/// UPDATE semantics for the status transitions and on a guarded INSERT
/// for the single-flight cycle gate.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    retry_limit: u32,
    stale_after: Duration,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, retry_limit: u32) -> Result<Self> {
        // One connection keeps in-memory databases coherent and is plenty
        // for a single-flight pipeline.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        let store = Self {
            pool,
            retry_limit,
            stale_after: Duration::from_secs(3600),
        };
        store.init_schema().await?;
        info!("Connected item store: {}", database_url);
        Ok(store)
    }

    /// Age past which an unfinished cycle counts as crashed.
    pub fn with_stale_timeout(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                fingerprint   TEXT PRIMARY KEY,
                source_id     TEXT NOT NULL,
                url           TEXT NOT NULL,
                title         TEXT NOT NULL,
                body          TEXT NOT NULL,
                published_at  TEXT,
                collected_at  TEXT NOT NULL,
                status        TEXT NOT NULL,
                summary       TEXT,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_error    TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_items_status ON items (status, collected_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycles (
                cycle_id    TEXT PRIMARY KEY,
                started_at  TEXT NOT NULL,
                finished_at TEXT,
                stage       TEXT NOT NULL,
                touched     TEXT NOT NULL,
                digest_id   TEXT,
                failure     TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS digests (
                digest_id       TEXT PRIMARY KEY,
                cycle_id        TEXT NOT NULL UNIQUE,
                generated_at    TEXT NOT NULL,
                entries         TEXT NOT NULL,
                body            TEXT NOT NULL,
                delivery_status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn item_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let fingerprint: String = row.try_get("fingerprint")?;
    let fingerprint = Fingerprint::parse(&fingerprint)
        .ok_or_else(|| PipelineError::StoreUnavailable(format!("bad fingerprint: {fingerprint}")))?;
    let status: String = row.try_get("status")?;
    let status = ItemStatus::parse(&status)
        .ok_or_else(|| PipelineError::StoreUnavailable(format!("bad item status: {status}")))?;
    let summary: Option<String> = row.try_get("summary")?;
    let summary: Option<Summary> = match summary {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(ContentItem {
        fingerprint,
        source_id: row.try_get("source_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
        collected_at: row.try_get::<DateTime<Utc>, _>("collected_at")?,
        status,
        summary,
        failure_count: row.try_get::<i64, _>("failure_count")? as u32,
        last_error: row.try_get("last_error")?,
    })
}

fn cycle_from_row(row: &SqliteRow) -> Result<PipelineCycle> {
    let cycle_id: String = row.try_get("cycle_id")?;
    let cycle_id = Uuid::parse_str(&cycle_id)
        .map_err(|e| PipelineError::StoreUnavailable(format!("bad cycle id: {e}")))?;
    let stage: String = row.try_get("stage")?;
    let stage = CycleStage::parse(&stage)
        .ok_or_else(|| PipelineError::StoreUnavailable(format!("bad cycle stage: {stage}")))?;
    let touched: String = row.try_get("touched")?;
    let touched: Vec<Fingerprint> = serde_json::from_str(&touched)?;
    let digest_id: Option<String> = row.try_get("digest_id")?;
    let digest_id = match digest_id {
        Some(id) => Some(
            Uuid::parse_str(&id)
                .map_err(|e| PipelineError::StoreUnavailable(format!("bad digest id: {e}")))?,
        ),
        None => None,
    };

    Ok(PipelineCycle {
        cycle_id,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        stage,
        touched,
        digest_id,
        failure: row.try_get("failure")?,
    })
}

fn digest_from_row(row: &SqliteRow) -> Result<Digest> {
    let digest_id: String = row.try_get("digest_id")?;
    let cycle_id: String = row.try_get("cycle_id")?;
    let entries: String = row.try_get("entries")?;
    let entries: Vec<DigestEntry> = serde_json::from_str(&entries)?;
    let delivery_status: String = row.try_get("delivery_status")?;
    let delivery_status = DeliveryStatus::parse(&delivery_status).ok_or_else(|| {
        PipelineError::StoreUnavailable(format!("bad delivery status: {delivery_status}"))
    })?;

    Ok(Digest {
        digest_id: Uuid::parse_str(&digest_id)
            .map_err(|e| PipelineError::StoreUnavailable(format!("bad digest id: {e}")))?,
        cycle_id: Uuid::parse_str(&cycle_id)
            .map_err(|e| PipelineError::StoreUnavailable(format!("bad cycle id: {e}")))?,
        generated_at: row.try_get::<DateTime<Utc>, _>("generated_at")?,
        entries,
        body: row.try_get("body")?,
        delivery_status,
    })
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn upsert_raw(&self, item: ContentItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO items
                (fingerprint, source_id, url, title, body, published_at,
                 collected_at, status, summary, failure_count, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, 0, NULL)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(item.fingerprint.to_string())
        .bind(&item.source_id)
        .bind(&item.url)
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.published_at)
        .bind(item.collected_at)
        .bind(item.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(&self, status: ItemStatus, limit: usize) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM items
            WHERE status = ?1
            ORDER BY collected_at ASC, fingerprint ASC
            LIMIT ?2
            "#,
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn mark_processing(&self, fingerprint: &Fingerprint) -> Result<()> {
        let result = sqlx::query(
            "UPDATE items SET status = 'processing' WHERE fingerprint = ?1 AND status = 'collected'",
        )
        .bind(fingerprint.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get_item(fingerprint).await? {
            Some(_) => Err(PipelineError::Conflict {
                fingerprint: *fingerprint,
            }),
            None => Err(PipelineError::ItemNotFound {
                fingerprint: *fingerprint,
            }),
        }
    }

    async fn mark_processed(&self, fingerprint: &Fingerprint, summary: Summary) -> Result<()> {
        let summary_json = serde_json::to_string(&summary)?;
        let result = sqlx::query(
            r#"
            UPDATE items SET status = 'processed', summary = ?1, last_error = NULL
            WHERE fingerprint = ?2 AND status = 'processing'
            "#,
        )
        .bind(summary_json)
        .bind(fingerprint.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get_item(fingerprint).await? {
            Some(item) => Err(PipelineError::InvalidTransition {
                fingerprint: *fingerprint,
                from: item.status.as_str(),
                to: ItemStatus::Processed.as_str(),
            }),
            None => Err(PipelineError::ItemNotFound {
                fingerprint: *fingerprint,
            }),
        }
    }

    async fn mark_failed(
        &self,
        fingerprint: &Fingerprint,
        error: &str,
        retryable: bool,
    ) -> Result<ItemStatus> {
        // RETURNING keeps the transition and its observed outcome one
        // statement; a separate readback could see a later claim by
        // another worker process.
        let row = sqlx::query(
            r#"
            UPDATE items SET
                failure_count = failure_count + 1,
                last_error = ?1,
                status = CASE
                    WHEN ?2 AND failure_count + 1 < ?3 THEN 'collected'
                    ELSE 'failed'
                END
            WHERE fingerprint = ?4 AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(error)
        .bind(retryable)
        .bind(self.retry_limit as i64)
        .bind(fingerprint.to_string())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let status: String = row.try_get("status")?;
            return ItemStatus::parse(&status).ok_or_else(|| {
                PipelineError::StoreUnavailable(format!("bad item status: {status}"))
            });
        }
        match self.get_item(fingerprint).await? {
            Some(item) => Err(PipelineError::InvalidTransition {
                fingerprint: *fingerprint,
                from: item.status.as_str(),
                to: ItemStatus::Failed.as_str(),
            }),
            None => Err(PipelineError::ItemNotFound {
                fingerprint: *fingerprint,
            }),
        }
    }

    async fn get_item(&self, fingerprint: &Fingerprint) -> Result<Option<ContentItem>> {
        let row = sqlx::query("SELECT * FROM items WHERE fingerprint = ?1")
            .bind(fingerprint.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn get_items(&self, fingerprints: &[Fingerprint]) -> Result<Vec<ContentItem>> {
        let mut items = Vec::with_capacity(fingerprints.len());
        for fp in fingerprints {
            if let Some(item) = self.get_item(fp).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn begin_cycle(&self, cycle: &PipelineCycle) -> Result<()> {
        // An unfinished cycle past the stale bound is a crash leftover;
        // terminalize it so the gate cannot wedge permanently.
        let cutoff = Utc::now() - self.stale_after;
        let reclaimed = sqlx::query(
            r#"
            UPDATE cycles SET
                stage = 'failed',
                finished_at = ?1,
                failure = 'crashed or stalled; reclaimed by a later trigger'
            WHERE stage NOT IN ('completed', 'failed') AND started_at < ?2
            "#,
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        if reclaimed.rows_affected() > 0 {
            warn!("Reclaimed {} stale cycle(s)", reclaimed.rows_affected());
        }

        // Guarded insert: the WHERE NOT EXISTS check and the insert are
        // one statement, so two concurrent starters cannot both win.
        let result = sqlx::query(
            r#"
            INSERT INTO cycles (cycle_id, started_at, finished_at, stage, touched, digest_id, failure)
            SELECT ?1, ?2, NULL, ?3, ?4, NULL, NULL
            WHERE NOT EXISTS (
                SELECT 1 FROM cycles WHERE stage NOT IN ('completed', 'failed')
            )
            "#,
        )
        .bind(cycle.cycle_id.to_string())
        .bind(cycle.started_at)
        .bind(cycle.stage.as_str())
        .bind(serde_json::to_string(&cycle.touched)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(PipelineError::AlreadyRunning)
        }
    }

    async fn update_cycle(&self, cycle: &PipelineCycle) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cycles SET
                finished_at = ?1, stage = ?2, touched = ?3, digest_id = ?4, failure = ?5
            WHERE cycle_id = ?6
            "#,
        )
        .bind(cycle.finished_at)
        .bind(cycle.stage.as_str())
        .bind(serde_json::to_string(&cycle.touched)?)
        .bind(cycle.digest_id.map(|id| id.to_string()))
        .bind(&cycle.failure)
        .bind(cycle.cycle_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(PipelineError::StoreUnavailable(format!(
                "unknown cycle {}",
                cycle.cycle_id
            )))
        }
    }

    async fn latest_cycle(&self) -> Result<Option<PipelineCycle>> {
        let row = sqlx::query("SELECT * FROM cycles ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(cycle_from_row).transpose()
    }

    async fn save_digest(&self, digest: &Digest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digests (digest_id, cycle_id, generated_at, entries, body, delivery_status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(digest.digest_id.to_string())
        .bind(digest.cycle_id.to_string())
        .bind(digest.generated_at)
        .bind(serde_json::to_string(&digest.entries)?)
        .bind(&digest.body)
        .bind(digest.delivery_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_digest_delivery(&self, digest_id: Uuid, status: DeliveryStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE digests SET delivery_status = ?1
            WHERE digest_id = ?2 AND delivery_status != 'sent'
            "#,
        )
        .bind(status.as_str())
        .bind(digest_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Delivery update for {} changed nothing (missing or already sent)", digest_id);
        }
        Ok(())
    }

    async fn get_digest_for_cycle(&self, cycle_id: Uuid) -> Result<Option<Digest>> {
        let row = sqlx::query("SELECT * FROM digests WHERE cycle_id = ?1")
            .bind(cycle_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(digest_from_row).transpose()
    }
}
