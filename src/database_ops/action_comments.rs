//! Idempotent writer for the destination `action_comments` table.
use anyhow::{Context, Result};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::db::Db;
use crate::config::{DestinationConfig, IdColumnType};
use crate::migration::model::ActionComment;

pub const TABLE: &str = "action_comments";

const INSERT_PREFIX: &str = "INSERT INTO action_comments \
     (action_request_id, runner_id, requestor_id, season, comment, action_type, source_table) ";

// Every column except the server-managed creation timestamp is refreshed, so a
// re-run converges on the source snapshot.
const ON_CONFLICT: &str = " ON CONFLICT (action_request_id) DO UPDATE SET \
     runner_id = EXCLUDED.runner_id, \
     requestor_id = EXCLUDED.requestor_id, \
     season = EXCLUDED.season, \
     comment = EXCLUDED.comment, \
     action_type = EXCLUDED.action_type, \
     source_table = EXCLUDED.source_table, \
     updated_at = NOW()";

/// Columns bound per row; with the default batch of 500 this stays far below
/// Postgres' 65535 bind parameter limit.
pub const BINDS_PER_ROW: usize = 7;

/// Build one multi-row upsert statement for `batch`.
///
/// Identity keys are bound as text and cast to `id_type`, so the same records
/// load into `text`, `integer`, `bigint` or `uuid` key columns.
pub fn build_upsert_query(
    batch: &[ActionComment],
    id_type: IdColumnType,
) -> QueryBuilder<'_, Postgres> {
    let cast = id_type.cast_suffix();
    let mut qb = QueryBuilder::new(INSERT_PREFIX);
    qb.push_values(batch, |mut b, r| {
        b.push_bind(r.action_request_id)
            .push_bind(r.runner_id.as_str())
            .push_unseparated(cast)
            .push_bind(r.requestor_id.as_str())
            .push_unseparated(cast)
            .push_bind(r.season.as_str())
            .push_bind(r.comment.as_str())
            .push_bind(r.action_type.as_str())
            .push_bind(r.source_table);
    });
    qb.push(ON_CONFLICT);
    qb
}

/// Destination for batched upserts. Nothing is visible until `commit`; dropping a
/// sink without committing discards every batch.
#[async_trait::async_trait]
pub trait UpsertSink: Send {
    async fn upsert_batch(&mut self, batch: &[ActionComment]) -> Result<u64>;
    async fn commit(self) -> Result<()>;
}

/// Where a run writes. Nothing is opened until `begin`, so a run that never
/// reaches the write phase never touches the destination.
#[async_trait::async_trait]
pub trait Destination: Send + Sync {
    type Sink: UpsertSink;

    async fn begin(&self) -> Result<Self::Sink>;

    /// Rows currently stored for `ids`.
    async fn count_existing(&self, ids: &[i64]) -> Result<i64>;
}

/// Cloud SQL destination; the pool is opened on first use.
pub struct PgDestination {
    cfg: DestinationConfig,
    db: OnceCell<Db>,
}

impl PgDestination {
    pub fn new(cfg: DestinationConfig) -> Self {
        Self {
            cfg,
            db: OnceCell::new(),
        }
    }

    async fn db(&self) -> Result<&Db> {
        self.db
            .get_or_try_init(|| Db::connect(&self.cfg))
            .await
            .context("failed to connect to Cloud SQL")
    }

    /// Close the pool if it was ever opened.
    pub async fn close(&self) {
        if let Some(db) = self.db.get() {
            db.close().await;
        }
    }
}

#[async_trait::async_trait]
impl Destination for PgDestination {
    type Sink = PgUpsertSink;

    async fn begin(&self) -> Result<PgUpsertSink> {
        let db = self.db().await?;
        PgUpsertSink::begin(db, self.cfg.id_type).await
    }

    async fn count_existing(&self, ids: &[i64]) -> Result<i64> {
        count_existing(self.db().await?, ids).await
    }
}

/// Upserts inside one Postgres transaction.
pub struct PgUpsertSink {
    tx: Transaction<'static, Postgres>,
    id_type: IdColumnType,
}

impl PgUpsertSink {
    pub async fn begin(db: &Db, id_type: IdColumnType) -> Result<Self> {
        let tx = db
            .pool
            .begin()
            .await
            .context("failed to open destination transaction")?;
        Ok(Self { tx, id_type })
    }
}

#[async_trait::async_trait]
impl UpsertSink for PgUpsertSink {
    async fn upsert_batch(&mut self, batch: &[ActionComment]) -> Result<u64> {
        let mut qb = build_upsert_query(batch, self.id_type);
        let done = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("upsert of {} rows into {TABLE} failed", batch.len()))?;
        Ok(done.rows_affected())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit action_comments upsert")
    }
}

/// Write `records` in order-preserving batches of `batch_size` and commit once.
///
/// Returns the number of rows sent, which can exceed the rows actually changed.
/// Empty input is a no-op and commits nothing.
#[instrument(skip(sink, records), fields(records = records.len()))]
pub async fn upsert_action_comments<K>(
    mut sink: K,
    records: &[ActionComment],
    batch_size: usize,
) -> Result<usize>
where
    K: UpsertSink,
{
    if records.is_empty() {
        info!("no records to upsert");
        return Ok(0);
    }
    let batch_size = batch_size.max(1);
    let mut total = 0usize;
    for batch in records.chunks(batch_size) {
        let affected = sink.upsert_batch(batch).await?;
        total += batch.len();
        debug!(batch = batch.len(), affected, "batch applied");
        info!("upserted {}/{} records", total, records.len());
    }
    sink.commit().await?;
    Ok(total)
}

/// Count destination rows whose `action_request_id` is in `ids`.
pub async fn count_existing(db: &Db, ids: &[i64]) -> Result<i64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM action_comments WHERE action_request_id = ANY($1)",
    )
    .bind(ids)
    .fetch_one(&db.pool)
    .await
    .context("count of migrated action_comments failed")?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::model::{IdentityKey, SOURCE_TABLE};
    use crate::testing::MemoryTable;

    fn comment(id: i64) -> ActionComment {
        ActionComment {
            action_request_id: id,
            runner_id: IdentityKey::new(format!("R{id}")).unwrap(),
            requestor_id: IdentityKey::new("Q").unwrap(),
            season: "S1".into(),
            comment: format!("comment {id}"),
            action_type: "T".into(),
            source_table: SOURCE_TABLE,
        }
    }

    #[test]
    fn upsert_statement_binds_every_column_and_targets_natural_key() {
        let batch: Vec<_> = (1..=3).map(comment).collect();
        let qb = build_upsert_query(&batch, IdColumnType::Text);
        let sql = qb.sql();
        assert!(sql.starts_with("INSERT INTO action_comments (action_request_id, runner_id"));
        assert!(sql.contains("ON CONFLICT (action_request_id) DO UPDATE SET"));
        assert!(sql.contains("comment = EXCLUDED.comment"));
        assert!(sql.contains("updated_at = NOW()"));
        assert!(sql.contains(&format!("${}", 3 * BINDS_PER_ROW)));
        assert!(!sql.contains(&format!("${}", 3 * BINDS_PER_ROW + 1)));
        assert!(!sql.contains("::"));
    }

    #[test]
    fn numeric_key_columns_get_a_cast_on_both_identity_binds() {
        let batch: Vec<_> = (1..=2).map(comment).collect();
        let qb = build_upsert_query(&batch, IdColumnType::BigInt);
        let sql = qb.sql();
        assert!(sql.contains("($1, $2::bigint, $3::bigint, $4, $5, $6, $7)"));
        assert!(sql.contains("($8, $9::bigint, $10::bigint, $11, $12, $13, $14)"));

        let qb = build_upsert_query(&batch, IdColumnType::Uuid);
        assert!(qb.sql().contains("$2::uuid, $3::uuid"));
    }

    #[tokio::test]
    async fn batches_are_ceil_n_over_b_and_order_preserving() {
        let table = MemoryTable::default();
        let records: Vec<_> = (1..=1201).map(comment).collect();
        let written = upsert_action_comments(table.sink(), &records, 500)
            .await
            .unwrap();
        assert_eq!(written, 1201);

        let batches = table.batches();
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![500, 500, 201]
        );
        let flattened: Vec<i64> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, (1..=1201).collect::<Vec<_>>());
        assert_eq!(table.commits(), 1);
        assert_eq!(table.rows().len(), 1201);
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let table = MemoryTable::default();
        let written = upsert_action_comments(table.sink(), &[], 500).await.unwrap();
        assert_eq!(written, 0);
        assert!(table.batches().is_empty());
        assert_eq!(table.commits(), 0);
    }

    #[tokio::test]
    async fn failed_batch_commits_nothing() {
        let table = MemoryTable::default().failing_on_batch(2);
        let records: Vec<_> = (1..=10).map(comment).collect();
        let err = upsert_action_comments(table.sink(), &records, 4).await;
        assert!(err.is_err());
        assert_eq!(table.commits(), 0);
        assert!(table.rows().is_empty());
    }

    #[tokio::test]
    async fn rerun_updates_in_place() {
        let table = MemoryTable::default();
        let mut records: Vec<_> = (1..=3).map(comment).collect();
        upsert_action_comments(table.sink(), &records, 2).await.unwrap();
        records[1].comment = "edited".into();
        upsert_action_comments(table.sink(), &records, 2).await.unwrap();

        let rows = table.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[&2].comment, "edited");
        assert_eq!(rows[&2].version, 2);
        assert_eq!(rows[&1].version, 2);
    }
}
