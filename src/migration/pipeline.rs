//! Run coordinator: load indices, fetch comments, resolve, write, report.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::identity::{FallbackIndex, IdentityIndex};
use super::model::{ActionRequestRow, FallbackRow, IdentityRow};
use super::report::MigrationReport;
use super::resolve::{resolve, Resolution};
use crate::config::RunOptions;
use crate::database_ops::action_comments::{upsert_action_comments, Destination, UpsertSink};
use crate::supabase::{fetch_all_as, Filter, TableQuery, TableSource};

pub const PROFILES_TABLE: &str = "runners_profile";
pub const COACHES_TABLE: &str = "rhwb_coaches";
pub const REQUESTS_TABLE: &str = "rhwb_action_requests";

// email_id is not unique in either registry; ordering by the whole projection
// keeps offset pages disjoint and makes last-wins deterministic.
pub fn identity_query() -> TableQuery {
    TableQuery::new(PROFILES_TABLE, &["email_id", "runner_id"])
        .order_by(&["email_id", "runner_id"])
}

pub fn fallback_query() -> TableQuery {
    TableQuery::new(COACHES_TABLE, &["email_id", "fs_email_id"])
        .order_by(&["email_id", "fs_email_id"])
}

pub fn requests_query() -> TableQuery {
    TableQuery::new(REQUESTS_TABLE, &ActionRequestRow::COLUMNS).filter(Filter::not_null("comments"))
}

/// Both lookup tables, built from one snapshot.
pub async fn load_indices<S>(source: &S, opts: &RunOptions) -> Result<(IdentityIndex, FallbackIndex)>
where
    S: TableSource + ?Sized,
{
    let rows = fetch_all_as::<IdentityRow, _>(source, &identity_query(), opts.page_size)
        .await
        .with_context(|| format!("failed to fetch {PROFILES_TABLE}"))?;
    let identity = IdentityIndex::build(rows, opts.duplicate_policy)?;
    info!(mappings = identity.len(), "loaded runner_id mappings from {PROFILES_TABLE}");

    let rows = fetch_all_as::<FallbackRow, _>(source, &fallback_query(), opts.page_size)
        .await
        .with_context(|| format!("failed to fetch {COACHES_TABLE}"))?;
    let fallback = FallbackIndex::build(rows, opts.duplicate_policy)?;
    info!(mappings = fallback.len(), "loaded fs_email_id mappings from {COACHES_TABLE}");

    Ok((identity, fallback))
}

/// Action requests with a non-null comment, minus those whose comment is blank.
/// Returns the eligible rows and the number of blank ones dropped.
pub async fn fetch_eligible_requests<S>(
    source: &S,
    opts: &RunOptions,
) -> Result<(Vec<ActionRequestRow>, usize)>
where
    S: TableSource + ?Sized,
{
    let rows = fetch_all_as::<ActionRequestRow, _>(source, &requests_query(), opts.page_size)
        .await
        .with_context(|| format!("failed to fetch {REQUESTS_TABLE}"))?;
    let total = rows.len();
    let eligible: Vec<_> = rows.into_iter().filter(ActionRequestRow::is_eligible).collect();
    let blank = total - eligible.len();
    info!(eligible = eligible.len(), blank, "fetched action requests with comments");
    Ok((eligible, blank))
}

/// Everything read and resolved from the source, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub started_at: DateTime<Utc>,
    pub identity_mappings: usize,
    pub fallback_mappings: usize,
    pub fetched: usize,
    pub blank_comments: usize,
    pub resolution: Resolution,
}

impl PreparedRun {
    fn report(&self, written: usize, dry_run: bool) -> MigrationReport {
        MigrationReport {
            started_at: self.started_at,
            identity_mappings: self.identity_mappings,
            fallback_mappings: self.fallback_mappings,
            fetched: self.fetched,
            blank_comments: self.blank_comments,
            prepared: self.resolution.records.len(),
            via_fallback: self.resolution.via_fallback,
            written,
            dry_run,
            unmapped_runners: self.resolution.unmapped_runners.clone(),
            unmapped_requestors: self.resolution.unmapped_requestors.clone(),
            destination_rows: None,
        }
    }

    /// Upsert the resolved records through `sink` and report.
    pub async fn write<K>(&self, sink: K, batch_size: usize) -> Result<MigrationReport>
    where
        K: UpsertSink,
    {
        let written = upsert_action_comments(sink, &self.resolution.records, batch_size).await?;
        info!(written, "upsert finished");
        Ok(self.report(written, false))
    }

    /// Report without touching the destination.
    pub fn dry_run(&self) -> MigrationReport {
        self.report(0, true)
    }

    pub fn prepared_ids(&self) -> Vec<i64> {
        self.resolution
            .records
            .iter()
            .map(|r| r.action_request_id)
            .collect()
    }
}

/// Read side of a run: indices, eligible rows, resolution. No destination I/O.
pub async fn prepare<S>(source: &S, opts: &RunOptions) -> Result<PreparedRun>
where
    S: TableSource + ?Sized,
{
    let started_at = Utc::now();
    let (identity, fallback) = load_indices(source, opts).await?;
    let (rows, blank_comments) = fetch_eligible_requests(source, opts).await?;

    let resolution = resolve(&rows, &identity, &fallback);
    info!(
        prepared = resolution.records.len(),
        via_fallback = resolution.via_fallback,
        unmapped_runners = resolution.unmapped_runners.len(),
        unmapped_requestors = resolution.unmapped_requestors.len(),
        "mapped email_ids to runner_ids"
    );

    Ok(PreparedRun {
        started_at,
        identity_mappings: identity.len(),
        fallback_mappings: fallback.len(),
        fetched: rows.len(),
        blank_comments,
        resolution,
    })
}

/// Full run. The destination is opened only after the source side succeeded,
/// and never on a dry run.
pub async fn run_migration<S, D>(source: &S, dest: &D, opts: &RunOptions) -> Result<MigrationReport>
where
    S: TableSource + ?Sized,
    D: Destination,
{
    let prepared = prepare(source, opts).await?;
    if opts.dry_run {
        return Ok(prepared.dry_run());
    }
    let sink = dest.begin().await?;
    let mut report = prepared.write(sink, opts.batch_size).await?;
    match dest.count_existing(&prepared.prepared_ids()).await {
        Ok(n) => report.destination_rows = Some(n),
        Err(e) => warn!(error = %e, "post-write row count failed"),
    }
    Ok(report)
}
