//! In-memory doubles for the source API and the destination table.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde_json::Value;

use crate::database_ops::action_comments::{Destination, UpsertSink};
use crate::migration::model::ActionComment;
use crate::supabase::{SourceError, TableQuery, TableSource};

/// Serves fixed tables, applying PostgREST-style `not.is.null` / `is.null` / `eq`
/// filters and offset/limit ranges. Records every range requested.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<Value>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, usize, usize)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn failing_on(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    /// `(offset, limit)` of every request made against `table`, in order.
    pub fn calls(&self, table: &str) -> Vec<(usize, usize)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == table)
            .map(|(_, o, l)| (*o, *l))
            .collect()
    }
}

fn matches_filters(row: &Value, query: &TableQuery) -> bool {
    query.filters.iter().all(|f| {
        let cell = row.get(&f.column).unwrap_or(&Value::Null);
        match (f.op.as_str(), f.value.as_str()) {
            ("not.is", "null") => !cell.is_null(),
            ("is", "null") => cell.is_null(),
            ("eq", v) => cell.as_str() == Some(v) || cell.to_string() == v,
            _ => true,
        }
    })
}

#[async_trait::async_trait]
impl TableSource for MemorySource {
    async fn fetch_range(
        &self,
        query: &TableQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((query.table.clone(), offset, limit));
        if self.failing.contains(&query.table) {
            return Err(SourceError::Http {
                table: query.table.clone(),
                status: 500,
                body: "boom".into(),
            });
        }
        let Some(rows) = self.tables.get(&query.table) else {
            return Err(SourceError::Http {
                table: query.table.clone(),
                status: 404,
                body: "relation does not exist".into(),
            });
        };
        Ok(rows
            .iter()
            .filter(|r| matches_filters(r, query))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// A destination row as the in-memory table keeps it. `version` counts writes,
/// standing in for the server-managed `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub runner_id: String,
    pub requestor_id: String,
    pub season: String,
    pub comment: String,
    pub action_type: String,
    pub source_table: String,
    pub version: u32,
}

impl StoredRow {
    pub fn without_version(&self) -> StoredRow {
        StoredRow {
            version: 0,
            ..self.clone()
        }
    }
}

#[derive(Default)]
struct TableState {
    rows: BTreeMap<i64, StoredRow>,
    batches: Vec<Vec<i64>>,
    commits: usize,
    begins: usize,
    fail_on_batch: Option<usize>,
}

/// Shared keyed table; each `sink()` is one transaction over it.
#[derive(Clone, Default)]
pub struct MemoryTable {
    state: Arc<Mutex<TableState>>,
}

impl MemoryTable {
    /// Make the n-th batch (1-based, counted per sink) fail.
    pub fn failing_on_batch(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_on_batch = Some(n);
        self
    }

    pub fn sink(&self) -> MemorySink {
        MemorySink {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            batches_seen: 0,
        }
    }

    pub fn rows(&self) -> BTreeMap<i64, StoredRow> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn batches(&self) -> Vec<Vec<i64>> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    /// Sinks opened through `Destination::begin`.
    pub fn begins(&self) -> usize {
        self.state.lock().unwrap().begins
    }
}

#[async_trait::async_trait]
impl Destination for MemoryTable {
    type Sink = MemorySink;

    async fn begin(&self) -> Result<MemorySink> {
        self.state.lock().unwrap().begins += 1;
        Ok(self.sink())
    }

    async fn count_existing(&self, ids: &[i64]) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(ids.iter().filter(|id| state.rows.contains_key(id)).count() as i64)
    }
}

pub struct MemorySink {
    state: Arc<Mutex<TableState>>,
    staged: Vec<ActionComment>,
    batches_seen: usize,
}

#[async_trait::async_trait]
impl UpsertSink for MemorySink {
    async fn upsert_batch(&mut self, batch: &[ActionComment]) -> Result<u64> {
        self.batches_seen += 1;
        let mut state = self.state.lock().unwrap();
        if state.fail_on_batch == Some(self.batches_seen) {
            bail!("simulated failure on batch {}", self.batches_seen);
        }
        let mut seen = HashSet::new();
        for r in batch {
            if !seen.insert(r.action_request_id) {
                bail!("ON CONFLICT DO UPDATE command cannot affect row a second time");
            }
        }
        state
            .batches
            .push(batch.iter().map(|r| r.action_request_id).collect());
        self.staged.extend_from_slice(batch);
        Ok(batch.len() as u64)
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for r in self.staged {
            let version = state
                .rows
                .get(&r.action_request_id)
                .map_or(1, |existing| existing.version + 1);
            state.rows.insert(
                r.action_request_id,
                StoredRow {
                    runner_id: r.runner_id.to_string(),
                    requestor_id: r.requestor_id.to_string(),
                    season: r.season,
                    comment: r.comment,
                    action_type: r.action_type,
                    source_table: r.source_table.to_string(),
                    version,
                },
            );
        }
        state.commits += 1;
        Ok(())
    }
}
