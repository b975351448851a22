use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::SourceConfig;

const MAX_ERROR_BODY: usize = 512;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{table}: http {status}: {body}")]
    Http {
        table: String,
        status: u16,
        body: String,
    },
    #[error("network: {0}")]
    Net(#[from] reqwest::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{table}: unexpected response shape: {detail}")]
    Shape { table: String, detail: String },
}

/// A single PostgREST horizontal filter, rendered as `column=op.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: String,
    pub value: String,
}

impl Filter {
    pub fn new(column: &str, op: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            op: op.to_string(),
            value: value.to_string(),
        }
    }

    /// `column IS NOT NULL`
    pub fn not_null(column: &str) -> Self {
        Self::new(column, "not.is", "null")
    }

    pub fn query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("{}.{}", self.op, self.value))
    }
}

/// Projection + filters against one table. Pagination is applied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    /// Sort keys, ascending. Defaults to the first projected column.
    pub order_by: Vec<String>,
}

impl TableQuery {
    pub fn new(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            filters: Vec::new(),
            order_by: columns.first().map(|c| c.to_string()).into_iter().collect(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the sort keys. Offset paging only visits every row exactly once
    /// when the keys are unique per row.
    pub fn order_by(mut self, columns: &[&str]) -> Self {
        self.order_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn select_clause(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        }
    }

    /// Query string pairs for one bounded range of rows.
    pub fn query_pairs(&self, offset: usize, limit: usize) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.select_clause())];
        pairs.extend(self.filters.iter().map(Filter::query_pair));
        // Offset paging is only consistent across requests under a stable order.
        if !self.order_by.is_empty() {
            let order: Vec<String> = self.order_by.iter().map(|c| format!("{c}.asc")).collect();
            pairs.push(("order".to_string(), order.join(",")));
        }
        pairs.push(("offset".to_string(), offset.to_string()));
        pairs.push(("limit".to_string(), limit.to_string()));
        pairs
    }
}

/// Anything that can return one bounded page of rows for a query.
#[async_trait::async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch_range(
        &self,
        query: &TableQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError>;
}

/// Supabase REST (PostgREST) client authenticated with the service role key.
#[derive(Clone)]
pub struct SupabaseClient {
    rest_url: String,
    http: Client,
    service_key: String,
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("rest_url", &self.rest_url)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    pub fn new(cfg: &SourceConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .user_agent("action-comments-migrate/0.1")
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            rest_url: format!("{}/rest/v1", cfg.url.trim_end_matches('/')),
            http,
            service_key: cfg.service_key.clone(),
        })
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }
}

#[async_trait::async_trait]
impl TableSource for SupabaseClient {
    #[instrument(skip(self, query), fields(table = %query.table))]
    async fn fetch_range(
        &self,
        query: &TableQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError> {
        let resp = self
            .http
            .get(self.table_url(&query.table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Accept", "application/json")
            .query(&query.query_pairs(offset, limit))
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                table: query.table.clone(),
                status: status.as_u16(),
                body: truncate_for_log(body, MAX_ERROR_BODY),
            });
        }

        let body: Value = resp.json().await?;
        match body {
            Value::Array(rows) => {
                debug!(offset, limit, rows = rows.len(), "fetched page");
                Ok(rows)
            }
            other => Err(SourceError::Shape {
                table: query.table.clone(),
                detail: truncate_for_log(other.to_string(), MAX_ERROR_BODY),
            }),
        }
    }
}
