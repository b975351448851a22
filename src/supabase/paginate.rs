use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use super::client::{SourceError, TableQuery, TableSource};

/// Fetch every row matching `query`, one `page_size` range at a time.
///
/// PostgREST caps page size and does not reliably expose a total count, so the
/// loop stops on the first page holding fewer than `page_size` rows. A table with
/// exactly `k * page_size` rows therefore costs `k + 1` requests, the last one empty.
pub async fn fetch_all_paginated<S>(
    source: &S,
    query: &TableQuery,
    page_size: usize,
) -> Result<Vec<Value>, SourceError>
where
    S: TableSource + ?Sized,
{
    let page_size = page_size.max(1);
    let mut rows: Vec<Value> = Vec::new();
    let mut offset = 0usize;
    let mut pages = 0usize;
    loop {
        let batch = source.fetch_range(query, offset, page_size).await?;
        pages += 1;
        let n = batch.len();
        rows.extend(batch);
        if n < page_size {
            break;
        }
        offset += page_size;
    }
    info!(table = %query.table, rows = rows.len(), pages, "fetched table");
    Ok(rows)
}

/// Same as [`fetch_all_paginated`] but decodes every row into `T`.
pub async fn fetch_all_as<T, S>(
    source: &S,
    query: &TableQuery,
    page_size: usize,
) -> Result<Vec<T>, SourceError>
where
    T: DeserializeOwned,
    S: TableSource + ?Sized,
{
    fetch_all_paginated(source, query, page_size)
        .await?
        .into_iter()
        .map(|v| serde_json::from_value::<T>(v).map_err(SourceError::from))
        .collect()
}
