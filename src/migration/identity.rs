//! Lookup tables used to resolve emails into identity keys.
//!
//! Both indices are built once from the fetched snapshot and only read afterwards.
use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use super::model::{FallbackRow, IdentityKey, IdentityRow};

/// What to do when the same `email_id` appears more than once with different targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep the value from the row seen last.
    #[default]
    LastWins,
    /// Fail index construction.
    Reject,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("{index}: email_id {email:?} maps to both {first:?} and {second:?}")]
    DuplicateKey {
        index: &'static str,
        email: String,
        first: String,
        second: String,
    },
}

/// Counters collected while building an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub rows: usize,
    pub skipped: usize,
    /// Repeated `email_id`s, whether or not the target differed.
    pub duplicates: usize,
    /// Repeated `email_id`s whose target differed from the earlier row.
    pub conflicts: usize,
}

fn insert_checked(
    map: &mut HashMap<String, String>,
    stats: &mut IndexStats,
    policy: DuplicatePolicy,
    index: &'static str,
    email: String,
    target: String,
) -> Result<(), IndexError> {
    if let Some(previous) = map.get(&email) {
        stats.duplicates += 1;
        if *previous != target {
            stats.conflicts += 1;
            if policy == DuplicatePolicy::Reject {
                return Err(IndexError::DuplicateKey {
                    index,
                    email,
                    first: previous.clone(),
                    second: target,
                });
            }
        }
    }
    map.insert(email, target);
    Ok(())
}

fn warn_duplicates(index: &'static str, stats: &IndexStats) {
    if stats.duplicates > 0 {
        warn!(
            index,
            duplicates = stats.duplicates,
            conflicts = stats.conflicts,
            "duplicate email_id rows in source; last row wins"
        );
    }
}

/// `email_id → runner_id`, from `runners_profile`.
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    map: HashMap<String, String>,
    stats: IndexStats,
}

impl IdentityIndex {
    pub const NAME: &'static str = "identity";

    pub fn build<I>(rows: I, policy: DuplicatePolicy) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = IdentityRow>,
    {
        let mut map = HashMap::new();
        let mut stats = IndexStats::default();
        for row in rows {
            stats.rows += 1;
            let (Some(email), Some(key)) = (row.email_id, row.runner_id) else {
                stats.skipped += 1;
                continue;
            };
            if key.trim().is_empty() {
                stats.skipped += 1;
                continue;
            }
            insert_checked(&mut map, &mut stats, policy, Self::NAME, email, key)?;
        }
        warn_duplicates(Self::NAME, &stats);
        Ok(Self { map, stats })
    }

    pub fn get(&self, email: &str) -> Option<IdentityKey> {
        self.map.get(email).and_then(|k| IdentityKey::new(k.as_str()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }
}

/// `email_id → fs_email_id`, from `rhwb_coaches`. Consulted only when a requestor
/// has no direct identity entry.
#[derive(Debug, Clone, Default)]
pub struct FallbackIndex {
    map: HashMap<String, String>,
    stats: IndexStats,
}

impl FallbackIndex {
    pub const NAME: &'static str = "fallback";

    pub fn build<I>(rows: I, policy: DuplicatePolicy) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = FallbackRow>,
    {
        let mut map = HashMap::new();
        let mut stats = IndexStats::default();
        for row in rows {
            stats.rows += 1;
            let (Some(email), Some(alt)) = (row.email_id, row.fs_email_id) else {
                stats.skipped += 1;
                continue;
            };
            if alt.trim().is_empty() {
                stats.skipped += 1;
                continue;
            }
            insert_checked(&mut map, &mut stats, policy, Self::NAME, email, alt)?;
        }
        warn_duplicates(Self::NAME, &stats);
        Ok(Self { map, stats })
    }

    pub fn get(&self, email: &str) -> Option<&str> {
        self.map.get(email).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }
}
