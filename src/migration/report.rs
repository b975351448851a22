use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("upsert count does not match prepared records (written {written}, prepared {prepared})")]
    CountMismatch { written: usize, prepared: usize },
}

/// Counts gathered over one run, printed as the verification summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub identity_mappings: usize,
    pub fallback_mappings: usize,
    /// Eligible action requests (non-blank comment) fetched from the source.
    pub fetched: usize,
    /// Rows returned by the source whose comment was blank after trimming.
    pub blank_comments: usize,
    pub prepared: usize,
    pub via_fallback: usize,
    pub written: usize,
    pub dry_run: bool,
    pub unmapped_runners: BTreeSet<String>,
    pub unmapped_requestors: BTreeSet<String>,
    /// Destination rows found for the prepared ids after commit, when checked.
    pub destination_rows: Option<i64>,
}

impl MigrationReport {
    /// A dry run writes nothing and is never a mismatch.
    pub fn verify(&self) -> Result<(), VerificationError> {
        if self.dry_run || self.written == self.prepared {
            Ok(())
        } else {
            Err(VerificationError::CountMismatch {
                written: self.written,
                prepared: self.prepared,
            })
        }
    }

    /// Warnings for emails that could not be mapped, each listed once, sorted.
    pub fn render_unmapped(&self) -> String {
        let mut out = String::new();
        for (label, set) in [
            ("runner", &self.unmapped_runners),
            ("requestor", &self.unmapped_requestors),
        ] {
            if set.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "  WARNING: {} {} email(s) had no runner_id mapping:",
                set.len(),
                label
            );
            for email in set {
                let _ = writeln!(out, "    - {email}");
            }
        }
        out
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Verification summary:");
        let _ = writeln!(out, "  Action requests with comments fetched: {}", self.fetched);
        let _ = writeln!(out, "  Blank comments skipped:                {}", self.blank_comments);
        let _ = writeln!(out, "  Records prepared:                      {}", self.prepared);
        let _ = writeln!(out, "  Requestors resolved via coach email:   {}", self.via_fallback);
        if self.dry_run {
            let _ = writeln!(out, "  Records upserted to Cloud SQL:         0 (dry run)");
        } else {
            let _ = writeln!(out, "  Records upserted to Cloud SQL:         {}", self.written);
        }
        if let Some(n) = self.destination_rows {
            let _ = writeln!(out, "  Matching rows now in action_comments:  {n}");
        }
        let _ = writeln!(
            out,
            "  Unmapped runner emails (skipped):      {}",
            self.unmapped_runners.len()
        );
        let _ = writeln!(
            out,
            "  Unmapped requestor emails (skipped):   {}",
            self.unmapped_requestors.len()
        );
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        let _ = writeln!(out, "  Elapsed:                               {}s", elapsed.num_seconds());
        match self.verify() {
            Ok(()) if self.dry_run => {
                let _ = writeln!(out, "\n  Dry run completed; nothing was written.");
            }
            Ok(()) => {
                let _ = writeln!(out, "\n  Migration completed successfully.");
            }
            Err(e) => {
                let _ = writeln!(out, "\n  WARNING: {e}.");
            }
        }
        out
    }
}
