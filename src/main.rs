use std::num::NonZeroUsize;

use action_comments_migrate::config::MigrationConfig;
use action_comments_migrate::database_ops::action_comments::PgDestination;
use action_comments_migrate::migration::{run_migration, DuplicatePolicy};
use action_comments_migrate::supabase::SupabaseClient;
use action_comments_migrate::telemetry::{init_tracing, DEFAULT_LOG_FILTER};
use action_comments_migrate::util::env as env_util;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "migrate-action-comments",
    version,
    about = "One-time migration of action request comments from Supabase into Cloud SQL"
)]
struct Cli {
    /// Resolve and report without connecting to Cloud SQL (also MIGRATE_DRY_RUN=1)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Rows per Supabase request (overrides MIGRATE_PAGE_SIZE)
    #[arg(long)]
    page_size: Option<NonZeroUsize>,
    /// Rows per upsert statement (overrides MIGRATE_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<NonZeroUsize>,
    /// Abort when an email_id maps to two different values instead of keeping the last
    #[arg(long, default_value_t = false)]
    reject_duplicate_keys: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_LOG_FILTER)?;
    let cli = Cli::parse();

    println!("=== Action Comments Migration: Supabase -> Cloud SQL ===\n");

    let mut cfg = MigrationConfig::from_env()?;
    if let Some(n) = cli.page_size {
        cfg.run.page_size = n.get();
    }
    if let Some(n) = cli.batch_size {
        cfg.run.batch_size = n.get();
    }
    if cli.reject_duplicate_keys {
        cfg.run.duplicate_policy = DuplicatePolicy::Reject;
    }
    cfg.run.dry_run = cli.dry_run || env_util::env_flag("MIGRATE_DRY_RUN", false);
    info!(
        page_size = cfg.run.page_size,
        batch_size = cfg.run.batch_size,
        duplicate_policy = ?cfg.run.duplicate_policy,
        dry_run = cfg.run.dry_run,
        id_type = ?cfg.destination.id_type,
        "run options"
    );

    let source = SupabaseClient::new(&cfg.source).context("failed to build Supabase client")?;
    let destination = PgDestination::new(cfg.destination.clone());
    let outcome = run_migration(&source, &destination, &cfg.run).await;
    destination.close().await;
    let report = outcome?;

    if !report.dry_run {
        println!("Successfully upserted {} records into Cloud SQL.", report.written);
    }
    print!("{}", report.render_unmapped());
    println!();
    print!("{}", report.render_summary());

    report.verify()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_are_rejected_at_parse_time() {
        for flag in ["--batch-size", "--page-size"] {
            let err = Cli::try_parse_from(["migrate-action-comments", flag, "0"]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn positive_sizes_override() {
        let cli = Cli::try_parse_from([
            "migrate-action-comments",
            "--batch-size",
            "250",
            "--page-size",
            "100",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.batch_size.map(NonZeroUsize::get), Some(250));
        assert_eq!(cli.page_size.map(NonZeroUsize::get), Some(100));
        assert!(cli.dry_run);
    }
}
