use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DestinationConfig;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

/// Connect options for the destination. A host beginning with `/` is a Unix
/// socket directory (the Cloud SQL proxy layout).
pub fn connect_options(cfg: &DestinationConfig) -> PgConnectOptions {
    let base = PgConnectOptions::new()
        .port(cfg.port)
        .database(&cfg.database)
        .username(&cfg.user)
        .password(&cfg.password)
        .application_name("action-comments-migrate")
        // The migration issues a handful of one-off statements; caching buys nothing.
        .statement_cache_capacity(0);
    if cfg.is_unix_socket() {
        base.socket(&cfg.host)
    } else {
        base.host(&cfg.host).ssl_mode(cfg.ssl_mode)
    }
}

impl Db {
    // SECURITY: the config carries the password; keep it out of spans.
    #[instrument(skip(cfg), fields(host = %cfg.host, database = %cfg.database))]
    pub async fn connect(cfg: &DestinationConfig) -> Result<Self> {
        // One connection: every write happens inside a single transaction.
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options(cfg))
            .await?;
        info!("connected to destination db");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
