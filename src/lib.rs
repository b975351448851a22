pub mod config;
pub mod database_ops;
pub mod migration;
pub mod supabase;
pub mod telemetry;

pub mod util {
    pub mod env;
}

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, MigrationConfig, RunOptions};
pub use migration::{run_migration, MigrationReport};
