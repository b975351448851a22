//! Identity resolution and the run that drives it.
pub mod identity;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod resolve;

pub use identity::{DuplicatePolicy, FallbackIndex, IdentityIndex, IndexError};
pub use model::{ActionComment, ActionRequestRow, IdentityKey, SOURCE_TABLE};
pub use pipeline::{prepare, run_migration, PreparedRun};
pub use report::{MigrationReport, VerificationError};
pub use resolve::{resolve, Resolution};
