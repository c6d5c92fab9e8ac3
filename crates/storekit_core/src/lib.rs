//! Backend-agnostic persistence core for storekit.
//! Owns the backend/repository registry and the contracts adapters implement.

pub mod adapters;
pub mod backend;
pub mod config;
pub mod filter;
pub mod logging;
pub mod model;
pub mod repo;

pub use adapters::register_all;
pub use backend::context::SessionContext;
pub use backend::manager::{BackendBuilder, BackendManager, BackendProperties};
pub use backend::repositories::{BackendCleanup, RepoBuilder, RepositoriesBackend};
pub use backend::{Backend, BackendError, BackendExt, BackendResult};
pub use config::{BackendsConfig, ConfigError, DbInfo};
pub use filter::{CompiledFilter, Filter, FilterValue, LikePattern, PATTERN_KEY};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::definition::{
    DefinitionError, DefinitionResult, DocumentSchema, KeyType, KeyValueSchema, NumericValue,
    RepositoryDefinition, TtlPolicy,
};
pub use model::index::Index;
pub use repo::{ListQuery, Record, RepoError, RepoResult, Repository, RepositoryExt, SortDirection};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
