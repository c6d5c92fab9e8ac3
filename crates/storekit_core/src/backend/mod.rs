//! Backend contracts and the registry that builds them.
//!
//! # Responsibility
//! - Define the `Backend` contract adapters implement for one store family.
//! - Provide the manager that lazily builds and caches backends per type.
//! - Provide the reusable backend that lazily builds and caches repositories.
//!
//! # Invariants
//! - At most one backend instance per type per manager.
//! - At most one repository instance per name per backend.
//! - Construction failures are returned, never cached.

use crate::config::DbInfo;
use crate::model::definition::{DefinitionError, RepositoryDefinition};
use crate::repo::{RepoError, Repository};
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod context;
pub mod manager;
pub mod repositories;

use context::SessionContext;

pub type BackendResult<T> = Result<T, BackendError>;

/// Registry and construction errors.
#[derive(Debug)]
pub enum BackendError {
    UnsupportedBackend(String),
    NotConfigured(String),
    MissingProperties {
        backend: String,
        properties: Vec<String>,
    },
    RepositoryNotFound(String),
    Construction(Box<dyn Error + Send + Sync>),
    Definition(DefinitionError),
    Repo(RepoError),
}

impl BackendError {
    /// Wraps an adapter failure raised while building a backend or repository.
    pub fn construction(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Construction(err.into())
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedBackend(backend) => write!(f, "backend not supported: {backend}"),
            Self::NotConfigured(backend) => write!(f, "backend not configured: {backend}"),
            Self::MissingProperties {
                backend,
                properties,
            } => write!(
                f,
                "backend `{backend}` is missing required properties: {}",
                properties.join(", ")
            ),
            Self::RepositoryNotFound(name) => write!(f, "unknown repository: {name}"),
            Self::Construction(err) => write!(f, "backend construction failed: {err}"),
            Self::Definition(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Construction(err) => Some(err.as_ref()),
            Self::Definition(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::UnsupportedBackend(_)
            | Self::NotConfigured(_)
            | Self::MissingProperties { .. }
            | Self::RepositoryNotFound(_) => None,
        }
    }
}

impl From<DefinitionError> for BackendError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<RepoError> for BackendError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::Storage(value))
    }
}

/// Live connection/session for one store family.
pub trait Backend: Send + Sync {
    /// Returns the repository cached under `name`, building it from
    /// `definition` on first use. Later definitions for the same name are
    /// ignored.
    fn define_repository(
        &self,
        name: &str,
        definition: &RepositoryDefinition,
    ) -> BackendResult<Arc<dyn Repository>>;

    /// Returns an already defined repository. Never builds one.
    fn get_repository(&self, name: &str) -> BackendResult<Arc<dyn Repository>>;

    /// Names of every defined repository, sorted.
    fn repository_names(&self) -> Vec<String>;

    fn config(&self) -> &DbInfo;

    /// Current context snapshot.
    fn context(&self) -> Arc<SessionContext>;

    /// Derives a new context snapshot from the current one.
    fn update_context(&self, update: &mut dyn FnMut(&mut SessionContext));

    /// Runs the cleanup supplied at construction, once per call.
    fn shutdown(&self);
}

/// Typed context helpers over any backend.
pub trait BackendExt: Backend {
    fn get_from_context<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.context().get::<T>().cloned()
    }

    fn set_in_context<T: Any + Send + Sync>(&self, value: T) {
        let mut pending = Some(value);
        self.update_context(&mut |context| {
            if let Some(value) = pending.take() {
                context.insert(value);
            }
        });
    }
}

impl<B: Backend + ?Sized> BackendExt for B {}
