//! Reusable backend that lazily builds and caches repositories.
//!
//! # Responsibility
//! - Hold connection config, typed context and cleanup for one backend.
//! - Build each repository once through the adapter's repository builder.
//!
//! # Invariants
//! - One repository per name for the backend lifetime (define-once).
//! - Concurrent first definitions of one name invoke the builder once.
//! - The state mutex is never held while a builder runs, so builders may
//!   call back into this backend (except to define the same name).

use crate::backend::context::SessionContext;
use crate::backend::{Backend, BackendError, BackendResult};
use crate::config::DbInfo;
use crate::model::definition::RepositoryDefinition;
use crate::repo::Repository;
use log::{error, info};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Builds one repository from its definition.
///
/// Receives the owning backend so adapters can reach its config and context.
pub type RepoBuilder = Arc<
    dyn Fn(&RepositoryDefinition, &dyn Backend) -> BackendResult<Arc<dyn Repository>>
        + Send
        + Sync,
>;

/// Releases backend resources. Invoked on every `shutdown` call.
pub type BackendCleanup = Box<dyn Fn() + Send + Sync>;

type RepositorySlot = Arc<OnceCell<Arc<dyn Repository>>>;

struct BackendState {
    repositories: HashMap<String, RepositorySlot>,
    context: Arc<SessionContext>,
}

/// Backend implementation shared by adapters.
///
/// Adapters supply a repository builder and an optional cleanup callback;
/// this type owns caching, context and shutdown.
pub struct RepositoriesBackend {
    label: String,
    config: DbInfo,
    repository_builder: RepoBuilder,
    cleanup: Option<BackendCleanup>,
    state: Mutex<BackendState>,
}

impl RepositoriesBackend {
    pub fn new<F>(config: DbInfo, repository_builder: F) -> Self
    where
        F: Fn(&RepositoryDefinition, &dyn Backend) -> BackendResult<Arc<dyn Repository>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            label: String::new(),
            config,
            repository_builder: Arc::new(repository_builder),
            cleanup: None,
            state: Mutex::new(BackendState {
                repositories: HashMap::new(),
                context: Arc::new(SessionContext::new()),
            }),
        }
    }

    /// Name used in log events, usually the backend type.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Seeds the initial context snapshot.
    pub fn with_context(self, context: SessionContext) -> Self {
        self.lock_state().context = Arc::new(context);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, BackendState> {
        // Builders run outside the lock, so a poisoned guard still holds a
        // consistent map.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for RepositoriesBackend {
    fn define_repository(
        &self,
        name: &str,
        definition: &RepositoryDefinition,
    ) -> BackendResult<Arc<dyn Repository>> {
        let slot = {
            let mut state = self.lock_state();
            Arc::clone(state.repositories.entry(name.to_string()).or_default())
        };
        if let Some(repository) = slot.get() {
            return Ok(Arc::clone(repository));
        }

        let started_at = Instant::now();
        let mut invoked = false;
        let result = slot.get_or_try_init(|| {
            invoked = true;
            info!(
                "event=repository_define module=backend status=start backend={} repository={}",
                self.label, name
            );
            (self.repository_builder)(definition, self)
        });

        match result {
            Ok(repository) => {
                if invoked {
                    info!(
                        "event=repository_define module=backend status=ok backend={} repository={} duration_ms={}",
                        self.label,
                        name,
                        started_at.elapsed().as_millis()
                    );
                }
                Ok(Arc::clone(repository))
            }
            Err(err) => {
                error!(
                    "event=repository_define module=backend status=error backend={} repository={} duration_ms={} error={}",
                    self.label,
                    name,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn get_repository(&self, name: &str) -> BackendResult<Arc<dyn Repository>> {
        self.lock_state()
            .repositories
            .get(name)
            .and_then(|slot| slot.get())
            .cloned()
            .ok_or_else(|| BackendError::RepositoryNotFound(name.to_string()))
    }

    fn repository_names(&self) -> Vec<String> {
        let state = self.lock_state();
        let mut names: Vec<String> = state
            .repositories
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn config(&self) -> &DbInfo {
        &self.config
    }

    fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.lock_state().context)
    }

    fn update_context(&self, update: &mut dyn FnMut(&mut SessionContext)) {
        let mut state = self.lock_state();
        let mut next = SessionContext::clone(&state.context);
        update(&mut next);
        state.context = Arc::new(next);
    }

    /// Runs the cleanup callback.
    ///
    /// There is no guard against repeated calls: each call runs the cleanup
    /// again, so a second call is only safe when the cleanup is idempotent.
    fn shutdown(&self) {
        info!(
            "event=backend_shutdown module=backend status=start backend={} has_cleanup={}",
            self.label,
            self.cleanup.is_some()
        );
        if let Some(cleanup) = &self.cleanup {
            cleanup();
        }
    }
}
