//! Backend type registry with lazy, single-flight construction.
//!
//! # Responsibility
//! - Map backend type names to builder functions and required properties.
//! - Build each configured backend type once and cache it.
//!
//! # Invariants
//! - Registration never validates; the last registration for a type wins.
//! - `get_backend` builds a type at most once, even for concurrent first
//!   callers; failures leave nothing cached.
//! - The registry mutex is released while a builder runs.

use crate::backend::{Backend, BackendError, BackendResult};
use crate::config::{BackendsConfig, DbInfo};
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Builds one backend from its connection info.
///
/// The manager is passed so a builder can request other backend types.
/// Requesting the type being built deadlocks.
pub type BackendBuilder =
    Arc<dyn Fn(&DbInfo, &BackendManager) -> BackendResult<Arc<dyn Backend>> + Send + Sync>;

/// Required configuration keys, mapped to a description or default hint.
pub type BackendProperties = BTreeMap<String, Value>;

type BackendSlot = Arc<OnceCell<Arc<dyn Backend>>>;

struct Registration {
    builder: BackendBuilder,
    properties: BackendProperties,
}

#[derive(Default)]
struct ManagerState {
    registrations: BTreeMap<String, Registration>,
    backends: HashMap<String, BackendSlot>,
}

/// Process-wide registry of backend builders and built backends.
pub struct BackendManager {
    config: BackendsConfig,
    state: Mutex<ManagerState>,
}

impl BackendManager {
    pub fn new(config: BackendsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn config(&self) -> &BackendsConfig {
        &self.config
    }

    /// Registers a builder and the configuration keys it requires.
    ///
    /// Overwrites any earlier registration for `backend_type`. An already
    /// built backend of that type stays cached.
    pub fn support_backend<F>(
        &self,
        backend_type: impl Into<String>,
        builder: F,
        properties: BackendProperties,
    ) where
        F: Fn(&DbInfo, &BackendManager) -> BackendResult<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        let backend_type = backend_type.into();
        let replaced = self
            .lock_state()
            .registrations
            .insert(
                backend_type.clone(),
                Registration {
                    builder: Arc::new(builder),
                    properties,
                },
            )
            .is_some();

        if replaced {
            warn!(
                "event=backend_register module=registry status=ok backend_type={} replaced=true",
                backend_type
            );
        } else {
            info!(
                "event=backend_register module=registry status=ok backend_type={} replaced=false",
                backend_type
            );
        }
    }

    /// Returns the backend for `backend_type`, building it on first use.
    ///
    /// # Errors
    /// - `UnsupportedBackend` when no builder is registered.
    /// - `NotConfigured` when no connection info exists for the type.
    /// - `MissingProperties` when required keys are absent from the
    ///   connection info.
    /// - Any error returned by the builder, unchanged.
    pub fn get_backend(&self, backend_type: &str) -> BackendResult<Arc<dyn Backend>> {
        let (slot, builder, info) = {
            let mut state = self.lock_state();
            if let Some(backend) = state.backends.get(backend_type).and_then(|slot| slot.get()) {
                return Ok(Arc::clone(backend));
            }

            let registration = state
                .registrations
                .get(backend_type)
                .ok_or_else(|| BackendError::UnsupportedBackend(backend_type.to_string()))?;
            let info = self
                .config
                .get(backend_type)
                .ok_or_else(|| BackendError::NotConfigured(backend_type.to_string()))?;
            let missing = info.missing_properties(registration.properties.keys());
            if !missing.is_empty() {
                return Err(BackendError::MissingProperties {
                    backend: backend_type.to_string(),
                    properties: missing,
                });
            }
            let builder = Arc::clone(&registration.builder);

            let slot = Arc::clone(state.backends.entry(backend_type.to_string()).or_default());
            (slot, builder, info)
        };

        let started_at = Instant::now();
        let mut invoked = false;
        let result = slot.get_or_try_init(|| {
            invoked = true;
            info!(
                "event=backend_build module=registry status=start backend_type={}",
                backend_type
            );
            builder(info, self)
        });

        match result {
            Ok(backend) => {
                if invoked {
                    info!(
                        "event=backend_build module=registry status=ok backend_type={} duration_ms={}",
                        backend_type,
                        started_at.elapsed().as_millis()
                    );
                }
                Ok(Arc::clone(backend))
            }
            Err(err) => {
                error!(
                    "event=backend_build module=registry status=error backend_type={} duration_ms={} error={}",
                    backend_type,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Returns the declared configuration keys for a registered type.
    pub fn get_required_backend_properties(
        &self,
        backend_type: &str,
    ) -> BackendResult<BackendProperties> {
        self.lock_state()
            .registrations
            .get(backend_type)
            .map(|registration| registration.properties.clone())
            .ok_or_else(|| BackendError::UnsupportedBackend(backend_type.to_string()))
    }

    /// Registered backend type names.
    pub fn get_supported_backends(&self) -> Vec<String> {
        self.lock_state().registrations.keys().cloned().collect()
    }

    /// Whether a backend of this type has been built and is cached.
    pub fn is_backend_active(&self, backend_type: &str) -> bool {
        self.lock_state()
            .backends
            .get(backend_type)
            .map(|slot| slot.get().is_some())
            .unwrap_or(false)
    }

    /// Shuts down every built backend and removes it from the cache.
    ///
    /// Registrations are kept; a later `get_backend` builds a fresh backend.
    /// A build still in flight is left in place: it completes and is cached,
    /// and the next `shutdown` covers it.
    pub fn shutdown(&self) {
        let built: Vec<(String, Arc<dyn Backend>)> = {
            let mut state = self.lock_state();
            let ready: Vec<(String, Arc<dyn Backend>)> = state
                .backends
                .iter()
                .filter_map(|(backend_type, slot)| {
                    slot.get()
                        .map(|backend| (backend_type.clone(), Arc::clone(backend)))
                })
                .collect();
            for (backend_type, _) in &ready {
                state.backends.remove(backend_type);
            }
            ready
        };

        for (backend_type, backend) in built {
            info!(
                "event=backend_shutdown module=registry status=start backend_type={}",
                backend_type
            );
            backend.shutdown();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
