use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storekit_core::{
    Backend, BackendExt, BackendManager, BackendProperties, BackendsConfig, DbInfo, Filter,
    ListQuery, Record, RepoError, RepoResult, RepositoriesBackend, Repository,
    RepositoryDefinition,
};

/// Minimal adapter storing records by `id`. Saves always upsert.
struct StubRepository {
    records: Mutex<BTreeMap<String, Record>>,
}

impl Repository for StubRepository {
    fn get_one(&self, filter: &Filter) -> RepoResult<Record> {
        let compiled = filter.compile()?;
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|record| compiled.matches(record))
            .cloned()
            .ok_or_else(|| RepoError::NotFound(filter.to_value().to_string()))
    }

    fn get_all(&self, filter: &Filter, _query: &ListQuery) -> RepoResult<Vec<Record>> {
        let compiled = filter.compile()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| compiled.matches(record))
            .cloned()
            .collect())
    }

    fn save(&self, object: Record, _filter: Option<&Filter>) -> RepoResult<Record> {
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RepoError::InvalidData("stub requires an id".to_string()))?
            .to_string();
        self.records.lock().unwrap().insert(id, object.clone());
        Ok(object)
    }

    fn delete_one(&self, _filter: &Filter) -> RepoResult<()> {
        Ok(())
    }

    fn delete_all(&self, _filter: &Filter) -> RepoResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TenantId(String);

fn stub_manager(repository_builds: Arc<AtomicUsize>) -> BackendManager {
    let config = BackendsConfig::new().with_backend("stub", DbInfo::for_database("app"));
    let manager = BackendManager::new(config);
    let mut properties = BackendProperties::new();
    properties.insert("database".to_string(), json!("logical database name"));
    manager.support_backend(
        "stub",
        move |info, _manager| {
            let builds = Arc::clone(&repository_builds);
            let backend = RepositoriesBackend::new(info.clone(), move |_definition, _backend| {
                builds.fetch_add(1, Ordering::SeqCst);
                let repository: Arc<dyn Repository> = Arc::new(StubRepository {
                    records: Mutex::new(BTreeMap::new()),
                });
                Ok(repository)
            })
            .with_label("stub");
            Ok(Arc::new(backend) as Arc<dyn Backend>)
        },
        properties,
    );
    manager
}

#[test]
fn registered_backend_serves_repositories() {
    let manager = stub_manager(Arc::new(AtomicUsize::new(0)));

    let backend = manager.get_backend("stub").unwrap();
    assert_eq!(backend.config().database, "app");

    let users = backend
        .define_repository("users", &RepositoryDefinition::new("users"))
        .unwrap();
    let by_id = Filter::new().match_value("id", "u1");
    let saved = users
        .save(
            json!({"id": "u1", "name": "ada"}).as_object().cloned().unwrap(),
            Some(&by_id),
        )
        .unwrap();

    let loaded = users.get_one(&by_id).unwrap();
    assert_eq!(loaded, saved);

    let again = manager
        .get_backend("stub")
        .unwrap()
        .get_repository("users")
        .unwrap();
    assert!(Arc::ptr_eq(&users, &again));
}

#[test]
fn first_definition_wins_for_a_name() {
    let builds = Arc::new(AtomicUsize::new(0));
    let manager = stub_manager(Arc::clone(&builds));
    let backend = manager.get_backend("stub").unwrap();

    let first = backend
        .define_repository("users", &RepositoryDefinition::new("users").with_custom_id(true))
        .unwrap();
    let second = backend
        .define_repository("users", &RepositoryDefinition::new("people").with_ttl(60, "ttl"))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(backend.repository_names(), vec!["users"]);
}

#[test]
fn context_values_are_scoped_to_the_backend() {
    let manager = stub_manager(Arc::new(AtomicUsize::new(0)));
    let backend = manager.get_backend("stub").unwrap();

    assert_eq!(backend.get_from_context::<TenantId>(), None);
    backend.set_in_context(TenantId("acme".to_string()));

    let same = manager.get_backend("stub").unwrap();
    assert_eq!(
        same.get_from_context::<TenantId>(),
        Some(TenantId("acme".to_string()))
    );
}
