//! In-process key/value adapter.
//!
//! Records are keyed by the definition's hash key (default `id`) plus an
//! optional range key, the way partitioned key/value stores address items.
//! Declared key types are enforced on write. Capacity units are read for
//! logging only. Expired records are purged on every write. Data lives as
//! long as the repository.

use crate::adapters::{assign_identity, is_expired, key_text, merge_into, now_epoch_secs, stamp_ttl};
use crate::backend::manager::{BackendManager, BackendProperties};
use crate::backend::repositories::RepositoriesBackend;
use crate::backend::{Backend, BackendResult};
use crate::config::DbInfo;
use crate::filter::{CompiledFilter, Filter};
use crate::model::definition::{DefinitionResult, KeyType, RepositoryDefinition, TtlPolicy};
use crate::repo::{describe_filter, ListQuery, Record, RepoError, RepoResult, Repository, SortDirection};
use log::debug;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Backend type name this adapter registers under.
pub const BACKEND_TYPE: &str = "memory";

const DEFAULT_HASH_KEY: &str = "id";
const KEY_SEPARATOR: char = '\u{1f}';

/// Registers the memory adapter. It requires no connection properties.
pub fn register(manager: &BackendManager) {
    manager.support_backend(BACKEND_TYPE, build_backend, BackendProperties::new());
}

pub fn build_backend(info: &DbInfo, _manager: &BackendManager) -> BackendResult<Arc<dyn Backend>> {
    let backend = RepositoriesBackend::new(info.clone(), build_repository).with_label(BACKEND_TYPE);
    Ok(Arc::new(backend))
}

pub fn build_repository(
    definition: &RepositoryDefinition,
    _backend: &dyn Backend,
) -> BackendResult<Arc<dyn Repository>> {
    Ok(Arc::new(MemoryRepository::from_definition(definition)?))
}

/// Key/value repository held in a map.
pub struct MemoryRepository {
    name: String,
    hash_key: String,
    hash_key_type: Option<KeyType>,
    range_key: Option<String>,
    range_key_type: Option<KeyType>,
    custom_id: bool,
    ttl: Option<TtlPolicy>,
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryRepository {
    pub fn from_definition(definition: &RepositoryDefinition) -> DefinitionResult<Self> {
        definition.validate()?;
        let schema = definition.key_value_schema()?;
        let (hash_key, hash_key_type, range_key, range_key_type) = match &schema {
            Some(schema) => (
                schema.hash_key.to_string(),
                schema.hash_key_type,
                schema.range_key.map(str::to_string),
                schema.range_key_type,
            ),
            None => (DEFAULT_HASH_KEY.to_string(), None, None, None),
        };
        if let Some(schema) = &schema {
            debug!(
                "event=repository_build module=memory status=ok repository={} hash_key={} range_key={} read_capacity={} write_capacity={}",
                definition.name(),
                schema.hash_key,
                schema.range_key.unwrap_or("-"),
                schema.read_capacity,
                schema.write_capacity
            );
        }

        Ok(Self {
            name: definition.name().to_string(),
            hash_key,
            hash_key_type,
            range_key,
            range_key_type,
            custom_id: definition.is_custom_id(),
            ttl: definition.ttl_policy()?,
            records: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    pub fn len(&self) -> usize {
        let now = now_epoch_secs();
        self.read()
            .values()
            .filter(|record| !is_expired(record, self.ttl.as_ref(), now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Record>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Record>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn storage_key(&self, record: &Record) -> RepoResult<String> {
        let hash = key_text(record, &self.hash_key, self.hash_key_type)?;
        match &self.range_key {
            Some(range_key) => {
                let range = key_text(record, range_key, self.range_key_type)?;
                Ok(format!("{hash}{KEY_SEPARATOR}{range}"))
            }
            None => Ok(hash),
        }
    }

    /// Drops expired records. Callers hold the write lock.
    fn purge_expired(&self, records: &mut BTreeMap<String, Record>, now: i64) {
        if self.ttl.is_some() {
            records.retain(|_, record| !is_expired(record, self.ttl.as_ref(), now));
        }
    }

    fn first_match(
        &self,
        records: &BTreeMap<String, Record>,
        filter: &CompiledFilter,
        now: i64,
    ) -> Option<String> {
        records
            .iter()
            .find(|(_, record)| !is_expired(record, self.ttl.as_ref(), now) && filter.matches(record))
            .map(|(key, _)| key.clone())
    }
}

impl Repository for MemoryRepository {
    fn get_one(&self, filter: &Filter) -> RepoResult<Record> {
        let compiled = filter.compile()?;
        let records = self.read();
        self.first_match(&records, &compiled, now_epoch_secs())
            .and_then(|key| records.get(&key).cloned())
            .ok_or_else(|| RepoError::NotFound(describe_filter(filter)))
    }

    fn get_all(&self, filter: &Filter, query: &ListQuery) -> RepoResult<Vec<Record>> {
        let compiled = filter.compile()?;
        let now = now_epoch_secs();
        let mut matches: Vec<Record> = self
            .read()
            .values()
            .filter(|record| !is_expired(record, self.ttl.as_ref(), now) && compiled.matches(record))
            .cloned()
            .collect();

        if let Some(order) = query.order.as_deref() {
            matches.sort_by(|left, right| {
                let ordering = compare_values(
                    left.get(order).unwrap_or(&Value::Null),
                    right.get(order).unwrap_or(&Value::Null),
                );
                match query.sorting {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(matches
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect())
    }

    fn save(&self, object: Record, filter: Option<&Filter>) -> RepoResult<Record> {
        let now = now_epoch_secs();
        let Some(filter) = filter else {
            let mut record = object;
            assign_identity(&mut record, &self.hash_key, self.custom_id)?;
            stamp_ttl(&mut record, self.ttl.as_ref(), now);
            let key = self.storage_key(&record)?;
            let mut records = self.write();
            self.purge_expired(&mut records, now);
            records.insert(key, record.clone());
            return Ok(record);
        };

        let compiled = filter.compile()?;
        let mut records = self.write();
        self.purge_expired(&mut records, now);
        let old_key = self
            .first_match(&records, &compiled, now)
            .ok_or_else(|| RepoError::NotFound(describe_filter(filter)))?;
        let mut merged = records.get(&old_key).cloned().unwrap_or_default();
        merge_into(&mut merged, object);

        let new_key = self.storage_key(&merged)?;
        if new_key != old_key && records.contains_key(&new_key) {
            return Err(RepoError::Conflict(format!(
                "{} already holds a record under the updated key",
                self.name
            )));
        }
        records.remove(&old_key);
        records.insert(new_key, merged.clone());
        Ok(merged)
    }

    fn delete_one(&self, filter: &Filter) -> RepoResult<()> {
        let compiled = filter.compile()?;
        let now = now_epoch_secs();
        let mut records = self.write();
        self.purge_expired(&mut records, now);
        let key = self
            .first_match(&records, &compiled, now)
            .ok_or_else(|| RepoError::NotFound(describe_filter(filter)))?;
        records.remove(&key);
        Ok(())
    }

    fn delete_all(&self, filter: &Filter) -> RepoResult<()> {
        let compiled = filter.compile()?;
        let now = now_epoch_secs();
        let mut records = self.write();
        self.purge_expired(&mut records, now);
        records.retain(|_, record| !compiled.matches(record));
        Ok(())
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type first, then by value.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Null, Value::Null) => Ordering::Equal,
        _ if type_rank(left) == type_rank(right) => left.to_string().cmp(&right.to_string()),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

/// Integers compare exactly; anything involving a float goes through `f64`.
fn compare_numbers(left: &Number, right: &Number) -> Ordering {
    let exact = |number: &Number| {
        number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_u64().map(i128::from))
    };
    match (exact(left), exact(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => {
            let a = left.as_f64().unwrap_or(0.0);
            let b = right.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{compare_values, MemoryRepository};
    use crate::filter::Filter;
    use crate::model::definition::{KeyType, RepositoryDefinition};
    use crate::repo::{RepoError, Repository};
    use serde_json::{json, Value};
    use std::cmp::Ordering;

    fn record(value: Value) -> crate::repo::Record {
        value.as_object().cloned().expect("object fixture")
    }

    #[test]
    fn compare_values_orders_numbers_numerically() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
    }

    #[test]
    fn compare_values_keeps_large_integers_exact() {
        let two_pow_53: i64 = 1 << 53;
        assert_eq!(
            compare_values(&json!(two_pow_53 + 1), &json!(two_pow_53)),
            Ordering::Greater
        );
        assert_eq!(compare_values(&json!(u64::MAX), &json!(-1)), Ordering::Greater);
        assert_eq!(compare_values(&json!(u64::MAX), &json!(u64::MAX - 1)), Ordering::Greater);
        assert_eq!(compare_values(&json!(1.5), &json!(2)), Ordering::Less);
    }

    #[test]
    fn expired_records_do_not_block_rekeying_and_are_purged() {
        let definition = RepositoryDefinition::new("sessions").with_ttl(3600, "exp");
        let repo = MemoryRepository::from_definition(&definition).expect("repository");
        repo.save(record(json!({"id": "old", "exp": 1})), None)
            .expect("expired insert");
        repo.save(record(json!({"id": "live"})), None)
            .expect("live insert");

        let moved = repo
            .save(
                record(json!({"id": "old"})),
                Some(&Filter::new().match_value("id", "live")),
            )
            .expect("expired key is free");
        assert_eq!(moved["id"], "old");
        assert_eq!(repo.len(), 1);

        repo.delete_all(&Filter::new()).expect("delete all");
        assert!(repo.read().is_empty());
    }

    #[test]
    fn declared_key_type_is_enforced() {
        let definition = RepositoryDefinition::new("counters")
            .with_hash_key("n", KeyType::Number)
            .with_custom_id(true);
        let repo = MemoryRepository::from_definition(&definition).expect("repository");

        let err = repo.save(record(json!({"n": "1"})), None).unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(_)));
        repo.save(record(json!({"n": 1})), None).expect("numeric key");
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn hash_and_range_key_identify_records() {
        let definition = RepositoryDefinition::new("events")
            .with_hash_key("tenant", KeyType::String)
            .with_range_key("seq", KeyType::Number)
            .with_custom_id(true);
        let repo = MemoryRepository::from_definition(&definition).expect("repository");

        repo.save(record(json!({"tenant": "a", "seq": 1, "v": "x"})), None)
            .expect("first");
        repo.save(record(json!({"tenant": "a", "seq": 2, "v": "y"})), None)
            .expect("second");
        repo.save(record(json!({"tenant": "a", "seq": 1, "v": "z"})), None)
            .expect("overwrite");

        assert_eq!(repo.len(), 2);
        let first = repo
            .get_one(&Filter::new().match_value("seq", 1))
            .expect("lookup");
        assert_eq!(first["v"], "z");
    }

    #[test]
    fn missing_range_key_is_rejected() {
        let definition = RepositoryDefinition::new("events")
            .with_hash_key("tenant", KeyType::String)
            .with_range_key("seq", KeyType::Number);
        let repo = MemoryRepository::from_definition(&definition).expect("repository");

        let err = repo
            .save(record(json!({"tenant": "a"})), None)
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(_)));
    }

    #[test]
    fn defaults_to_id_key_without_hash_key() {
        let repo = MemoryRepository::from_definition(&RepositoryDefinition::new("plain"))
            .expect("repository");
        assert_eq!(repo.hash_key(), "id");
        assert!(repo.is_empty());
    }
}
