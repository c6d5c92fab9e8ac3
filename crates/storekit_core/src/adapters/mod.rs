//! Reference store adapters.
//!
//! # Responsibility
//! - Implement the `Backend`/`Repository` contracts for one key/value family
//!   store (`memory`) and one document family store (`sqlite`).
//! - Share identity and TTL rules so both families behave alike.
//!
//! # Invariants
//! - Inserts without a key get a generated UUID unless the definition is
//!   custom-ID, in which case the caller must supply the key.
//! - With TTL enabled, inserts stamp `now + ttl` (epoch seconds) into the TTL
//!   attribute unless the record already carries one; reads hide records
//!   whose expiry is at or before now.

use crate::backend::manager::BackendManager;
use crate::model::definition::{KeyType, TtlPolicy};
use crate::repo::{Record, RepoError, RepoResult};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

/// Registers every reference adapter on `manager`.
pub fn register_all(manager: &BackendManager) {
    memory::register(manager);
    sqlite::register(manager);
}

pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Ensures `record` carries a key under `key_field`.
pub(crate) fn assign_identity(record: &mut Record, key_field: &str, custom_id: bool) -> RepoResult<()> {
    match record.get(key_field) {
        Some(Value::Null) | None if custom_id => Err(RepoError::InvalidData(format!(
            "custom-id record is missing `{key_field}`"
        ))),
        Some(Value::Null) | None => {
            record.insert(
                key_field.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
            Ok(())
        }
        Some(_) => Ok(()),
    }
}

pub(crate) fn stamp_ttl(record: &mut Record, policy: Option<&TtlPolicy>, now: i64) {
    let Some(policy) = policy else {
        return;
    };
    if record.get(&policy.attribute).map_or(true, Value::is_null) {
        record.insert(
            policy.attribute.clone(),
            Value::from(now.saturating_add(policy.seconds)),
        );
    }
}

/// Storage form of a key attribute: its JSON text, so `1` and `"1"` stay
/// distinct keys.
///
/// With a declared `KeyType`, the value's JSON type must match it: `S` and
/// `B` take strings, `N` takes numbers. Set types never key a record.
/// Undeclared keys take strings or numbers.
pub(crate) fn key_text(record: &Record, field: &str, declared: Option<KeyType>) -> RepoResult<String> {
    let value = match record.get(field) {
        Some(Value::Null) | None => {
            return Err(RepoError::InvalidData(format!(
                "record is missing key attribute `{field}`"
            )))
        }
        Some(value) => value,
    };

    let accepted = matches!(
        (declared, value),
        (None, Value::String(_) | Value::Number(_))
            | (Some(KeyType::String | KeyType::Binary), Value::String(_))
            | (Some(KeyType::Number), Value::Number(_))
    );
    if !accepted {
        let expected = match declared {
            None => "a string or a number",
            Some(KeyType::String) => "a string",
            Some(KeyType::Binary) => "a base64 string",
            Some(KeyType::Number) => "a number",
            Some(KeyType::StringSet | KeyType::NumberSet) => "a scalar; set types cannot be keys",
        };
        return Err(RepoError::InvalidData(format!(
            "key attribute `{field}` must be {expected}"
        )));
    }
    Ok(value.to_string())
}

/// Whether the record's TTL attribute is a number at or before `now`.
pub(crate) fn is_expired(record: &Record, policy: Option<&TtlPolicy>, now: i64) -> bool {
    policy
        .and_then(|policy| record.get(&policy.attribute))
        .and_then(Value::as_i64)
        .map_or(false, |expires_at| expires_at <= now)
}

/// Shallow merge: top-level properties of `changes` overwrite `target`.
pub(crate) fn merge_into(target: &mut Record, changes: Record) {
    for (property, value) in changes {
        target.insert(property, value);
    }
}

#[cfg(test)]
mod tests {
    use super::{assign_identity, is_expired, key_text, merge_into, stamp_ttl};
    use crate::model::definition::{KeyType, TtlPolicy};
    use crate::repo::RepoError;
    use serde_json::{json, Value};

    fn record(value: Value) -> crate::repo::Record {
        value.as_object().cloned().expect("object fixture")
    }

    #[test]
    fn generated_identity_is_a_uuid() {
        let mut user = record(json!({"name": "ada"}));
        assign_identity(&mut user, "id", false).expect("identity assigned");
        let id = user["id"].as_str().expect("string id");
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn custom_identity_must_be_supplied() {
        let mut user = record(json!({"name": "ada"}));
        let err = assign_identity(&mut user, "email", true).unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(_)));

        let mut user = record(json!({"email": "ada@example.com"}));
        assign_identity(&mut user, "email", true).expect("key present");
        assert_eq!(user["email"], "ada@example.com");
    }

    #[test]
    fn ttl_stamp_respects_existing_value() {
        let policy = TtlPolicy {
            seconds: 60,
            attribute: "expiresAt".to_string(),
        };
        let mut fresh = record(json!({}));
        stamp_ttl(&mut fresh, Some(&policy), 1_000);
        assert_eq!(fresh["expiresAt"], 1_060);
        assert!(!is_expired(&fresh, Some(&policy), 1_059));
        assert!(is_expired(&fresh, Some(&policy), 1_060));

        let mut explicit = record(json!({"expiresAt": 5}));
        stamp_ttl(&mut explicit, Some(&policy), 1_000);
        assert_eq!(explicit["expiresAt"], 5);
        assert!(!is_expired(&explicit, None, 1_000));
    }

    #[test]
    fn key_text_keeps_json_type_in_storage_form() {
        let item = record(json!({"a": "1", "b": 1, "c": true}));
        assert_eq!(key_text(&item, "a", None).unwrap(), "\"1\"");
        assert_eq!(key_text(&item, "b", None).unwrap(), "1");
        assert!(matches!(key_text(&item, "c", None), Err(RepoError::InvalidData(_))));
        assert!(matches!(key_text(&item, "d", None), Err(RepoError::InvalidData(_))));
    }

    #[test]
    fn key_text_enforces_declared_key_type() {
        let item = record(json!({"s": "1", "n": 1}));
        assert!(key_text(&item, "s", Some(KeyType::String)).is_ok());
        assert!(key_text(&item, "s", Some(KeyType::Binary)).is_ok());
        assert!(key_text(&item, "n", Some(KeyType::Number)).is_ok());
        assert!(matches!(
            key_text(&item, "s", Some(KeyType::Number)),
            Err(RepoError::InvalidData(_))
        ));
        assert!(matches!(
            key_text(&item, "n", Some(KeyType::String)),
            Err(RepoError::InvalidData(_))
        ));
        assert!(key_text(&item, "s", Some(KeyType::StringSet)).is_err());
    }

    #[test]
    fn merge_overwrites_top_level_properties() {
        let mut target = record(json!({"a": 1, "b": {"x": 1}}));
        merge_into(&mut target, record(json!({"b": {"y": 2}, "c": 3})));
        assert_eq!(Value::Object(target), json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }
}
