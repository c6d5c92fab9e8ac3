//! Repository definition and capability negotiation.
//!
//! # Responsibility
//! - Describe one collection/table for structurally different store families.
//! - Expose per-family views so adapters read only what they understand.
//! - Parse loosely typed definition maps with checked conversions.
//!
//! # Invariants
//! - Absent fields resolve to zero values (`""`, `false`, `0`, empty slice).
//! - Present-but-malformed fields fail with `DefinitionError`; nothing here
//!   panics or aborts.
//! - Numeric fields accept integers or decimal strings and resolve to `i64`.

use crate::model::index::{name_from_fields, Index};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Map key for the collection/table name.
pub const FIELD_NAME: &str = "name";
/// Map key for the index list.
pub const FIELD_INDEXES: &str = "indexes";
/// Map key for the custom-ID flag.
pub const FIELD_CUSTOM_ID: &str = "customId";
/// Map key for the TTL enable flag.
pub const FIELD_ENABLE_TTL: &str = "enableTtl";
/// Map key for TTL seconds.
pub const FIELD_TTL: &str = "ttl";
/// Map key for the TTL attribute name.
pub const FIELD_TTL_ATTRIBUTE: &str = "ttlAttribute";
/// Map key for the hash key name.
pub const FIELD_HASH_KEY: &str = "hashKey";
/// Map key for the hash key type.
pub const FIELD_HASH_KEY_TYPE: &str = "hashKeyType";
/// Map key for the range key name.
pub const FIELD_RANGE_KEY: &str = "rangeKey";
/// Map key for the range key type.
pub const FIELD_RANGE_KEY_TYPE: &str = "rangeKeyType";
/// Map key for provisioned read capacity.
pub const FIELD_READ_CAPACITY: &str = "readCapacity";
/// Map key for provisioned write capacity.
pub const FIELD_WRITE_CAPACITY: &str = "writeCapacity";
/// Map key for the secondary-index map.
pub const FIELD_GSI: &str = "GSI";

/// Attribute stamped with the expiry time when TTL is enabled without an
/// explicit attribute name.
pub const DEFAULT_TTL_ATTRIBUTE: &str = "ttl";

pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Definition parsing and coercion errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    InvalidName(String),
    InvalidIndexes(String),
    WrongType {
        field: String,
        expected: &'static str,
    },
    InvalidNumber {
        field: String,
        value: String,
    },
    InvalidKeyType {
        field: String,
        value: String,
    },
}

impl Display for DefinitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(value) => write!(f, "invalid repository name: `{value}`"),
            Self::InvalidIndexes(message) => write!(f, "invalid index definition: {message}"),
            Self::WrongType { field, expected } => {
                write!(f, "definition field `{field}` must be {expected}")
            }
            Self::InvalidNumber { field, value } => {
                write!(
                    f,
                    "definition field `{field}` value `{value}` is not a 64-bit integer"
                )
            }
            Self::InvalidKeyType { field, value } => write!(
                f,
                "definition field `{field}` has unsupported key type `{value}`; expected S|N|B|SS|NS"
            ),
        }
    }
}

impl Error for DefinitionError {}

/// Numeric input accepted by capacity and TTL fields.
///
/// Coercion to `i64` happens when the value is read, so a malformed string
/// surfaces as `DefinitionError::InvalidNumber` at the accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericValue {
    Integer(i64),
    Text(String),
}

impl NumericValue {
    /// Coerces the value to `i64`.
    pub fn to_i64(&self, field: &str) -> DefinitionResult<i64> {
        match self {
            Self::Integer(value) => Ok(*value),
            Self::Text(value) => value
                .parse::<i64>()
                .map_err(|_| DefinitionError::InvalidNumber {
                    field: field.to_string(),
                    value: value.clone(),
                }),
        }
    }
}

impl From<i32> for NumericValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for NumericValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for NumericValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for NumericValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for NumericValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Attribute type of a hash or range key in key/value store families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    Number,
    Binary,
    StringSet,
    NumberSet,
}

impl KeyType {
    /// Stable short code (`S`, `N`, `B`, `SS`, `NS`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "S",
            Self::Number => "N",
            Self::Binary => "B",
            Self::StringSet => "SS",
            Self::NumberSet => "NS",
        }
    }

    /// Parses a short code. `SN` is accepted as a legacy spelling of `NS`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "S" => Some(Self::String),
            "N" => Some(Self::Number),
            "B" => Some(Self::Binary),
            "SS" => Some(Self::StringSet),
            "NS" | "SN" => Some(Self::NumberSet),
            _ => None,
        }
    }
}

/// Fields a key/value store family reads from a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueSchema<'a> {
    pub hash_key: &'a str,
    pub hash_key_type: Option<KeyType>,
    pub range_key: Option<&'a str>,
    pub range_key_type: Option<KeyType>,
    pub read_capacity: i64,
    pub write_capacity: i64,
    pub secondary_indexes: Option<&'a Map<String, Value>>,
}

/// Fields a document store family reads from a definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentSchema<'a> {
    pub indexes: &'a [Index],
    pub custom_id: bool,
}

/// Resolved TTL behavior for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    pub seconds: i64,
    pub attribute: String,
}

/// Backend-agnostic description of one collection/table.
///
/// Built by the caller before first use. Adapters read the fields relevant
/// to their store family and ignore the rest; once a repository was built
/// from a definition, later changes to the definition have no effect on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositoryDefinition {
    name: Option<String>,
    indexes: Option<Vec<Index>>,
    custom_id: Option<bool>,
    enable_ttl: Option<bool>,
    ttl: Option<NumericValue>,
    ttl_attribute: Option<String>,
    hash_key: Option<String>,
    hash_key_type: Option<KeyType>,
    range_key: Option<String>,
    range_key_type: Option<KeyType>,
    read_capacity: Option<NumericValue>,
    write_capacity: Option<NumericValue>,
    secondary_indexes: Option<Map<String, Value>>,
}

impl RepositoryDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.get_or_insert_with(Vec::new).push(index);
        self
    }

    pub fn with_indexes(mut self, indexes: impl IntoIterator<Item = Index>) -> Self {
        self.indexes.get_or_insert_with(Vec::new).extend(indexes);
        self
    }

    /// Marks the `id` property as caller-managed.
    pub fn with_custom_id(mut self, custom_id: bool) -> Self {
        self.custom_id = Some(custom_id);
        self
    }

    /// Enables TTL with the given lifetime and expiry attribute.
    pub fn with_ttl(mut self, seconds: impl Into<NumericValue>, attribute: impl Into<String>) -> Self {
        self.enable_ttl = Some(true);
        self.ttl = Some(seconds.into());
        self.ttl_attribute = Some(attribute.into());
        self
    }

    pub fn with_ttl_enabled(mut self, enabled: bool) -> Self {
        self.enable_ttl = Some(enabled);
        self
    }

    pub fn with_hash_key(mut self, name: impl Into<String>, key_type: KeyType) -> Self {
        self.hash_key = Some(name.into());
        self.hash_key_type = Some(key_type);
        self
    }

    pub fn with_range_key(mut self, name: impl Into<String>, key_type: KeyType) -> Self {
        self.range_key = Some(name.into());
        self.range_key_type = Some(key_type);
        self
    }

    pub fn with_capacity(
        mut self,
        read: impl Into<NumericValue>,
        write: impl Into<NumericValue>,
    ) -> Self {
        self.read_capacity = Some(read.into());
        self.write_capacity = Some(write.into());
        self
    }

    pub fn with_secondary_indexes(mut self, indexes: Map<String, Value>) -> Self {
        self.secondary_indexes = Some(indexes);
        self
    }

    /// Parses the loosely typed map form of a definition.
    ///
    /// Unknown keys are ignored. Absent keys stay unset.
    ///
    /// # Errors
    /// - `WrongType` when a present field has the wrong JSON type.
    /// - `InvalidIndexes` when `indexes` is not an array of index objects.
    /// - `InvalidKeyType` when a key type is not a known short code.
    pub fn from_map(map: &Map<String, Value>) -> DefinitionResult<Self> {
        Ok(Self {
            name: optional_string(map, FIELD_NAME)?,
            indexes: parse_indexes(map)?,
            custom_id: optional_bool(map, FIELD_CUSTOM_ID)?,
            enable_ttl: optional_bool(map, FIELD_ENABLE_TTL)?,
            ttl: optional_numeric(map, FIELD_TTL)?,
            ttl_attribute: optional_string(map, FIELD_TTL_ATTRIBUTE)?,
            hash_key: optional_string(map, FIELD_HASH_KEY)?,
            hash_key_type: optional_key_type(map, FIELD_HASH_KEY_TYPE)?,
            range_key: optional_string(map, FIELD_RANGE_KEY)?,
            range_key_type: optional_key_type(map, FIELD_RANGE_KEY_TYPE)?,
            read_capacity: optional_numeric(map, FIELD_READ_CAPACITY)?,
            write_capacity: optional_numeric(map, FIELD_WRITE_CAPACITY)?,
            secondary_indexes: match map.get(FIELD_GSI) {
                None | Some(Value::Null) => None,
                Some(Value::Object(gsi)) => Some(gsi.clone()),
                Some(_) => return Err(wrong_type(FIELD_GSI, "an object")),
            },
        })
    }

    /// Parses a definition from a JSON value that must be an object.
    pub fn from_value(value: &Value) -> DefinitionResult<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Err(wrong_type("definition", "an object")),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn indexes(&self) -> &[Index] {
        self.indexes.as_deref().unwrap_or_default()
    }

    /// Whether the `id` property is managed by the caller instead of the store.
    pub fn is_custom_id(&self) -> bool {
        self.custom_id.unwrap_or(false)
    }

    pub fn ttl_enabled(&self) -> bool {
        self.enable_ttl.unwrap_or(false)
    }

    /// TTL in seconds.
    pub fn ttl(&self) -> DefinitionResult<i64> {
        numeric_or_zero(self.ttl.as_ref(), FIELD_TTL)
    }

    pub fn ttl_attribute(&self) -> &str {
        self.ttl_attribute.as_deref().unwrap_or_default()
    }

    pub fn hash_key(&self) -> &str {
        self.hash_key.as_deref().unwrap_or_default()
    }

    pub fn hash_key_type(&self) -> Option<KeyType> {
        self.hash_key_type
    }

    pub fn range_key(&self) -> &str {
        self.range_key.as_deref().unwrap_or_default()
    }

    pub fn range_key_type(&self) -> Option<KeyType> {
        self.range_key_type
    }

    pub fn read_capacity(&self) -> DefinitionResult<i64> {
        numeric_or_zero(self.read_capacity.as_ref(), FIELD_READ_CAPACITY)
    }

    pub fn write_capacity(&self) -> DefinitionResult<i64> {
        numeric_or_zero(self.write_capacity.as_ref(), FIELD_WRITE_CAPACITY)
    }

    pub fn secondary_indexes(&self) -> Option<&Map<String, Value>> {
        self.secondary_indexes.as_ref()
    }

    /// Key/value family view. `None` when no hash key is declared.
    pub fn key_value_schema(&self) -> DefinitionResult<Option<KeyValueSchema<'_>>> {
        let hash_key = self.hash_key();
        if hash_key.is_empty() {
            return Ok(None);
        }
        let range_key = Some(self.range_key()).filter(|key| !key.is_empty());

        Ok(Some(KeyValueSchema {
            hash_key,
            hash_key_type: self.hash_key_type,
            range_key,
            range_key_type: range_key.and(self.range_key_type),
            read_capacity: self.read_capacity()?,
            write_capacity: self.write_capacity()?,
            secondary_indexes: self.secondary_indexes(),
        }))
    }

    /// Document family view.
    pub fn document_schema(&self) -> DocumentSchema<'_> {
        DocumentSchema {
            indexes: self.indexes(),
            custom_id: self.is_custom_id(),
        }
    }

    /// Resolved TTL behavior, or `None` when TTL is disabled or non-positive.
    pub fn ttl_policy(&self) -> DefinitionResult<Option<TtlPolicy>> {
        if !self.ttl_enabled() {
            return Ok(None);
        }
        let seconds = self.ttl()?;
        if seconds <= 0 {
            return Ok(None);
        }
        let attribute = match self.ttl_attribute() {
            "" => DEFAULT_TTL_ATTRIBUTE,
            other => other,
        };
        Ok(Some(TtlPolicy {
            seconds,
            attribute: attribute.to_string(),
        }))
    }

    /// Runs every checked conversion once.
    pub fn validate(&self) -> DefinitionResult<()> {
        self.ttl()?;
        self.read_capacity()?;
        self.write_capacity()?;
        for index in self.indexes() {
            if index.fields().is_empty() {
                return Err(DefinitionError::InvalidIndexes(format!(
                    "index `{}` declares no fields",
                    index.name()
                )));
            }
        }
        Ok(())
    }
}

fn numeric_or_zero(value: Option<&NumericValue>, field: &str) -> DefinitionResult<i64> {
    match value {
        Some(value) => value.to_i64(field),
        None => Ok(0),
    }
}

fn wrong_type(field: &str, expected: &'static str) -> DefinitionError {
    DefinitionError::WrongType {
        field: field.to_string(),
        expected,
    }
}

fn optional_string(map: &Map<String, Value>, field: &str) -> DefinitionResult<Option<String>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(wrong_type(field, "a string")),
    }
}

fn optional_bool(map: &Map<String, Value>, field: &str) -> DefinitionResult<Option<bool>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(wrong_type(field, "a boolean")),
    }
}

fn optional_numeric(
    map: &Map<String, Value>,
    field: &str,
) -> DefinitionResult<Option<NumericValue>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => match number.as_i64() {
            Some(value) => Ok(Some(NumericValue::Integer(value))),
            None => Err(DefinitionError::InvalidNumber {
                field: field.to_string(),
                value: number.to_string(),
            }),
        },
        Some(Value::String(value)) => Ok(Some(NumericValue::Text(value.clone()))),
        Some(_) => Err(wrong_type(field, "an integer or a decimal string")),
    }
}

fn optional_key_type(map: &Map<String, Value>, field: &str) -> DefinitionResult<Option<KeyType>> {
    let Some(value) = optional_string(map, field)? else {
        return Ok(None);
    };
    KeyType::parse(&value)
        .map(Some)
        .ok_or_else(|| DefinitionError::InvalidKeyType {
            field: field.to_string(),
            value,
        })
}

fn parse_indexes(map: &Map<String, Value>) -> DefinitionResult<Option<Vec<Index>>> {
    let entries = match map.get(FIELD_INDEXES) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(DefinitionError::InvalidIndexes(
                "`indexes` must be an array of index objects".to_string(),
            ))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(position, entry)| parse_index(position, entry))
        .collect::<DefinitionResult<Vec<_>>>()
        .map(Some)
}

fn parse_index(position: usize, entry: &Value) -> DefinitionResult<Index> {
    let Value::Object(object) = entry else {
        return Err(DefinitionError::InvalidIndexes(format!(
            "entry {position} must be an object"
        )));
    };

    let fields = match object.get("fields") {
        Some(Value::Array(fields)) => fields
            .iter()
            .map(|field| match field {
                Value::String(name) => Ok(name.clone()),
                _ => Err(DefinitionError::InvalidIndexes(format!(
                    "entry {position} field names must be strings"
                ))),
            })
            .collect::<DefinitionResult<Vec<_>>>()?,
        _ => {
            return Err(DefinitionError::InvalidIndexes(format!(
                "entry {position} must declare a `fields` array"
            )))
        }
    };

    let unique = match object.get("unique") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(unique)) => *unique,
        Some(_) => {
            return Err(DefinitionError::InvalidIndexes(format!(
                "entry {position} `unique` must be a boolean"
            )))
        }
    };

    let name = match object.get("name") {
        None | Some(Value::Null) => name_from_fields(&fields),
        Some(Value::String(name)) => name.clone(),
        Some(_) => {
            return Err(DefinitionError::InvalidIndexes(format!(
                "entry {position} `name` must be a string"
            )))
        }
    };

    Ok(Index::new(name, unique, fields))
}

#[cfg(test)]
mod tests {
    use super::{DefinitionError, KeyType, NumericValue, RepositoryDefinition};
    use serde_json::json;

    #[test]
    fn numeric_value_coerces_integers_and_decimal_strings() {
        assert_eq!(NumericValue::from(5).to_i64("ttl"), Ok(5));
        assert_eq!(NumericValue::from(7_i64).to_i64("ttl"), Ok(7));
        assert_eq!(NumericValue::from("42").to_i64("ttl"), Ok(42));
        assert_eq!(NumericValue::from("-3").to_i64("ttl"), Ok(-3));
    }

    #[test]
    fn numeric_value_rejects_unparseable_text() {
        let err = NumericValue::from("ten").to_i64("readCapacity").unwrap_err();
        assert_eq!(
            err,
            DefinitionError::InvalidNumber {
                field: "readCapacity".to_string(),
                value: "ten".to_string(),
            }
        );
    }

    #[test]
    fn key_type_parses_short_codes() {
        assert_eq!(KeyType::parse("S"), Some(KeyType::String));
        assert_eq!(KeyType::parse("NS"), Some(KeyType::NumberSet));
        assert_eq!(KeyType::parse("SN"), Some(KeyType::NumberSet));
        assert_eq!(KeyType::parse("X"), None);
        assert_eq!(KeyType::Binary.as_str(), "B");
    }

    #[test]
    fn from_map_rejects_float_capacity() {
        let value = json!({ "readCapacity": 1.5 });
        let err = RepositoryDefinition::from_value(&value).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidNumber { .. }));
    }

    #[test]
    fn from_map_rejects_bool_name() {
        let value = json!({ "name": true });
        let err = RepositoryDefinition::from_value(&value).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::WrongType { ref field, .. } if field == "name"
        ));
    }

    #[test]
    fn ttl_policy_requires_enabled_positive_ttl() {
        let disabled = RepositoryDefinition::new("sessions");
        assert_eq!(disabled.ttl_policy(), Ok(None));

        let zero = RepositoryDefinition::new("sessions").with_ttl(0, "expiresAt");
        assert_eq!(zero.ttl_policy(), Ok(None));

        let enabled = RepositoryDefinition::new("sessions").with_ttl("60", "");
        let policy = enabled.ttl_policy().unwrap().unwrap();
        assert_eq!(policy.seconds, 60);
        assert_eq!(policy.attribute, "ttl");
    }

    #[test]
    fn validate_reports_bad_numeric_field() {
        let def = RepositoryDefinition::new("t").with_capacity(1, "lots");
        let err = def.validate().unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::InvalidNumber { ref field, .. } if field == "writeCapacity"
        ));
    }
}
