//! Repository contract shared by every store adapter.
//!
//! # Responsibility
//! - Define the CRUD surface service code uses for one collection/table.
//! - Keep store-specific query details behind adapter implementations.
//!
//! # Invariants
//! - Every operation is parameterized by a `Filter` and is fallible.
//! - `get_one` reports a missing record as `RepoError::NotFound`, never as an
//!   empty record.
//! - Records are JSON objects; typed access goes through `RepositoryExt`.

use crate::filter::Filter;
use crate::model::definition::DefinitionError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One stored object.
pub type Record = Map<String, Value>;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository operation errors.
#[derive(Debug)]
pub enum RepoError {
    NotFound(String),
    Conflict(String),
    InvalidData(String),
    Definition(DefinitionError),
    Storage(rusqlite::Error),
    Serialization(serde_json::Error),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "record not found: {what}"),
            Self::Conflict(message) => write!(f, "record conflict: {message}"),
            Self::InvalidData(message) => write!(f, "invalid record data: {message}"),
            Self::Definition(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::NotFound(_) | Self::Conflict(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DefinitionError> for RepoError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<regex::Error> for RepoError {
    fn from(value: regex::Error) -> Self {
        Self::InvalidData(format!("invalid filter pattern: {value}"))
    }
}

/// Sort direction for `get_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Parses `asc`/`desc` (case-insensitive). Anything else is ascending.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" => Self::Descending,
            _ => Self::Ascending,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Ordering and pagination options for listing records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub order: Option<String>,
    pub sorting: SortDirection,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl ListQuery {
    pub fn ordered_by(field: impl Into<String>, sorting: SortDirection) -> Self {
        Self {
            order: Some(field.into()),
            sorting,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// CRUD contract for one collection/table.
pub trait Repository: Send + Sync {
    /// Returns the first record matching `filter`.
    fn get_one(&self, filter: &Filter) -> RepoResult<Record>;

    /// Returns every matching record, ordered and paginated by `query`.
    fn get_all(&self, filter: &Filter, query: &ListQuery) -> RepoResult<Vec<Record>>;

    /// Inserts `object`, or merges it into the first record matching `filter`
    /// when a filter is given. Returns the stored record.
    fn save(&self, object: Record, filter: Option<&Filter>) -> RepoResult<Record>;

    /// Deletes the first matching record.
    fn delete_one(&self, filter: &Filter) -> RepoResult<()>;

    /// Deletes every matching record.
    fn delete_all(&self, filter: &Filter) -> RepoResult<()>;
}

/// Typed access over any repository.
pub trait RepositoryExt: Repository {
    fn get_one_as<T: DeserializeOwned>(&self, filter: &Filter) -> RepoResult<T> {
        let record = self.get_one(filter)?;
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    fn get_all_as<T: DeserializeOwned>(&self, filter: &Filter, query: &ListQuery) -> RepoResult<Vec<T>> {
        self.get_all(filter, query)?
            .into_iter()
            .map(|record| Ok(serde_json::from_value(Value::Object(record))?))
            .collect()
    }

    fn save_as<T: Serialize + DeserializeOwned>(&self, object: &T, filter: Option<&Filter>) -> RepoResult<T> {
        let record = to_record(object)?;
        let saved = self.save(record, filter)?;
        Ok(serde_json::from_value(Value::Object(saved))?)
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

/// Serializes a value that must produce a JSON object.
pub fn to_record<T: Serialize>(object: &T) -> RepoResult<Record> {
    match serde_json::to_value(object)? {
        Value::Object(record) => Ok(record),
        other => Err(RepoError::InvalidData(format!(
            "expected an object, got `{other}`"
        ))),
    }
}

/// Human-readable description of a filter for error messages.
pub(crate) fn describe_filter(filter: &Filter) -> String {
    filter.to_value().to_string()
}

#[cfg(test)]
mod tests {
    use super::{to_record, RepoError, SortDirection};
    use serde_json::json;

    #[test]
    fn sort_direction_parses_loosely() {
        assert_eq!(SortDirection::parse("DESC"), SortDirection::Descending);
        assert_eq!(SortDirection::parse(" asc "), SortDirection::Ascending);
        assert_eq!(SortDirection::parse(""), SortDirection::Ascending);
    }

    #[test]
    fn to_record_rejects_non_objects() {
        let err = to_record(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(_)));
        assert_eq!(to_record(&json!({"a": 1})).unwrap().len(), 1);
    }
}
