//! Backend connection configuration.
//!
//! # Responsibility
//! - Model per-backend-type connection info.
//! - Load the type → connection map from JSON.
//!
//! # Invariants
//! - Empty string fields count as absent for required-property checks.
//! - Unknown JSON keys are preserved in `DbInfo::extra`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Connection info for one backend type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Database name, or file path for file-backed stores.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pass: String,
    /// Path to a credentials file, for stores that authenticate with one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_region: String,
    /// Adapter-specific properties not modeled above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DbInfo {
    /// Connection info pointing at one database (or file path).
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Resolves a configuration key by its JSON name.
    ///
    /// Returns `None` when the key is unknown, empty or `null`.
    pub fn property(&self, key: &str) -> Option<Value> {
        let known = match key {
            "host" => Some(&self.host),
            "database" => Some(&self.database),
            "user" => Some(&self.user),
            "pass" => Some(&self.pass),
            "credentials" => Some(&self.credentials),
            "endpoint" => Some(&self.endpoint),
            "awsRegion" => Some(&self.aws_region),
            _ => None,
        };
        if let Some(value) = known {
            return (!value.is_empty()).then(|| Value::String(value.clone()));
        }

        match self.extra.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) if value.is_empty() => None,
            Some(value) => Some(value.clone()),
        }
    }

    /// Returns the required keys this connection info does not provide.
    pub fn missing_properties<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        required
            .into_iter()
            .filter(|key| self.property(key).is_none())
            .cloned()
            .collect()
    }
}

/// Backend type → connection info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendsConfig {
    backends: BTreeMap<String, DbInfo>,
}

impl BackendsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend_type: impl Into<String>, info: DbInfo) -> Self {
        self.backends.insert(backend_type.into(), info);
        self
    }

    pub fn get(&self, backend_type: &str) -> Option<&DbInfo> {
        self.backends.get(backend_type)
    }

    pub fn backend_types(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Parses `{"<type>": {<DbInfo>}, ...}`.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Parse)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read backends config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse backends config: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
        }
    }
}
