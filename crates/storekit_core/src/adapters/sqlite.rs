//! SQLite document adapter.
//!
//! # Responsibility
//! - Store each repository as a table of JSON documents keyed by `id`.
//! - Translate `Filter` constraints into `json_extract` predicates.
//! - Materialize definition indexes as expression indexes.
//!
//! # Invariants
//! - One connection per backend, shared by its repositories behind a mutex.
//! - Connections have `foreign_keys=ON` and a 5s busy timeout.
//! - Table, index and index field names are plain identifiers; anything else
//!   is rejected before any SQL is built.
//! - Unique index and primary key violations surface as `RepoError::Conflict`.

use crate::adapters::{assign_identity, key_text, merge_into, now_epoch_secs, stamp_ttl};
use crate::backend::manager::{BackendManager, BackendProperties};
use crate::backend::repositories::RepositoriesBackend;
use crate::backend::{Backend, BackendError, BackendResult};
use crate::config::DbInfo;
use crate::filter::{Filter, FilterValue, PATTERN_WILDCARD};
use crate::model::definition::{DefinitionError, DefinitionResult, RepositoryDefinition, TtlPolicy};
use crate::repo::{describe_filter, ListQuery, Record, RepoError, RepoResult, Repository};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Backend type name this adapter registers under.
pub const BACKEND_TYPE: &str = "sqlite";

/// Connection property holding the database path.
pub const DATABASE_PROPERTY: &str = "database";

/// Path that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const DOCUMENT_KEY: &str = "id";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Connection shared by every repository of one backend.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Registers the SQLite adapter. It requires the `database` property.
pub fn register(manager: &BackendManager) {
    let mut properties = BackendProperties::new();
    properties.insert(
        DATABASE_PROPERTY.to_string(),
        Value::String(format!("SQLite file path or {IN_MEMORY}")),
    );
    manager.support_backend(BACKEND_TYPE, build_backend, properties);
}

pub fn build_backend(info: &DbInfo, _manager: &BackendManager) -> BackendResult<Arc<dyn Backend>> {
    let conn: SharedConnection = Arc::new(Mutex::new(open_connection(&info.database)?));

    let for_repositories = Arc::clone(&conn);
    let backend = RepositoriesBackend::new(info.clone(), move |definition, _backend| {
        let repository: Arc<dyn Repository> =
            Arc::new(SqliteRepository::create(Arc::clone(&for_repositories), definition)?);
        Ok(repository)
    })
    .with_label(BACKEND_TYPE)
    .with_cleanup(move || {
        if let Err(err) = lock_connection(&conn).execute_batch("PRAGMA optimize;") {
            warn!(
                "event=db_close module=sqlite status=error error_code=optimize_failed error={}",
                err
            );
        }
    });
    Ok(Arc::new(backend))
}

/// Opens a file or in-memory database and configures connection pragmas.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_connection(database: &str) -> BackendResult<Connection> {
    let mode = if database == IN_MEMORY { "memory" } else { "file" };
    let started_at = Instant::now();
    info!("event=db_open module=sqlite status=start mode={mode}");

    let opened = if database == IN_MEMORY {
        Connection::open_in_memory()
    } else {
        Connection::open(database)
    };
    let result = opened.and_then(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    });

    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=sqlite status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=sqlite status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(BackendError::from(err))
        }
    }
}

fn lock_connection(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Document repository stored in one SQLite table.
pub struct SqliteRepository {
    table: String,
    custom_id: bool,
    ttl: Option<TtlPolicy>,
    conn: SharedConnection,
}

impl SqliteRepository {
    /// Creates the table and indexes for `definition` when missing.
    pub fn create(conn: SharedConnection, definition: &RepositoryDefinition) -> BackendResult<Self> {
        definition.validate()?;
        let table = checked_identifier(definition.name())?;
        let schema = definition.document_schema();

        {
            let guard = lock_connection(&conn);
            guard.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (
                    id TEXT PRIMARY KEY NOT NULL,
                    doc TEXT NOT NULL CHECK (json_valid(doc))
                );"
            ))?;
            for index in schema.indexes {
                guard.execute_batch(&index_sql(&table, index.name(), index.fields(), index.is_unique())?)?;
            }
        }

        Ok(Self {
            table,
            custom_id: schema.custom_id,
            ttl: definition.ttl_policy()?,
            conn,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        lock_connection(&self.conn)
    }

    fn where_clause(&self, filter: &Filter) -> RepoResult<WhereClause> {
        WhereClause::build(filter, self.ttl.as_ref(), now_epoch_secs())
    }

    /// Deletes documents whose TTL attribute is at or before `now`.
    fn purge_expired(&self, conn: &Connection, now: i64) -> RepoResult<()> {
        let Some(policy) = &self.ttl else {
            return Ok(());
        };
        let path = json_path(&policy.attribute).ok_or_else(|| unsupported_property(&policy.attribute))?;
        conn.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE json_type(doc, '{path}') = 'integer'
                 AND json_extract(doc, '{path}') <= ?1;",
                self.table
            ),
            params![now],
        )?;
        Ok(())
    }
}

impl Repository for SqliteRepository {
    fn get_one(&self, filter: &Filter) -> RepoResult<Record> {
        let clause = self.where_clause(filter)?;
        let doc: Option<String> = self
            .lock()
            .query_row(
                &format!(
                    "SELECT doc FROM \"{}\" WHERE {} ORDER BY rowid ASC LIMIT 1",
                    self.table, clause.sql
                ),
                params_from_iter(clause.binds),
                |row| row.get(0),
            )
            .optional()?;

        match doc {
            Some(doc) => parse_doc(&doc),
            None => Err(RepoError::NotFound(describe_filter(filter))),
        }
    }

    fn get_all(&self, filter: &Filter, query: &ListQuery) -> RepoResult<Vec<Record>> {
        let clause = self.where_clause(filter)?;
        let mut sql = format!("SELECT doc FROM \"{}\" WHERE {}", self.table, clause.sql);
        let mut bind_values = clause.binds;

        match query.order.as_deref() {
            Some(order) => {
                let path = json_path(order).ok_or_else(|| unsupported_property(order))?;
                sql.push_str(&format!(
                    " ORDER BY json_extract(doc, '{path}') {}, rowid ASC",
                    query.sorting.as_sql()
                ));
            }
            None => sql.push_str(" ORDER BY rowid ASC"),
        }

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(SqlValue::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(SqlValue::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(SqlValue::Integer(i64::from(query.offset)));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let doc: String = row.get(0)?;
            records.push(parse_doc(&doc)?);
        }
        Ok(records)
    }

    fn save(&self, object: Record, filter: Option<&Filter>) -> RepoResult<Record> {
        let Some(filter) = filter else {
            let now = now_epoch_secs();
            let mut record = object;
            assign_identity(&mut record, DOCUMENT_KEY, self.custom_id)?;
            stamp_ttl(&mut record, self.ttl.as_ref(), now);
            let id = key_text(&record, DOCUMENT_KEY, None)?;
            let doc = serde_json::to_string(&record)?;
            let conn = self.lock();
            self.purge_expired(&conn, now)?;
            conn.execute(
                &format!(
                    "INSERT INTO \"{}\" (id, doc) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET doc = excluded.doc;",
                    self.table
                ),
                params![id, doc],
            )
            .map_err(storage_error)?;
            return Ok(record);
        };

        let clause = self.where_clause(filter)?;
        let conn = self.lock();
        self.purge_expired(&conn, now_epoch_secs())?;
        let found: Option<(i64, String)> = conn
            .query_row(
                &format!(
                    "SELECT rowid, doc FROM \"{}\" WHERE {} ORDER BY rowid ASC LIMIT 1",
                    self.table, clause.sql
                ),
                params_from_iter(clause.binds),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (rowid, doc) = found.ok_or_else(|| RepoError::NotFound(describe_filter(filter)))?;

        let mut merged = parse_doc(&doc)?;
        merge_into(&mut merged, object);
        let id = key_text(&merged, DOCUMENT_KEY, None)?;
        conn.execute(
            &format!(
                "UPDATE \"{}\" SET id = ?1, doc = ?2 WHERE rowid = ?3;",
                self.table
            ),
            params![id, serde_json::to_string(&merged)?, rowid],
        )
        .map_err(storage_error)?;
        Ok(merged)
    }

    fn delete_one(&self, filter: &Filter) -> RepoResult<()> {
        let clause = self.where_clause(filter)?;
        let changed = self.lock().execute(
            &format!(
                "DELETE FROM \"{table}\" WHERE rowid IN (
                    SELECT rowid FROM \"{table}\" WHERE {} ORDER BY rowid ASC LIMIT 1
                );",
                clause.sql,
                table = self.table
            ),
            params_from_iter(clause.binds),
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(describe_filter(filter)));
        }
        Ok(())
    }

    fn delete_all(&self, filter: &Filter) -> RepoResult<()> {
        let clause = self.where_clause(filter)?;
        let conn = self.lock();
        self.purge_expired(&conn, now_epoch_secs())?;
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE {};", self.table, clause.sql),
            params_from_iter(clause.binds),
        )?;
        Ok(())
    }
}

/// SQL predicate plus its positional bind values.
struct WhereClause {
    sql: String,
    binds: Vec<SqlValue>,
}

impl WhereClause {
    fn build(filter: &Filter, ttl: Option<&TtlPolicy>, now: i64) -> RepoResult<Self> {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        for (property, value) in filter.iter() {
            let path = json_path(property).ok_or_else(|| unsupported_property(property))?;
            let extract = format!("json_extract(doc, '{path}')");
            let type_of = format!("json_type(doc, '{path}')");

            match value {
                FilterValue::Exact(Value::Null) => conditions.push(format!("{extract} IS NULL")),
                FilterValue::Exact(Value::Bool(flag)) => {
                    conditions.push(format!("{type_of} = ?"));
                    binds.push(SqlValue::Text(flag.to_string()));
                }
                FilterValue::Exact(Value::Number(number)) => {
                    conditions.push(format!("{type_of} IN ('integer', 'real') AND {extract} = ?"));
                    binds.push(match number.as_i64() {
                        Some(integer) => SqlValue::Integer(integer),
                        None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
                    });
                }
                FilterValue::Exact(Value::String(text)) => {
                    conditions.push(format!("{type_of} = 'text' AND {extract} = ?"));
                    binds.push(SqlValue::Text(text.clone()));
                }
                FilterValue::Exact(composite) => {
                    let kind = if composite.is_array() { "array" } else { "object" };
                    conditions.push(format!("{type_of} = '{kind}' AND {extract} = json(?)"));
                    binds.push(SqlValue::Text(composite.to_string()));
                }
                FilterValue::Pattern(pattern) => {
                    conditions.push(format!("{type_of} = 'text' AND {extract} GLOB ?"));
                    binds.push(SqlValue::Text(like_to_glob(pattern)));
                }
            }
        }

        if let Some(policy) = ttl {
            let path = json_path(&policy.attribute)
                .ok_or_else(|| unsupported_property(&policy.attribute))?;
            conditions.push(format!(
                "json_type(doc, '{path}') IS NOT 'integer' OR json_extract(doc, '{path}') > ?"
            ));
            binds.push(SqlValue::Integer(now));
        }

        let sql = if conditions.is_empty() {
            "1 = 1".to_string()
        } else {
            conditions
                .iter()
                .map(|condition| format!("({condition})"))
                .collect::<Vec<_>>()
                .join(" AND ")
        };
        Ok(Self { sql, binds })
    }
}

fn checked_identifier(name: &str) -> DefinitionResult<String> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(DefinitionError::InvalidName(format!(
            "`{name}` is not a valid SQLite identifier"
        )))
    }
}

fn index_sql(table: &str, name: &str, fields: &[String], unique: bool) -> DefinitionResult<String> {
    let index_name = checked_identifier(name)
        .map_err(|_| DefinitionError::InvalidIndexes(format!("invalid index name `{name}`")))?;
    let columns = fields
        .iter()
        .map(|field| {
            checked_identifier(field)
                .map(|field| format!("json_extract(doc, '$.\"{field}\"')"))
                .map_err(|_| {
                    DefinitionError::InvalidIndexes(format!(
                        "index `{name}` has invalid field `{field}`"
                    ))
                })
        })
        .collect::<DefinitionResult<Vec<_>>>()?
        .join(", ");
    Ok(format!(
        "CREATE {}INDEX IF NOT EXISTS \"{table}__{index_name}\" ON \"{table}\" ({columns});",
        if unique { "UNIQUE " } else { "" }
    ))
}

/// JSON path for a top-level property, or `None` when it cannot be quoted.
fn json_path(property: &str) -> Option<String> {
    if property.is_empty() || property.contains(['"', '\'', '\\']) {
        return None;
    }
    Some(format!("$.\"{property}\""))
}

fn unsupported_property(property: &str) -> RepoError {
    RepoError::InvalidData(format!("unsupported property name `{property}`"))
}

/// Rewrites a `%` LIKE pattern as a GLOB, escaping GLOB metacharacters.
fn like_to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            PATTERN_WILDCARD => glob.push('*'),
            '*' => glob.push_str("[*]"),
            '?' => glob.push_str("[?]"),
            '[' => glob.push_str("[[]"),
            other => glob.push(other),
        }
    }
    glob
}

fn parse_doc(doc: &str) -> RepoResult<Record> {
    Ok(serde_json::from_str(doc)?)
}

fn storage_error(err: rusqlite::Error) -> RepoError {
    if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        return RepoError::Conflict(err.to_string());
    }
    RepoError::Storage(err)
}

#[cfg(test)]
mod tests {
    use super::{checked_identifier, index_sql, json_path, like_to_glob, open_connection, WhereClause};
    use crate::filter::Filter;
    use crate::model::definition::{DefinitionError, TtlPolicy};
    use crate::repo::RepoError;
    use rusqlite::types::Value as SqlValue;

    #[test]
    fn like_patterns_become_escaped_globs() {
        assert_eq!(like_to_glob("ada%"), "ada*");
        assert_eq!(like_to_glob("%a*b?[c]%"), "*a[*]b[?][[]c]*");
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(checked_identifier("users_v2").is_ok());
        assert!(matches!(
            checked_identifier("users; drop"),
            Err(DefinitionError::InvalidName(_))
        ));
        assert!(checked_identifier("1users").is_err());
    }

    #[test]
    fn json_path_quotes_property() {
        assert_eq!(json_path("email").as_deref(), Some("$.\"email\""));
        assert_eq!(json_path("a.b").as_deref(), Some("$.\"a.b\""));
        assert!(json_path("x\"y").is_none());
        assert!(json_path("").is_none());
    }

    #[test]
    fn index_sql_builds_expression_index() {
        let sql = index_sql("users", "email", &["email".to_string()], true).unwrap();
        assert_eq!(
            sql,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"users__email\" ON \"users\" (json_extract(doc, '$.\"email\"'));"
        );
        let err = index_sql("users", "bad", &["e-mail".to_string()], false).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidIndexes(_)));
    }

    #[test]
    fn where_clause_binds_in_order_and_adds_ttl() {
        let filter = Filter::new().match_value("age", 3).match_pattern("name", "a%");
        let policy = TtlPolicy {
            seconds: 10,
            attribute: "ttl".to_string(),
        };
        let clause = WhereClause::build(&filter, Some(&policy), 99).unwrap();

        assert_eq!(
            clause.binds,
            vec![
                SqlValue::Integer(3),
                SqlValue::Text("a*".to_string()),
                SqlValue::Integer(99)
            ]
        );
        assert!(clause.sql.contains("GLOB ?"));
        assert_eq!(clause.sql.matches(" AND (").count(), 2);
    }

    #[test]
    fn empty_filter_matches_everything() {
        let clause = WhereClause::build(&Filter::new(), None, 0).unwrap();
        assert_eq!(clause.sql, "1 = 1");
        assert!(clause.binds.is_empty());
    }

    #[test]
    fn unquotable_property_is_invalid_data() {
        let err = WhereClause::build(&Filter::new().match_value("a'b", 1), None, 0)
            .err()
            .expect("must fail");
        assert!(matches!(err, RepoError::InvalidData(_)));
    }

    #[test]
    fn in_memory_connection_enables_foreign_keys() {
        let conn = open_connection(":memory:").expect("open");
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("pragma");
        assert_eq!(enabled, 1);
    }
}
