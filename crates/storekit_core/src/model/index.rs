//! Index value object.
//!
//! # Invariants
//! - An `Index` is immutable once constructed.
//! - Derived names join field names with `_` in declaration order.
//! - Name uniqueness across one definition is left to the consuming adapter.

const INDEX_NAME_SEPARATOR: &str = "_";

/// Named, ordered set of fields with a uniqueness flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Index {
    name: String,
    fields: Vec<String>,
    unique: bool,
}

impl Index {
    /// Creates an index with an explicit name.
    pub fn new<I, S>(name: impl Into<String>, unique: bool, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique,
        }
    }

    /// Creates a unique index named after its fields.
    pub fn unique<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::derived(true, fields)
    }

    /// Creates a non-unique index named after its fields.
    pub fn non_unique<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::derived(false, fields)
    }

    fn derived<I, S>(unique: bool, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        Self {
            name: name_from_fields(&fields),
            fields,
            unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// Joins field names into the default index name.
pub fn name_from_fields(fields: &[String]) -> String {
    fields.join(INDEX_NAME_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::Index;

    #[test]
    fn unique_index_derives_name_from_single_field() {
        let index = Index::unique(["email"]);
        assert_eq!(index.name(), "email");
        assert_eq!(index.fields(), ["email".to_string()]);
        assert!(index.is_unique());
    }

    #[test]
    fn composite_index_joins_field_names() {
        let index = Index::unique(["a", "b"]);
        assert_eq!(index.name(), "a_b");

        let index = Index::non_unique(vec!["tenant".to_string(), "created_at".to_string()]);
        assert_eq!(index.name(), "tenant_created_at");
        assert!(!index.is_unique());
    }

    #[test]
    fn explicit_name_is_kept_verbatim() {
        let index = Index::new("by_owner", false, ["owner_id"]);
        assert_eq!(index.name(), "by_owner");
        assert_eq!(index.fields().len(), 1);
    }

    #[test]
    fn index_without_fields_has_empty_name() {
        let index = Index::non_unique(Vec::<String>::new());
        assert_eq!(index.name(), "");
        assert!(index.fields().is_empty());
    }
}
