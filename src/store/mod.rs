//! Document store capability.
//!
//! Everything that touches persisted documents goes through `DocumentStore`, a
//! narrow read / batch-write interface modelled on a managed document database.
//! Two implementations ship with the crate: `SqliteStore` for real runs and
//! `MemoryStore` for tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Maximum number of operations a single `batch_write` accepts unless the store says otherwise.
pub const DEFAULT_BATCH_CEILING: usize = 500;

/// JSON object holding a document's fields.
pub type Fields = Map<String, Value>;

/// One stored document: an opaque id plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// A field whose value is set: anything except null, `false`, zero and `""`.
    pub fn present(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        })
    }

    /// A field that holds a non-empty string.
    pub fn present_str(&self, field: &str) -> Option<&str> {
        self.present(field).and_then(|v| v.as_str())
    }
}

/// A single operation inside a write batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge `fields` into an existing document. Fails the batch if the document is missing.
    Merge { id: String, fields: Fields },
    /// Create or fully replace a document.
    Set { id: String, fields: Fields },
    /// Delete a document. Deleting a missing document is not an error.
    Delete { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq { field, .. } | Filter::In { field, .. } => field,
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::Eq { field, value } => fields.get(field) == Some(value),
            Filter::In { field, values } => fields
                .get(field)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
        }
    }
}

/// Conjunctive filter query with optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A composite index a query shape relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub collection: String,
    pub fields: Vec<(String, SortDirection)>,
    pub purpose: String,
}

impl IndexSpec {
    /// Deterministic index name derived from the collection and field list.
    pub fn name(&self) -> String {
        let mut name = format!("idx_doc_{}", self.collection);
        for (field, dir) in &self.fields {
            name.push('_');
            name.push_str(field);
            if *dir == SortDirection::Desc {
                name.push_str("_desc");
            }
        }
        name
    }

    pub fn describe_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(f, d)| format!("{} ({})", f, d.as_sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Present,
    Missing,
    /// The store answers every query shape without secondary indexes.
    NotApplicable,
}

/// Read + batch-write access to a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Externally enforced per-batch operation ceiling.
    fn max_batch_size(&self) -> usize {
        DEFAULT_BATCH_CEILING
    }

    /// Every document in `collection`.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, AppError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, AppError>;

    /// Apply `ops` atomically. Fails without applying anything when `ops` exceeds
    /// `max_batch_size()` or any op fails.
    async fn batch_write(&self, collection: &str, ops: Vec<WriteOp>) -> Result<(), AppError>;

    /// Create a document with a store-assigned id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, AppError>;

    async fn index_status(&self, _spec: &IndexSpec) -> Result<IndexStatus, AppError> {
        Ok(IndexStatus::NotApplicable)
    }

    async fn create_index(&self, _spec: &IndexSpec) -> Result<(), AppError> {
        Ok(())
    }

    /// Backend query plan for `query`, when the backend can describe one.
    async fn explain(&self, _collection: &str, _query: &Query) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    /// Release the connection. Further calls on a closed store fail.
    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Reject field names that cannot be used verbatim in a JSON path.
pub(crate) fn validate_field_name(field: &str) -> Result<(), AppError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid field name '{field}'")))
    }
}

/// Reject batches above the ceiling before anything is applied.
pub(crate) fn check_batch_size(len: usize, ceiling: usize) -> Result<(), AppError> {
    if len > ceiling {
        return Err(AppError::Validation(format!(
            "Batch of {len} operations exceeds the store limit of {ceiling}"
        )));
    }
    Ok(())
}
