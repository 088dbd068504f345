use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::Value;

use crate::db::DbPool;
use crate::error::AppError;
use crate::store::{validate_field_name, Document, Fields, Filter, IndexSpec, Query, WriteOp};

fn parse_fields(raw: &str) -> Result<Fields, AppError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!(
            "Stored document is not a JSON object: {}",
            other
        ))),
    }
}

fn row_to_raw(row: &Row) -> rusqlite::Result<(String, String)> {
    Ok((row.get("id")?, row.get("data")?))
}

fn raw_to_document((id, data): (String, String)) -> Result<Document, AppError> {
    Ok(Document::new(id, parse_fields(&data)?))
}

/// `json_extract` expression for a validated top-level field.
fn field_expr(field: &str) -> Result<String, AppError> {
    validate_field_name(field)?;
    Ok(format!("json_extract(data, '$.{field}')"))
}

/// Bind value matching what `json_extract` yields for the same JSON value.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub fn get_all(pool: &DbPool, collection: &str) -> Result<Vec<Document>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, data FROM documents WHERE collection = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![collection], row_to_raw)?;
    let docs = rows
        .map(|r| raw_to_document(r?))
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok(docs)
}

pub fn get_by_id(pool: &DbPool, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
    let conn = pool.get()?;
    let raw = conn
        .query_row(
            "SELECT id, data FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            row_to_raw,
        )
        .optional()?;
    raw.map(raw_to_document).transpose()
}

pub fn query(pool: &DbPool, collection: &str, query: &Query) -> Result<Vec<Document>, AppError> {
    let mut sql = String::from("SELECT id, data FROM documents WHERE collection = ?");
    let mut binds: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];

    for filter in &query.filters {
        let expr = field_expr(filter.field())?;
        match filter {
            Filter::Eq { value: Value::Null, .. } => {
                sql.push_str(&format!(" AND {expr} IS NULL"));
            }
            Filter::Eq { value, .. } => {
                sql.push_str(&format!(" AND {expr} = ?"));
                binds.push(to_sql_value(value));
            }
            Filter::In { values, .. } if values.is_empty() => {
                sql.push_str(" AND 0");
            }
            Filter::In { values, .. } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!(" AND {expr} IN ({placeholders})"));
                binds.extend(values.iter().map(to_sql_value));
            }
        }
    }

    if let Some((field, direction)) = &query.order_by {
        sql.push_str(&format!(" ORDER BY {} {}", field_expr(field)?, direction.as_sql()));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let conn = pool.get()?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds.iter()), row_to_raw)?;
    let docs = rows
        .map(|r| raw_to_document(r?))
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok(docs)
}

/// Apply every op inside one transaction; any failure rolls the whole batch back.
pub fn apply_batch(pool: &DbPool, collection: &str, ops: &[WriteOp]) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    for op in ops {
        match op {
            WriteOp::Merge { id, fields } => {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let mut merged = match existing {
                    Some(raw) => parse_fields(&raw)?,
                    None => {
                        return Err(AppError::NotFound(format!("Document {collection}/{id}")));
                    }
                };
                merged.extend(fields.clone());
                tx.execute(
                    "UPDATE documents SET data = ?1, updated_at = ?2
                     WHERE collection = ?3 AND id = ?4",
                    params![Value::Object(merged).to_string(), now, collection, id],
                )?;
            }
            WriteOp::Set { id, fields } => {
                tx.execute(
                    "INSERT INTO documents (collection, id, data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(collection, id) DO UPDATE
                     SET data = excluded.data, updated_at = excluded.updated_at",
                    params![collection, id, Value::Object(fields.clone()).to_string(), now],
                )?;
            }
            WriteOp::Delete { id } => {
                tx.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

pub fn insert(pool: &DbPool, collection: &str, id: &str, fields: &Fields) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO documents (collection, id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![collection, id, Value::Object(fields.clone()).to_string(), now],
    )?;
    Ok(())
}

pub fn index_exists(pool: &DbPool, name: &str) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Create an expression index over `(collection, json_extract(field)...)`.
pub fn create_index(pool: &DbPool, spec: &IndexSpec) -> Result<(), AppError> {
    validate_field_name(&spec.collection)?;
    if spec.fields.is_empty() {
        return Err(AppError::Validation("Index needs at least one field".into()));
    }
    let mut columns = vec!["collection".to_string()];
    for (field, direction) in &spec.fields {
        columns.push(format!("{} {}", field_expr(field)?, direction.as_sql()));
    }
    let sql = format!(
        "CREATE INDEX IF NOT EXISTS {} ON documents({})",
        spec.name(),
        columns.join(", ")
    );
    let conn = pool.get()?;
    conn.execute_batch(&sql)?;
    tracing::info!(index = %spec.name(), "Created document index");
    Ok(())
}

/// Query plan detail lines SQLite reports for `query`, joined with "; ".
pub fn query_plan(pool: &DbPool, collection: &str, query: &Query) -> Result<String, AppError> {
    let mut sql = String::from("EXPLAIN QUERY PLAN SELECT id FROM documents WHERE collection = ?");
    let mut binds: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];
    for filter in &query.filters {
        if let Filter::Eq { field, value } = filter {
            sql.push_str(&format!(" AND {} = ?", field_expr(field)?));
            binds.push(to_sql_value(value));
        }
    }
    if let Some((field, direction)) = &query.order_by {
        sql.push_str(&format!(" ORDER BY {} {}", field_expr(field)?, direction.as_sql()));
    }

    let conn = pool.get()?;
    let mut stmt = conn.prepare(&sql)?;
    let details = stmt
        .query_map(params_from_iter(binds.iter()), |row| row.get::<_, String>("detail"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(details.join("; "))
}
