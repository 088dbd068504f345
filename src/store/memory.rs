use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{check_batch_size, Document, DocumentStore, Fields, Query, SortDirection, WriteOp};
use crate::error::AppError;

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

/// In-memory `DocumentStore` with commit bookkeeping and failure injection.
///
/// Documents are returned in id order. Every successful `batch_write` appends
/// its size to the commit log.
pub struct MemoryStore {
    collections: Mutex<Collections>,
    ceiling: usize,
    commit_log: Mutex<Vec<usize>>,
    commit_attempts: AtomicUsize,
    /// 1-based commit attempt that fails instead of applying.
    fail_commit_at: Mutex<Option<usize>>,
    fail_reads: AtomicBool,
    closed: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_ceiling(super::DEFAULT_BATCH_CEILING)
    }

    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            collections: Mutex::new(BTreeMap::new()),
            ceiling,
            commit_log: Mutex::new(Vec::new()),
            commit_attempts: AtomicUsize::new(0),
            fail_commit_at: Mutex::new(None),
            fail_reads: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert or replace a document directly, bypassing the commit log.
    pub fn insert(&self, collection: &str, id: &str, fields: Fields) {
        self.data()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Sizes of every successful `batch_write`, in order.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.commit_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reset_commit_log(&self) {
        self.commit_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.commit_attempts.store(0, AtomicOrdering::SeqCst);
    }

    /// Make the `attempt`-th commit (1-based, counted from now) fail.
    pub fn fail_commit_at(&self, attempt: usize) {
        self.commit_attempts.store(0, AtomicOrdering::SeqCst);
        *self
            .fail_commit_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(attempt);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.data().get(collection).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn data(&self) -> MutexGuard<'_, Collections> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(AppError::StoreUnavailable("memory store is closed".into()));
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<(), AppError> {
        self.ensure_open()?;
        if self.fail_reads.load(AtomicOrdering::SeqCst) {
            return Err(AppError::StoreUnavailable("injected read failure".into()));
        }
        Ok(())
    }
}

/// Total order over optional JSON values: missing/null, bools, numbers, strings, the rest.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn max_batch_size(&self) -> usize {
        self.ceiling
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, AppError> {
        self.ensure_readable()?;
        Ok(self
            .data()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
        self.ensure_readable()?;
        Ok(self
            .data()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, AppError> {
        let mut docs: Vec<Document> = self
            .fetch_all(collection)
            .await?
            .into_iter()
            .filter(|doc| query.filters.iter().all(|f| f.matches(&doc.fields)))
            .collect();

        if let Some((field, direction)) = &query.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.fields.get(field), b.fields.get(field));
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn batch_write(&self, collection: &str, ops: Vec<WriteOp>) -> Result<(), AppError> {
        self.ensure_open()?;
        check_batch_size(ops.len(), self.ceiling)?;

        let attempt = self.commit_attempts.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let fail_at = *self
            .fail_commit_at
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if fail_at == Some(attempt) {
            return Err(AppError::Internal(format!(
                "injected failure on commit #{attempt}"
            )));
        }

        let mut data = self.data();
        let docs = data.entry(collection.to_string()).or_default();

        // Validate first so a failing op leaves the batch unapplied.
        for op in &ops {
            if let WriteOp::Merge { id, .. } = op {
                if !docs.contains_key(id) {
                    return Err(AppError::NotFound(format!("Document {collection}/{id}")));
                }
            }
        }

        let size = ops.len();
        for op in ops {
            match op {
                WriteOp::Merge { id, fields } => {
                    if let Some(existing) = docs.get_mut(&id) {
                        existing.extend(fields);
                    }
                }
                WriteOp::Set { id, fields } => {
                    docs.insert(id, fields);
                }
                WriteOp::Delete { id } => {
                    docs.remove(&id);
                }
            }
        }
        drop(data);

        self.commit_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(size);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
        self.ensure_open()?;
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(collection, &id, fields);
        Ok(id)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }
}
