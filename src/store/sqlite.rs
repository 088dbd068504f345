use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    check_batch_size, Document, DocumentStore, Fields, IndexSpec, IndexStatus, Query, WriteOp,
    DEFAULT_BATCH_CEILING,
};
use crate::db::repos::documents as doc_repo;
use crate::db::{self, DbPool};
use crate::error::AppError;

/// `DocumentStore` backed by a SQLite file through an r2d2 pool.
///
/// Each `batch_write` runs in one transaction. Blocking SQLite calls run on
/// tokio's blocking pool.
pub struct SqliteStore {
    pool: RwLock<Option<DbPool>>,
    ceiling: usize,
}

impl SqliteStore {
    /// Open the database file, creating and migrating it if needed.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        Ok(Self::from_pool(db::init_db(path)?))
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
            ceiling: DEFAULT_BATCH_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    fn pool(&self) -> Result<DbPool, AppError> {
        self.pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AppError::StoreUnavailable("sqlite store is closed".into()))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(DbPool) -> Result<T, AppError> + Send + 'static,
    {
        let pool = self.pool()?;
        tokio::task::spawn_blocking(move || f(pool))
            .await
            .map_err(|e| AppError::Internal(format!("Blocking database task failed: {e}")))?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn max_batch_size(&self) -> usize {
        self.ceiling
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, AppError> {
        let collection = collection.to_string();
        self.blocking(move |pool| doc_repo::get_all(&pool, &collection))
            .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |pool| doc_repo::get_by_id(&pool, &collection, &id))
            .await
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, AppError> {
        let collection = collection.to_string();
        let query = query.clone();
        self.blocking(move |pool| doc_repo::query(&pool, &collection, &query))
            .await
    }

    async fn batch_write(&self, collection: &str, ops: Vec<WriteOp>) -> Result<(), AppError> {
        check_batch_size(ops.len(), self.ceiling)?;
        let collection = collection.to_string();
        self.blocking(move |pool| doc_repo::apply_batch(&pool, &collection, &ops))
            .await
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
        let collection = collection.to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let new_id = id.clone();
        self.blocking(move |pool| doc_repo::insert(&pool, &collection, &new_id, &fields))
            .await?;
        Ok(id)
    }

    async fn index_status(&self, spec: &IndexSpec) -> Result<IndexStatus, AppError> {
        let name = spec.name();
        let exists = self
            .blocking(move |pool| doc_repo::index_exists(&pool, &name))
            .await?;
        Ok(if exists {
            IndexStatus::Present
        } else {
            IndexStatus::Missing
        })
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), AppError> {
        let spec = spec.clone();
        self.blocking(move |pool| doc_repo::create_index(&pool, &spec))
            .await
    }

    async fn explain(&self, collection: &str, query: &Query) -> Result<Option<String>, AppError> {
        let collection = collection.to_string();
        let query = query.clone();
        self.blocking(move |pool| doc_repo::query_plan(&pool, &collection, &query))
            .await
            .map(Some)
    }

    async fn close(&self) -> Result<(), AppError> {
        let taken = self
            .pool
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if taken.is_some() {
            tracing::debug!("SQLite store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::from_pool(init_test_db().unwrap())
    }

    #[tokio::test]
    async fn test_add_then_fetch() {
        let store = store();
        let fields = json!({ "name": "지훈" }).as_object().unwrap().clone();
        let id = store.add("personas", fields).await.unwrap();

        let all = store.fetch_all("personas").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].fields["name"], "지훈");
    }

    #[tokio::test]
    async fn test_batch_over_ceiling_is_rejected() {
        let store = store().with_ceiling(1);
        let ops = vec![
            WriteOp::Delete { id: "a".into() },
            WriteOp::Delete { id: "b".into() },
        ];
        assert!(matches!(
            store.batch_write("c", ops).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_close_makes_store_unavailable() {
        let store = store();
        store.close().await.unwrap();
        assert!(matches!(
            store.fetch_all("personas").await,
            Err(AppError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_index_status_round_trip() {
        let store = store();
        let spec = IndexSpec {
            collection: "rels".into(),
            fields: vec![("userId".into(), crate::store::SortDirection::Asc)],
            purpose: "test".into(),
        };
        assert_eq!(store.index_status(&spec).await.unwrap(), IndexStatus::Missing);
        store.create_index(&spec).await.unwrap();
        assert_eq!(store.index_status(&spec).await.unwrap(), IndexStatus::Present);
    }
}
