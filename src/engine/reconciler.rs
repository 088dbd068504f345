//! Batched upsert-with-skip reconciliation for persona traits.
//!
//! Every record that lacks `mbti` or `gender` gets the missing value derived
//! and written back as a merge patch. Records that already carry both are left
//! untouched. Writes go through `BatchWriter`, so atomicity holds per batch.

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;

use super::batch::BatchWriter;
use super::derivation::{derive_categorical_trait, derive_gender_trait};
use crate::db::models::{PersonaRecord, TraitSample, FIELD_GENDER, FIELD_MBTI, FIELD_UPDATED_AT};
use crate::error::AppError;
use crate::store::{DocumentStore, Fields, WriteOp, DEFAULT_BATCH_CEILING};

pub const DEFAULT_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStatus {
    /// The collection had no records.
    Empty,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub status: ReconcileStatus,
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub batches_committed: usize,
    /// Read-back of the first `sample_size` records in fetch order. Records that
    /// vanished or failed to read are left out, so this may be shorter.
    pub sample: Vec<TraitSample>,
}

impl ReconcileReport {
    fn empty() -> Self {
        Self {
            status: ReconcileStatus::Empty,
            processed: 0,
            updated: 0,
            skipped: 0,
            batches_committed: 0,
            sample: Vec::new(),
        }
    }
}

pub struct BulkReconciler<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    batch_limit: usize,
    sample_size: usize,
}

impl<'a, S: DocumentStore + ?Sized> BulkReconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_limit: DEFAULT_BATCH_CEILING,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }

    /// Reconcile `collection` with an entropy-seeded RNG.
    pub async fn reconcile(&self, collection: &str) -> Result<ReconcileReport, AppError> {
        let mut rng = StdRng::from_entropy();
        self.reconcile_with_rng(collection, &mut rng).await
    }

    pub async fn reconcile_with_rng<R: Rng + Send + ?Sized>(
        &self,
        collection: &str,
        rng: &mut R,
    ) -> Result<ReconcileReport, AppError> {
        let docs = self.store.fetch_all(collection).await.map_err(|e| match e {
            AppError::StoreUnavailable(_) => e,
            other => AppError::StoreUnavailable(other.to_string()),
        })?;

        if docs.is_empty() {
            tracing::info!(collection, "No records to reconcile");
            return Ok(ReconcileReport::empty());
        }

        let processed = docs.len();
        tracing::info!(
            collection,
            backend = self.store.backend_name(),
            records = processed,
            "Starting trait reconciliation"
        );

        let mut writer = BatchWriter::new(self.store, collection, self.batch_limit)?;
        let mut updated = 0usize;
        let mut skipped = 0usize;

        for doc in &docs {
            let record = PersonaRecord::from_document(doc);
            if record.has_all_traits() {
                tracing::debug!(id = %record.id, name = %record.label(), "Traits already set, skipping");
                skipped += 1;
                continue;
            }

            let patch = fill_missing_traits(&record, rng);
            tracing::debug!(
                id = %record.id,
                name = %record.label(),
                mbti = ?patch.get(FIELD_MBTI),
                gender = ?patch.get(FIELD_GENDER),
                "Staging trait patch"
            );
            writer
                .push(WriteOp::Merge {
                    id: record.id.clone(),
                    fields: patch,
                })
                .await?;
            updated += 1;
        }

        let summary = writer.finish().await?;

        let sample_ids: Vec<&str> = docs
            .iter()
            .take(self.sample_size)
            .map(|d| d.id.as_str())
            .collect();
        let sample = self.read_back(collection, &sample_ids).await;

        tracing::info!(
            collection,
            processed,
            updated,
            skipped,
            batches = summary.batches_committed,
            "Trait reconciliation complete"
        );

        Ok(ReconcileReport {
            status: ReconcileStatus::Completed,
            processed,
            updated,
            skipped,
            batches_committed: summary.batches_committed,
            sample,
        })
    }

    /// Fetch `ids` in parallel. Entries that fail to read are logged and left out.
    async fn read_back(&self, collection: &str, ids: &[&str]) -> Vec<TraitSample> {
        let reads = ids.iter().map(|id| self.store.get(collection, id));
        join_all(reads)
            .await
            .into_iter()
            .zip(ids)
            .filter_map(|(result, id)| match result {
                Ok(Some(doc)) => Some(TraitSample::from(&PersonaRecord::from_document(&doc))),
                Ok(None) => {
                    tracing::warn!(id = %id, "Sample record disappeared during verification");
                    None
                }
                Err(e) => {
                    tracing::warn!(id = %id, "Failed to read sample record: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Merge patch holding only the absent traits plus a fresh `updatedAt`.
fn fill_missing_traits<R: Rng + ?Sized>(record: &PersonaRecord, rng: &mut R) -> Fields {
    let mut patch = Fields::new();
    if record.mbti.is_none() {
        let mbti = derive_categorical_trait(record.personality.as_deref(), rng);
        patch.insert(FIELD_MBTI.into(), Value::from(mbti));
    }
    if record.gender.is_none() {
        let gender = derive_gender_trait(record.name.as_deref(), rng);
        patch.insert(FIELD_GENDER.into(), Value::from(gender.as_str()));
    }
    patch.insert(
        FIELD_UPDATED_AT.into(),
        Value::from(chrono::Utc::now().to_rfc3339()),
    );
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use serde_json::json;

    const COLLECTION: &str = "personas";

    fn fields(v: Value) -> Fields {
        v.as_object().unwrap().clone()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn seed_missing(store: &MemoryStore, count: usize) {
        for i in 0..count {
            store.insert(
                COLLECTION,
                &format!("p_{i:04}"),
                fields(json!({ "name": format!("페르소나 {i}"), "personality": "조용한 성격" })),
            );
        }
    }

    #[tokio::test]
    async fn test_empty_collection_reports_empty() {
        let store = MemoryStore::new();
        let report = BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();
        assert_eq!(report, ReconcileReport::empty());
        assert!(store.commit_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_skip_counts() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store.insert(
                COLLECTION,
                &format!("full_{i}"),
                fields(json!({ "name": "민수", "mbti": "ISTJ", "gender": "male" })),
            );
        }
        store.insert(COLLECTION, "m1", fields(json!({ "name": "지영" })));
        store.insert(COLLECTION, "m2", fields(json!({ "mbti": "INTJ" })));
        store.insert(COLLECTION, "m3", fields(json!({ "gender": "female" })));
        store.insert(COLLECTION, "m4", fields(json!({ "mbti": "", "gender": null })));
        store.insert(COLLECTION, "m5", fields(json!({ "mbti": 0, "gender": false })));
        store.insert(COLLECTION, "m6", fields(json!({ "personality": "분석적" })));

        let report = BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();

        assert_eq!(report.status, ReconcileStatus::Completed);
        assert_eq!(report.processed, 10);
        assert_eq!(report.updated, 6);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.batches_committed, 1);
        assert_eq!(store.commit_sizes(), vec![6]);
        assert_eq!(report.sample.len(), 5);
    }

    #[tokio::test]
    async fn test_non_string_traits_are_left_alone() {
        let store = MemoryStore::new();
        store.insert(
            COLLECTION,
            "p1",
            fields(json!({ "name": "지영", "mbti": 7, "gender": { "v": "female" } })),
        );

        let report = BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();

        assert_eq!(report.updated, 0);
        assert_eq!(report.skipped, 1);
        assert!(store.commit_sizes().is_empty());
        let doc = store.get(COLLECTION, "p1").await.unwrap().unwrap();
        assert_eq!(doc.fields["mbti"], json!(7));
        assert_eq!(doc.fields["gender"], json!({ "v": "female" }));
        assert!(!doc.fields.contains_key("updatedAt"));
    }

    #[tokio::test]
    async fn test_fill_is_non_destructive() {
        let store = MemoryStore::new();
        store.insert(
            COLLECTION,
            "p1",
            fields(json!({ "name": "김수진", "mbti": "XXXX", "age": 24 })),
        );

        BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();

        let doc = store.get(COLLECTION, "p1").await.unwrap().unwrap();
        assert_eq!(doc.fields["mbti"], "XXXX");
        assert_eq!(doc.fields["gender"], "female");
        assert_eq!(doc.fields["name"], "김수진");
        assert_eq!(doc.fields["age"], 24);
        let stamp = doc.fields["updatedAt"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let store = MemoryStore::new();
        seed_missing(&store, 7);
        let reconciler = BulkReconciler::new(&store);

        let first = reconciler.reconcile_with_rng(COLLECTION, &mut rng()).await.unwrap();
        assert_eq!(first.updated, 7);
        let snapshot = store.fetch_all(COLLECTION).await.unwrap();

        store.reset_commit_log();
        let second = reconciler.reconcile_with_rng(COLLECTION, &mut rng()).await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 7);
        assert_eq!(second.batches_committed, 0);
        assert!(store.commit_sizes().is_empty());
        assert_eq!(store.fetch_all(COLLECTION).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_large_collection_is_chunked() {
        let store = MemoryStore::new();
        seed_missing(&store, 1200);

        let report = BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();

        assert_eq!(store.commit_sizes(), vec![500, 500, 200]);
        assert_eq!(report.updated, 1200);
        assert_eq!(report.batches_committed, 3);
    }

    #[tokio::test]
    async fn test_configured_limit_is_respected() {
        let store = MemoryStore::new();
        seed_missing(&store, 25);

        let report = BulkReconciler::new(&store)
            .with_batch_limit(10)
            .with_sample_size(2)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();
        assert_eq!(store.commit_sizes(), vec![10, 10, 5]);
        assert_eq!(report.sample.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_commit_failure_keeps_earlier_batches() {
        let store = MemoryStore::new();
        seed_missing(&store, 1200);
        store.fail_commit_at(2);

        let err = BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap_err();

        match err {
            AppError::PartialCommitFailure { batches_committed, records_updated, .. } => {
                assert_eq!(batches_committed, 1);
                assert_eq!(records_updated, 500);
            }
            other => panic!("expected PartialCommitFailure, got {other:?}"),
        }

        let docs = store.fetch_all(COLLECTION).await.unwrap();
        let filled = docs.iter().filter(|d| d.present_str("mbti").is_some()).count();
        assert_eq!(filled, 500);
        // Store order is id order, so the tail past the first batch was never written.
        assert!(docs[500..].iter().all(|d| !d.fields.contains_key("updatedAt")));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_store_unavailable() {
        let store = MemoryStore::new();
        store.fail_reads(true);
        let err = BulkReconciler::new(&store)
            .reconcile(COLLECTION)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_sample_omits_records_that_cannot_be_read() {
        let store = MemoryStore::new();
        seed_missing(&store, 2);
        let reconciler = BulkReconciler::new(&store);

        let sample = reconciler
            .read_back(COLLECTION, &["p_0000", "gone", "p_0001"])
            .await;
        let ids: Vec<&str> = sample.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["p_0000", "p_0001"]);

        store.fail_reads(true);
        assert!(reconciler.read_back(COLLECTION, &["p_0000"]).await.is_empty());
    }

    #[tokio::test]
    async fn test_seeded_runs_derive_identical_traits() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        seed_missing(&a, 20);
        seed_missing(&b, 20);

        BulkReconciler::new(&a).reconcile_with_rng(COLLECTION, &mut rng()).await.unwrap();
        BulkReconciler::new(&b).reconcile_with_rng(COLLECTION, &mut rng()).await.unwrap();

        let traits = |docs: Vec<crate::store::Document>| -> Vec<(Value, Value)> {
            docs.into_iter()
                .map(|d| (d.fields["mbti"].clone(), d.fields["gender"].clone()))
                .collect()
        };
        assert_eq!(
            traits(a.fetch_all(COLLECTION).await.unwrap()),
            traits(b.fetch_all(COLLECTION).await.unwrap())
        );
    }

    #[tokio::test]
    async fn test_reconcile_against_sqlite() {
        let store = SqliteStore::from_pool(crate::db::init_test_db().unwrap());
        store
            .add(COLLECTION, fields(json!({ "name": "박지훈", "personality": "논리적인 사람" })))
            .await
            .unwrap();
        store
            .add(COLLECTION, fields(json!({ "name": "이하은", "mbti": "ENFP", "gender": "female" })))
            .await
            .unwrap();

        let report = BulkReconciler::new(&store)
            .reconcile_with_rng(COLLECTION, &mut rng())
            .await
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 1);

        let docs = store.fetch_all(COLLECTION).await.unwrap();
        let jihoon = docs.iter().find(|d| d.fields["name"] == "박지훈").unwrap();
        assert_eq!(jihoon.fields["gender"], "male");
        let mbti = jihoon.present_str("mbti").unwrap();
        assert!(["INTJ", "INTP", "ENTJ", "ENTP"].contains(&mbti));
    }
}
