//! Size-bounded write batching.
//!
//! `BatchWriter` buffers `WriteOp`s for one collection and commits them in
//! chunks no larger than the ceiling. Atomicity holds per chunk only.

use crate::error::AppError;
use crate::store::{DocumentStore, WriteOp};

/// Totals after a successful `finish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches_committed: usize,
    pub ops_committed: usize,
}

pub struct BatchWriter<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    collection: &'a str,
    ceiling: usize,
    pending: Vec<WriteOp>,
    summary: BatchSummary,
}

impl<'a, S: DocumentStore + ?Sized> BatchWriter<'a, S> {
    /// `limit` is capped at the store's own ceiling.
    pub fn new(store: &'a S, collection: &'a str, limit: usize) -> Result<Self, AppError> {
        let ceiling = limit.min(store.max_batch_size());
        if ceiling == 0 {
            return Err(AppError::Validation("Batch ceiling must be >= 1".into()));
        }
        Ok(Self {
            store,
            collection,
            ceiling,
            pending: Vec::with_capacity(ceiling),
            summary: BatchSummary::default(),
        })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Stage `op`, committing the buffer once it reaches the ceiling.
    pub async fn push(&mut self, op: WriteOp) -> Result<(), AppError> {
        self.pending.push(op);
        if self.pending.len() >= self.ceiling {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit whatever is staged. A no-op on an empty buffer.
    pub async fn flush(&mut self) -> Result<(), AppError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.ceiling));
        let size = batch.len();

        match self.store.batch_write(self.collection, batch).await {
            Ok(()) => {
                self.summary.batches_committed += 1;
                self.summary.ops_committed += size;
                tracing::debug!(
                    collection = %self.collection,
                    batch = self.summary.batches_committed,
                    size,
                    total = self.summary.ops_committed,
                    "Committed write batch"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    collection = %self.collection,
                    batches_committed = self.summary.batches_committed,
                    ops_committed = self.summary.ops_committed,
                    failed_batch_size = size,
                    "Batch commit failed: {}",
                    e
                );
                Err(AppError::PartialCommitFailure {
                    batches_committed: self.summary.batches_committed,
                    records_updated: self.summary.ops_committed,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Commit the final partial batch and return the totals.
    pub async fn finish(mut self) -> Result<BatchSummary, AppError> {
        self.flush().await?;
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fields, MemoryStore};

    fn set(i: usize) -> WriteOp {
        WriteOp::Set {
            id: format!("doc_{i:04}"),
            fields: Fields::new(),
        }
    }

    #[tokio::test]
    async fn test_chunks_at_ceiling() {
        let store = MemoryStore::new();
        let mut writer = BatchWriter::new(&store, "c", 500).unwrap();
        for i in 0..1200 {
            writer.push(set(i)).await.unwrap();
        }
        let summary = writer.finish().await.unwrap();

        assert_eq!(store.commit_sizes(), vec![500, 500, 200]);
        assert_eq!(summary.batches_committed, 3);
        assert_eq!(summary.ops_committed, 1200);
        assert_eq!(store.len("c"), 1200);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail_commit() {
        let store = MemoryStore::new();
        let mut writer = BatchWriter::new(&store, "c", 10).unwrap();
        for i in 0..20 {
            writer.push(set(i)).await.unwrap();
        }
        writer.finish().await.unwrap();
        assert_eq!(store.commit_sizes(), vec![10, 10]);
    }

    #[tokio::test]
    async fn test_limit_is_capped_by_store_ceiling() {
        let store = MemoryStore::with_ceiling(3);
        let writer = BatchWriter::new(&store, "c", 500).unwrap();
        assert_eq!(writer.ceiling(), 3);
    }

    #[tokio::test]
    async fn test_zero_ceiling_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            BatchWriter::new(&store, "c", 0),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_reports_committed_progress() {
        let store = MemoryStore::new();
        store.fail_commit_at(2);
        let mut writer = BatchWriter::new(&store, "c", 5).unwrap();

        let mut result = Ok(());
        for i in 0..12 {
            result = writer.push(set(i)).await;
            if result.is_err() {
                break;
            }
        }
        match result {
            Err(AppError::PartialCommitFailure { batches_committed, records_updated, .. }) => {
                assert_eq!(batches_committed, 1);
                assert_eq!(records_updated, 5);
            }
            other => panic!("expected PartialCommitFailure, got {other:?}"),
        }
        assert_eq!(store.len("c"), 5);
    }

    #[tokio::test]
    async fn test_empty_finish_commits_nothing() {
        let store = MemoryStore::new();
        let writer = BatchWriter::new(&store, "c", 5).unwrap();
        assert_eq!(writer.finish().await.unwrap(), BatchSummary::default());
        assert!(store.commit_sizes().is_empty());
    }
}
