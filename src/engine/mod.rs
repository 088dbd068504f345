//! Maintenance operations over the persona and relationship collections.

pub mod batch;
pub mod derivation;
pub mod indexes;
pub mod perf;
pub mod personas;
pub mod reconciler;

pub use batch::{BatchSummary, BatchWriter};
pub use reconciler::{BulkReconciler, ReconcileReport, ReconcileStatus};
