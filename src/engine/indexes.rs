use serde::Serialize;

use super::perf::{matches_query, RELATIONSHIPS_COLLECTION, TEST_USERS};
use crate::error::AppError;
use crate::store::{DocumentStore, IndexSpec, IndexStatus, SortDirection};

/// Composite indexes the relationship queries depend on.
pub fn required_indexes() -> Vec<IndexSpec> {
    use SortDirection::{Asc, Desc};
    let spec = |fields: &[(&str, SortDirection)], purpose: &str| IndexSpec {
        collection: RELATIONSHIPS_COLLECTION.to_string(),
        fields: fields.iter().map(|(f, d)| (f.to_string(), *d)).collect(),
        purpose: purpose.to_string(),
    };
    vec![
        spec(
            &[
                ("userId", Asc),
                ("isMatched", Asc),
                ("isActive", Asc),
                ("lastInteraction", Desc),
            ],
            "Load user matched personas sorted by recent interaction",
        ),
        spec(
            &[("userId", Asc), ("createdAt", Desc)],
            "Load all user relationships chronologically",
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCheck {
    pub name: String,
    pub collection: String,
    pub fields: String,
    pub purpose: String,
    pub status: IndexStatus,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Rows returned by the compound probe query.
    pub probe_results: usize,
    pub probe_plan: Option<String>,
    pub indexes: Vec<IndexCheck>,
}

impl IndexReport {
    pub fn missing(&self) -> impl Iterator<Item = &IndexCheck> {
        self.indexes
            .iter()
            .filter(|c| c.status == IndexStatus::Missing && !c.created)
    }
}

/// Run the compound matches query and report each required index.
///
/// With `create_missing`, missing indexes are created and re-checked.
pub async fn check_index_requirements<S: DocumentStore + ?Sized>(
    store: &S,
    create_missing: bool,
) -> Result<IndexReport, AppError> {
    let probe = matches_query(TEST_USERS[0]).limit(10);
    let results = store.query(RELATIONSHIPS_COLLECTION, &probe).await?;
    tracing::info!(results = results.len(), "Compound query executed");

    let mut indexes = Vec::new();
    for spec in required_indexes() {
        let mut status = store.index_status(&spec).await?;
        let mut created = false;
        if status == IndexStatus::Missing && create_missing {
            store.create_index(&spec).await?;
            status = store.index_status(&spec).await?;
            created = status == IndexStatus::Present;
            tracing::info!(index = %spec.name(), "Created index");
        }
        if status == IndexStatus::Missing {
            tracing::warn!(
                index = %spec.name(),
                fields = %spec.describe_fields(),
                "Required index is missing"
            );
        }
        indexes.push(IndexCheck {
            name: spec.name(),
            collection: spec.collection.clone(),
            fields: spec.describe_fields(),
            purpose: spec.purpose.clone(),
            status,
            created,
        });
    }

    // Explain after creation so the plan reflects the final index set.
    let probe_plan = store.explain(RELATIONSHIPS_COLLECTION, &probe).await?;
    if let Some(plan) = &probe_plan {
        tracing::debug!(plan = %plan, "Compound query plan");
    }

    Ok(IndexReport {
        probe_results: results.len(),
        probe_plan,
        indexes,
    })
}
