//! Relationship-collection performance tooling.
//!
//! Seeds a small fixed data set of user/persona relationship documents, times
//! the read shapes the app relies on, and reports size statistics.

use std::time::Instant;

use futures_util::future::join_all;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use super::batch::BatchWriter;
use crate::error::AppError;
use crate::store::{Document, DocumentStore, Fields, Query, SortDirection, WriteOp};

pub const RELATIONSHIPS_COLLECTION: &str = "user_persona_relationships";
pub const TEST_USERS: [&str; 3] = ["test_user_1", "test_user_2", "test_user_3"];
pub const TEST_PERSONAS: [&str; 5] = [
    "persona_001",
    "persona_002",
    "persona_003",
    "persona_004",
    "persona_005",
];

const LARGE_DOC_BYTES: f64 = 1000.0;
const HIGH_FIELD_COUNT: f64 = 20.0;

/// Relationship documents are keyed `{userId}_{personaId}`.
pub fn relationship_id(user_id: &str, persona_id: &str) -> String {
    format!("{user_id}_{persona_id}")
}

/// The query the app runs to list a user's active matches, newest first.
pub fn matches_query(user_id: &str) -> Query {
    Query::new()
        .where_eq("userId", user_id)
        .where_eq("isMatched", true)
        .where_eq("isActive", true)
        .order_by("lastInteraction", SortDirection::Desc)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// ============================================================================
// Seeding
// ============================================================================

pub fn relationship_fields<R: Rng + ?Sized>(user_id: &str, persona_id: &str, rng: &mut R) -> Fields {
    let is_matched = rng.gen_bool(0.7);
    let now = chrono::Utc::now();
    let last_interaction = now - chrono::Duration::minutes(rng.gen_range(0..10_000));
    let suffix = persona_id.rsplit('_').next().unwrap_or(persona_id);
    let score: i64 = if is_matched { rng.gen_range(50..450) } else { 0 };
    let swipe_action = if is_matched { "like" } else { "pass" };

    let doc = json!({
        "userId": user_id,
        "personaId": persona_id,
        "relationshipScore": score,
        "relationshipType": "friend",
        "relationshipDisplayName": "친구",
        "isCasualSpeech": rng.gen_bool(0.3),
        "emotionalIntensity": rng.gen::<f64>(),
        "canShowJealousy": rng.gen_bool(0.5),
        "interactionCount": rng.gen_range(0..100),
        "swipeAction": swipe_action,
        "isMatched": is_matched,
        "isActive": is_matched,
        "matchedAt": now.to_rfc3339(),
        "createdAt": now.to_rfc3339(),
        "lastInteraction": last_interaction.to_rfc3339(),
        "personaName": format!("TestPersona_{suffix}"),
        "personaAge": rng.gen_range(20..40),
        "personaPhotoUrl": format!("https://example.com/photo_{persona_id}.jpg"),
        "metadata": {
            "firstMet": now.to_rfc3339(),
            "favoriteTopics": ["테스트", "성능"],
            "conversationStyle": "test",
            "preferredTime": "any",
        },
    });
    match doc {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Write one relationship document per test user and persona. Returns the count written.
pub async fn seed_relationships<S: DocumentStore + ?Sized, R: Rng + Send + ?Sized>(
    store: &S,
    rng: &mut R,
) -> Result<usize, AppError> {
    let mut writer = BatchWriter::new(store, RELATIONSHIPS_COLLECTION, store.max_batch_size())?;
    for user_id in TEST_USERS {
        for persona_id in TEST_PERSONAS {
            let fields = relationship_fields(user_id, persona_id, rng);
            writer
                .push(WriteOp::Set {
                    id: relationship_id(user_id, persona_id),
                    fields,
                })
                .await?;
        }
    }
    let summary = writer.finish().await?;
    tracing::info!(
        documents = summary.ops_committed,
        batches = summary.batches_committed,
        "Seeded relationship test data"
    );
    Ok(summary.ops_committed)
}

// ============================================================================
// Probes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipStats {
    pub total: usize,
    pub matches: usize,
    pub passes: usize,
    pub average_score: f64,
}

/// Match/pass counts and the mean score of matched documents.
pub fn relationship_stats(docs: &[Document]) -> RelationshipStats {
    let mut stats = RelationshipStats {
        total: docs.len(),
        ..Default::default()
    };
    let mut score_sum = 0.0;
    for doc in docs {
        let matched = doc.fields.get("isMatched").and_then(Value::as_bool).unwrap_or(false);
        if matched {
            stats.matches += 1;
            score_sum += doc
                .fields
                .get("relationshipScore")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
        } else {
            stats.passes += 1;
        }
    }
    if stats.matches > 0 {
        stats.average_score = score_sum / stats.matches as f64;
    }
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub direct_read_ms: f64,
    pub direct_read_found: bool,
    pub matches_query_ms: f64,
    pub matches_count: usize,
    pub parallel_read_ms: f64,
    pub parallel_docs_read: usize,
    pub stats_query_ms: f64,
    pub stats: RelationshipStats,
}

impl ProbeReport {
    pub fn average_parallel_read_ms(&self) -> f64 {
        if self.parallel_docs_read == 0 {
            0.0
        } else {
            self.parallel_read_ms / self.parallel_docs_read as f64
        }
    }
}

/// Time the four read shapes against the first test user.
pub async fn run_probes<S: DocumentStore + ?Sized>(store: &S) -> Result<ProbeReport, AppError> {
    let user = TEST_USERS[0];

    let start = Instant::now();
    let direct = store
        .get(RELATIONSHIPS_COLLECTION, &relationship_id(user, TEST_PERSONAS[0]))
        .await?;
    let direct_read_ms = elapsed_ms(start);
    tracing::info!(elapsed_ms = direct_read_ms, found = direct.is_some(), "Direct document read");

    let start = Instant::now();
    let matches = store
        .query(RELATIONSHIPS_COLLECTION, &matches_query(user))
        .await?;
    let matches_query_ms = elapsed_ms(start);
    tracing::info!(elapsed_ms = matches_query_ms, results = matches.len(), "User matches query");

    let ids: Vec<String> = TEST_PERSONAS
        .iter()
        .map(|persona| relationship_id(user, persona))
        .collect();
    let start = Instant::now();
    let reads = join_all(ids.iter().map(|id| store.get(RELATIONSHIPS_COLLECTION, id))).await;
    let parallel_read_ms = elapsed_ms(start);
    let parallel_docs_read = reads
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?
        .len();
    tracing::info!(
        elapsed_ms = parallel_read_ms,
        documents = parallel_docs_read,
        "Parallel document reads"
    );

    let start = Instant::now();
    let user_docs = store
        .query(RELATIONSHIPS_COLLECTION, &Query::new().where_eq("userId", user))
        .await?;
    let stats_query_ms = elapsed_ms(start);
    let stats = relationship_stats(&user_docs);
    tracing::info!(
        elapsed_ms = stats_query_ms,
        total = stats.total,
        matches = stats.matches,
        passes = stats.passes,
        average_score = %format!("{:.1}", stats.average_score),
        "Statistics query"
    );

    Ok(ProbeReport {
        direct_read_ms,
        direct_read_found: direct.is_some(),
        matches_query_ms,
        matches_count: matches.len(),
        parallel_read_ms,
        parallel_docs_read,
        stats_query_ms,
        stats,
    })
}

// ============================================================================
// Size analysis
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub total: usize,
    pub average_size: f64,
    pub largest: usize,
    pub average_field_count: f64,
    pub recommendations: Vec<String>,
}

/// Serialized size and field-count statistics over `docs`.
pub fn analyze_documents(docs: &[Document]) -> AnalysisReport {
    if docs.is_empty() {
        return AnalysisReport::default();
    }

    let mut total_size = 0usize;
    let mut largest = 0usize;
    let mut field_total = 0usize;
    for doc in docs {
        let size = serde_json::to_string(&doc.fields).map(|s| s.len()).unwrap_or(0);
        total_size += size;
        largest = largest.max(size);
        field_total += doc.fields.len();
    }

    let count = docs.len() as f64;
    let average_size = total_size as f64 / count;
    let average_field_count = field_total as f64 / count;

    let mut recommendations = Vec::new();
    recommendations.push(if average_size > LARGE_DOC_BYTES {
        "Large document size detected - consider field optimization".to_string()
    } else {
        "Document size is optimal".to_string()
    });
    recommendations.push(if average_field_count > HIGH_FIELD_COUNT {
        "High field count - consider data normalization".to_string()
    } else {
        "Field count is reasonable".to_string()
    });

    AnalysisReport {
        total: docs.len(),
        average_size,
        largest,
        average_field_count,
        recommendations,
    }
}

pub async fn analyze_collection<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<AnalysisReport, AppError> {
    let docs = store.fetch_all(collection).await?;
    let report = analyze_documents(&docs);
    tracing::info!(
        collection,
        total = report.total,
        average_size = %format!("{:.0}", report.average_size),
        largest = report.largest,
        average_field_count = %format!("{:.1}", report.average_field_count),
        "Document size analysis"
    );
    for recommendation in &report.recommendations {
        tracing::info!("{}", recommendation);
    }
    Ok(report)
}

// ============================================================================
// Cleanup
// ============================================================================

/// Delete every relationship document owned by a test user. Returns the count deleted.
pub async fn cleanup_relationships<S: DocumentStore + ?Sized>(store: &S) -> Result<usize, AppError> {
    let docs = store
        .query(
            RELATIONSHIPS_COLLECTION,
            &Query::new().where_in("userId", TEST_USERS),
        )
        .await?;

    let mut writer = BatchWriter::new(store, RELATIONSHIPS_COLLECTION, store.max_batch_size())?;
    for doc in docs {
        writer.push(WriteOp::Delete { id: doc.id }).await?;
    }
    let summary = writer.finish().await?;
    tracing::info!(deleted = summary.ops_committed, "Removed relationship test data");
    Ok(summary.ops_committed)
}
