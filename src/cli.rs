//! Command surface of the `personas-admin` binary.

use clap::{CommandFactory, Parser, Subcommand};
use rand::SeedableRng;

use crate::config::AppConfig;
use crate::engine::reconciler::BulkReconciler;
use crate::engine::{indexes, perf, personas};
use crate::error::AppError;
use crate::store::DocumentStore;

#[derive(Parser, Debug)]
#[command(
    name = "personas-admin",
    version,
    about = "Maintenance tooling for the persona collection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fill missing MBTI and gender on every persona (default)
    Update,
    /// Overwrite the MBTI and gender of one persona
    Specific {
        /// Persona document id
        id: String,
        /// One of the 16 MBTI types, any case
        mbti: String,
        /// male or female
        gender: String,
    },
    /// Create the two sample personas
    Test,
    /// Relationship-collection performance tooling
    Perf {
        #[command(subcommand)]
        action: PerfAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfAction {
    /// Write the relationship test data set
    Seed,
    /// Time the direct, compound, parallel and statistics reads
    Probe,
    /// Report the composite indexes the relationship queries need
    Indexes {
        /// Create missing indexes
        #[arg(long)]
        create: bool,
    },
    /// Report document size statistics
    Analyze,
    /// Delete the relationship test data set
    Cleanup,
    /// Seed, probe, check indexes, then analyze
    All,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    Run(Command),
    /// Print this text and exit without touching the store.
    Usage(String),
}

/// Parse process arguments. Anything clap rejects turns into usage text.
pub fn parse<I, T>(args: I) -> Invocation
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Invocation::Run(cli.command.unwrap_or(Command::Update)),
        Err(e) => match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                Invocation::Usage(e.to_string())
            }
            _ => Invocation::Usage(usage()),
        },
    }
}

pub fn usage() -> String {
    Cli::command().render_help().to_string()
}

/// Execute `command` against `store`.
pub async fn run<S: DocumentStore + ?Sized>(
    store: &S,
    config: &AppConfig,
    command: Command,
) -> Result<(), AppError> {
    match command {
        Command::Update => {
            let report = BulkReconciler::new(store)
                .with_batch_limit(config.batch_limit)
                .with_sample_size(config.sample_size)
                .reconcile(&config.collection)
                .await?;
            for sample in &report.sample {
                tracing::info!(
                    id = %sample.id,
                    name = sample.name.as_deref().unwrap_or("-"),
                    mbti = sample.mbti.as_deref().unwrap_or("-"),
                    gender = sample.gender.as_deref().unwrap_or("-"),
                    "Verified persona"
                );
            }
        }
        Command::Specific { id, mbti, gender } => {
            personas::apply_trait_override(store, &config.collection, &id, &mbti, &gender).await?;
        }
        Command::Test => {
            let ids = personas::create_test_personas(store, &config.collection).await?;
            tracing::info!(count = ids.len(), "Sample personas created");
        }
        Command::Perf { action } => run_perf(store, action).await?,
    }
    Ok(())
}

/// Steps run by `perf all`, in order.
const PERF_SUITE: [PerfAction; 4] = [
    PerfAction::Seed,
    PerfAction::Probe,
    PerfAction::Indexes { create: false },
    PerfAction::Analyze,
];

async fn run_perf<S: DocumentStore + ?Sized>(store: &S, action: PerfAction) -> Result<(), AppError> {
    let steps: &[PerfAction] = match action {
        PerfAction::All => &PERF_SUITE,
        _ => std::slice::from_ref(&action),
    };
    for step in steps {
        perf_step(store, *step).await?;
    }
    Ok(())
}

async fn perf_step<S: DocumentStore + ?Sized>(store: &S, action: PerfAction) -> Result<(), AppError> {
    match action {
        PerfAction::Seed => {
            let mut rng = rand::rngs::StdRng::from_entropy();
            perf::seed_relationships(store, &mut rng).await?;
        }
        PerfAction::Probe => {
            let report = perf::run_probes(store).await?;
            tracing::info!(
                avg_parallel_read_ms = report.average_parallel_read_ms(),
                "Probe run complete"
            );
        }
        PerfAction::Indexes { create } => {
            let report = indexes::check_index_requirements(store, create).await?;
            for check in &report.indexes {
                tracing::info!(
                    index = %check.name,
                    collection = %check.collection,
                    fields = %check.fields,
                    purpose = %check.purpose,
                    status = ?check.status,
                    "Required index"
                );
            }
        }
        PerfAction::Analyze => {
            perf::analyze_collection(store, perf::RELATIONSHIPS_COLLECTION).await?;
        }
        PerfAction::Cleanup => {
            perf::cleanup_relationships(store).await?;
        }
        PerfAction::All => {}
    }
    Ok(())
}

/// Log a failed command. The process still exits 0.
pub fn log_failure(err: &AppError) {
    match err {
        AppError::PartialCommitFailure {
            batches_committed,
            records_updated,
            reason,
        } => tracing::error!(
            batches_committed,
            records_updated,
            reason = %reason,
            "Reconciliation aborted after a failed batch commit"
        ),
        other => tracing::error!(kind = other.kind(), "Command failed: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn parse_args(args: &[&str]) -> Invocation {
        parse(std::iter::once("personas-admin").chain(args.iter().copied()))
    }

    fn config() -> AppConfig {
        AppConfig::from_sources(None, |_| None).unwrap()
    }

    #[test]
    fn test_no_argument_means_update() {
        assert_eq!(parse_args(&[]), Invocation::Run(Command::Update));
        assert_eq!(parse_args(&["update"]), Invocation::Run(Command::Update));
    }

    #[test]
    fn test_specific_requires_all_arguments() {
        assert_eq!(
            parse_args(&["specific", "p1", "INTJ", "male"]),
            Invocation::Run(Command::Specific {
                id: "p1".into(),
                mbti: "INTJ".into(),
                gender: "male".into(),
            })
        );
        assert!(matches!(parse_args(&["specific", "p1"]), Invocation::Usage(_)));
    }

    #[test]
    fn test_unknown_argument_prints_usage() {
        match parse_args(&["frobnicate"]) {
            Invocation::Usage(text) => {
                assert!(text.contains("update"));
                assert!(text.contains("specific"));
                assert!(text.contains("test"));
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn test_perf_subcommands() {
        assert_eq!(
            parse_args(&["perf", "indexes", "--create"]),
            Invocation::Run(Command::Perf {
                action: PerfAction::Indexes { create: true }
            })
        );
        assert_eq!(
            parse_args(&["perf", "all"]),
            Invocation::Run(Command::Perf { action: PerfAction::All })
        );
        assert!(matches!(parse_args(&["perf"]), Invocation::Usage(_)));
    }

    #[tokio::test]
    async fn test_update_command_fills_traits() {
        let store = MemoryStore::new();
        store.insert(
            "personas",
            "p1",
            json!({ "name": "정우진" }).as_object().unwrap().clone(),
        );
        run(&store, &config(), Command::Update).await.unwrap();
        let doc = store.get("personas", "p1").await.unwrap().unwrap();
        assert_eq!(doc.fields["gender"], "male");
        assert!(doc.present_str("mbti").is_some());
    }

    #[tokio::test]
    async fn test_specific_command_surfaces_validation() {
        let store = MemoryStore::new();
        store.insert("personas", "p1", Default::default());
        let err = run(
            &store,
            &config(),
            Command::Specific {
                id: "p1".into(),
                mbti: "nope".into(),
                gender: "male".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_perf_all_then_cleanup() {
        let store = MemoryStore::new();
        run(&store, &config(), Command::Perf { action: PerfAction::All })
            .await
            .unwrap();
        assert_eq!(store.len(perf::RELATIONSHIPS_COLLECTION), 15);

        run(&store, &config(), Command::Perf { action: PerfAction::Cleanup })
            .await
            .unwrap();
        assert!(store.is_empty(perf::RELATIONSHIPS_COLLECTION));
    }
}
