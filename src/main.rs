use admin_lib::cli::{self, Invocation};
use admin_lib::config::AppConfig;
use admin_lib::logging;
use admin_lib::store::{DocumentStore, SqliteStore};

#[tokio::main]
async fn main() {
    // Initialize Sentry before anything else so panics during startup are captured.
    let _sentry_guard = sentry::init(logging::sentry_options());

    let command = match cli::parse(std::env::args_os()) {
        Invocation::Run(command) => command,
        Invocation::Usage(text) => {
            println!("{text}");
            return;
        }
    };

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            logging::init(Default::default());
            tracing::error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(config.log_format);

    let store = match SqliteStore::open(&config.database_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(path = %config.database_path.display(), "Failed to open store: {}", e);
            return;
        }
    };

    if let Err(e) = cli::run(&store, &config, command).await {
        cli::log_failure(&e);
    }

    if let Err(e) = store.close().await {
        tracing::warn!("Failed to close store: {}", e);
    }
    // Exit status stays 0 even when the command failed.
}
