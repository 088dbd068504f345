use std::sync::Arc;

use admin_lib::config::AppConfig;
use admin_lib::error::AppError;
use admin_lib::logging;
use admin_lib::relay::{self, FsObjectStore, RelayState};

#[tokio::main]
async fn main() {
    let _sentry_guard = sentry::init(logging::sentry_options());

    if let Err(e) = run().await {
        tracing::error!("Upload relay stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            logging::init(Default::default());
            return Err(e);
        }
    };
    logging::init(config.log_format);

    let objects = Arc::new(FsObjectStore::new(&config.relay.storage_root));
    tracing::info!(root = %objects.root().display(), "Object storage ready");
    let state = RelayState::from_config(&config.relay, objects)?;

    let listener = tokio::net::TcpListener::bind(config.relay.bind_addr).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    relay::serve(listener, state, shutdown_rx).await
}
