use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

/// Initialize tracing with a stdout layer and the Sentry layer.
///
/// - Stdout: compact human-readable output, or one JSON object per line
/// - Sentry: captures ERROR events as issues, WARN as breadcrumbs
/// - Default level: INFO (DEBUG for this crate), override via RUST_LOG env
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,admin_lib=debug"));

    // No-op when Sentry DSN is not configured.
    let sentry_layer = sentry_tracing::layer().event_filter(|meta| match *meta.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_layer);

    match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_target(true).json().flatten_event(true))
            .init(),
    }

    tracing::debug!(?format, "Tracing initialized");
}

/// Sentry client options shared by both binaries.
///
/// The DSN is read from `SENTRY_DSN` at runtime; without it the returned guard is a no-op.
pub fn sentry_options() -> sentry::ClientOptions {
    sentry::ClientOptions {
        dsn: std::env::var("SENTRY_DSN").ok().and_then(|s| s.parse().ok()),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        traces_sample_rate: 0.0,
        send_default_pii: false,
        before_send: Some(std::sync::Arc::new(|mut event| {
            if let Some(ref mut request) = event.request {
                // Upload bodies and bearer tokens never leave the process.
                request.data = None;
                request.headers.remove("authorization");
            }
            Some(event)
        })),
        ..Default::default()
    }
}
