//! Layered configuration: built-in defaults, then an optional TOML file, then
//! environment variables (after `.env` is loaded through `dotenvy`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;
use crate::engine::reconciler::DEFAULT_SAMPLE_SIZE;
use crate::store::DEFAULT_BATCH_CEILING;

/// File consulted when `PERSONAS_ADMIN_CONFIG` is unset.
const DEFAULT_CONFIG_FILE: &str = "personas-admin.toml";

pub const DEFAULT_COLLECTION: &str = "personas";
pub const DEFAULT_BUCKET: &str = "sona-personas";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Config(format!("Unknown log format '{other}'"))),
        }
    }
}

/// Settings for the upload relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Expected bearer token. The relay refuses to start without one.
    pub api_key: Option<String>,
    pub account_hash: Option<String>,
    /// Overrides the `https://pub-<account_hash>.r2.dev` public URL base.
    pub public_base_url: Option<String>,
    pub default_bucket: String,
    pub bind_addr: SocketAddr,
    pub storage_root: PathBuf,
    pub max_upload_bytes: usize,
}

impl RelayConfig {
    /// Base of the public URL an uploaded object is reachable under (no trailing slash).
    pub fn public_base(&self) -> Result<String, AppError> {
        if let Some(base) = self.public_base_url.as_deref().filter(|b| !b.trim().is_empty()) {
            return Ok(base.trim_end_matches('/').to_string());
        }
        match self.account_hash.as_deref().filter(|h| !h.trim().is_empty()) {
            Some(hash) => Ok(format!("https://pub-{}.r2.dev", hash.trim())),
            None => Err(AppError::Config(
                "Either RELAY_PUBLIC_BASE_URL or ACCOUNT_HASH must be set".into(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub collection: String,
    pub batch_limit: usize,
    pub sample_size: usize,
    pub log_format: LogFormat,
    pub relay: RelayConfig,
}

// ── File layer ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_path: Option<PathBuf>,
    collection: Option<String>,
    batch_limit: Option<usize>,
    sample_size: Option<usize>,
    log_format: Option<LogFormat>,
    #[serde(default)]
    relay: FileRelayConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRelayConfig {
    api_key: Option<String>,
    account_hash: Option<String>,
    public_base_url: Option<String>,
    default_bucket: Option<String>,
    bind_addr: Option<String>,
    storage_root: Option<PathBuf>,
    max_upload_bytes: Option<usize>,
}

impl AppConfig {
    /// Load `.env`, the TOML file (if any) and the process environment.
    pub fn load() -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {}", e);
            }
        }

        let explicit = std::env::var("PERSONAS_ADMIN_CONFIG").ok();
        let path = explicit
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => {
                tracing::debug!(path = %path.display(), "Loaded config file");
                Some(c)
            }
            // A missing default file is fine; a missing explicit file is not.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => None,
            Err(e) => {
                return Err(AppError::Config(format!(
                    "Cannot read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Self::from_sources(contents.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from optional TOML text and an environment lookup.
    pub fn from_sources<F>(toml_text: Option<&str>, env: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = match toml_text {
            Some(text) => toml::from_str(text)
                .map_err(|e| AppError::Config(format!("Invalid config file: {e}")))?,
            None => FileConfig::default(),
        };
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let database_path = env("PERSONAS_DB_PATH")
            .map(PathBuf::from)
            .or(file.database_path)
            .unwrap_or_else(default_database_path);

        let collection = env("PERSONAS_COLLECTION")
            .or(file.collection)
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());

        let batch_limit = match env("PERSONAS_BATCH_LIMIT") {
            Some(raw) => parse_number("PERSONAS_BATCH_LIMIT", &raw)?,
            None => file.batch_limit.unwrap_or(DEFAULT_BATCH_CEILING),
        };
        if batch_limit == 0 {
            return Err(AppError::Config("batch_limit must be >= 1".into()));
        }

        let sample_size = match env("PERSONAS_SAMPLE_SIZE") {
            Some(raw) => parse_number("PERSONAS_SAMPLE_SIZE", &raw)?,
            None => file.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE),
        };

        let log_format = match env("PERSONAS_LOG_FORMAT") {
            Some(raw) => LogFormat::parse(&raw)?,
            None => file.log_format.unwrap_or_default(),
        };

        let relay_file = file.relay;
        let bind_raw = env("RELAY_BIND_ADDR")
            .or(relay_file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("Invalid RELAY_BIND_ADDR '{bind_raw}': {e}")))?;

        let max_upload_bytes = match env("RELAY_MAX_UPLOAD_BYTES") {
            Some(raw) => parse_number("RELAY_MAX_UPLOAD_BYTES", &raw)?,
            None => relay_file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        let relay = RelayConfig {
            api_key: env("UPLOAD_API_KEY").or(relay_file.api_key),
            account_hash: env("ACCOUNT_HASH").or(relay_file.account_hash),
            public_base_url: env("RELAY_PUBLIC_BASE_URL").or(relay_file.public_base_url),
            default_bucket: env("RELAY_DEFAULT_BUCKET")
                .or(relay_file.default_bucket)
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            bind_addr,
            storage_root: env("RELAY_STORAGE_ROOT")
                .map(PathBuf::from)
                .or(relay_file.storage_root)
                .unwrap_or_else(|| default_data_dir().join("objects")),
            max_upload_bytes,
        };

        Ok(AppConfig {
            database_path,
            collection,
            batch_limit,
            sample_size,
            log_format,
            relay,
        })
    }
}

fn parse_number(key: &str, raw: &str) -> Result<usize, AppError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer, got '{raw}'")))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| Path::new(".").to_path_buf())
        .join("personas-admin")
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("personas.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(cfg.collection, "personas");
        assert_eq!(cfg.batch_limit, 500);
        assert_eq!(cfg.sample_size, 5);
        assert_eq!(cfg.log_format, LogFormat::Compact);
        assert_eq!(cfg.relay.default_bucket, "sona-personas");
        assert_eq!(cfg.relay.bind_addr.port(), 8787);
        assert!(cfg.relay.api_key.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let toml_text = r#"
            collection = "from_file"
            batch_limit = 100

            [relay]
            api_key = "file-key"
            default_bucket = "file-bucket"
        "#;
        let cfg = AppConfig::from_sources(
            Some(toml_text),
            env_of(&[("PERSONAS_COLLECTION", "from_env"), ("UPLOAD_API_KEY", "env-key")]),
        )
        .unwrap();
        assert_eq!(cfg.collection, "from_env");
        assert_eq!(cfg.batch_limit, 100);
        assert_eq!(cfg.relay.api_key.as_deref(), Some("env-key"));
        assert_eq!(cfg.relay.default_bucket, "file-bucket");
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let cfg = AppConfig::from_sources(None, env_of(&[("PERSONAS_COLLECTION", "  ")])).unwrap();
        assert_eq!(cfg.collection, "personas");
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = AppConfig::from_sources(None, env_of(&[("PERSONAS_BATCH_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = AppConfig::from_sources(None, env_of(&[("PERSONAS_BATCH_LIMIT", "0")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let err = AppConfig::from_sources(Some("colection = \"typo\""), env_of(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_public_base() {
        let mut cfg = AppConfig::from_sources(None, env_of(&[("ACCOUNT_HASH", "abc123")]))
            .unwrap()
            .relay;
        assert_eq!(cfg.public_base().unwrap(), "https://pub-abc123.r2.dev");

        cfg.public_base_url = Some("https://cdn.example.com/".into());
        assert_eq!(cfg.public_base().unwrap(), "https://cdn.example.com");

        cfg.public_base_url = None;
        cfg.account_hash = None;
        assert!(matches!(cfg.public_base(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_log_format_json() {
        let cfg = AppConfig::from_sources(None, env_of(&[("PERSONAS_LOG_FORMAT", "JSON")])).unwrap();
        assert_eq!(cfg.log_format, LogFormat::Json);
    }
}
