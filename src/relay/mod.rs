//! Authenticated multipart upload relay.
//!
//! Answers on every path. `POST` uploads a `file` to `path` in the object store
//! and returns its public URL; `OPTIONS` answers CORS preflights.

pub mod object_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::RelayConfig;
use crate::error::AppError;
use object_store::{validate_key, ObjectMetadata, ObjectStore};

pub use object_store::{FsObjectStore, MemoryObjectStore};

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";
const MISSING_FIELDS: &str = "Missing file or path";

/// Shared state for the relay HTTP server.
pub struct RelayState {
    api_key: String,
    public_base: String,
    default_bucket: String,
    max_upload_bytes: usize,
    objects: Arc<dyn ObjectStore>,
}

impl RelayState {
    pub fn new(
        api_key: impl Into<String>,
        public_base: impl Into<String>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let public_base: String = public_base.into();
        Self {
            api_key: api_key.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
            default_bucket: crate::config::DEFAULT_BUCKET.to_string(),
            max_upload_bytes: 25 * 1024 * 1024,
            objects,
        }
    }

    /// Fails when no API key or public URL base is configured.
    pub fn from_config(config: &RelayConfig, objects: Arc<dyn ObjectStore>) -> Result<Self, AppError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Config("UPLOAD_API_KEY must be set to run the relay".into()))?;
        let mut state = Self::new(api_key, config.public_base()?, objects);
        state.default_bucket = config.default_bucket.clone();
        state.max_upload_bytes = config.max_upload_bytes;
        Ok(state)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket, path)
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    success: bool,
    url: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct UploadFailure {
    error: &'static str,
    details: String,
}

pub fn router(state: RelayState) -> Router {
    let limit = state.max_upload_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .fallback(handle_request)
        .with_state(Arc::new(state))
        .layer(DefaultBodyLimit::max(limit))
        .layer(cors)
        .layer(middleware::map_response(apply_cors_headers))
}

/// Serve on `listener` until `shutdown_rx` changes.
pub async fn serve(
    listener: TcpListener,
    state: RelayState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let addr = listener.local_addr()?;
    tracing::info!(
        backend = state.objects.backend_name(),
        "Upload relay listening on http://{}",
        addr
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Upload relay shutting down");
        })
        .await?;
    Ok(())
}

/// Every response carries the same CORS header set, preflight or not.
async fn apply_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}

async fn handle_request(State(state): State<Arc<RelayState>>, req: Request) -> Response {
    match *req.method() {
        Method::OPTIONS => return StatusCode::OK.into_response(),
        Method::POST => {}
        _ => return error_response(AppError::UnsupportedMethod(req.method().to_string())),
    }

    if !is_authorized(req.headers(), &state.api_key) {
        tracing::warn!("Rejected upload with missing or invalid bearer token");
        return error_response(AppError::Auth("invalid bearer token".into()));
    }

    match upload(&state, req).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

fn is_authorized(headers: &HeaderMap, api_key: &str) -> bool {
    let expected = format!("Bearer {api_key}");
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

fn error_response(err: AppError) -> Response {
    match err {
        AppError::UnsupportedMethod(_) => {
            (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
        }
        AppError::Auth(_) => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
        AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        other => {
            tracing::error!("Upload error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadFailure {
                    error: "Upload failed",
                    details: other.to_string(),
                }),
            )
                .into_response()
        }
    }
}

struct UploadFile {
    body: Bytes,
    file_name: String,
    content_type: Option<String>,
}

#[derive(Default)]
struct UploadForm {
    file: Option<UploadFile>,
    path: Option<String>,
    bucket: Option<String>,
}

async fn read_form(state: &Arc<RelayState>, req: Request) -> Result<UploadForm, AppError> {
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| AppError::Internal(format!("Invalid form data: {e}")))?;

    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Internal(format!("Invalid form data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let read_err = |e: axum::extract::multipart::MultipartError| {
            AppError::Internal(format!("Failed to read field '{name}': {e}"))
        };
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let body = field.bytes().await.map_err(read_err)?;
                form.file = Some(UploadFile {
                    body,
                    file_name,
                    content_type,
                });
            }
            "path" => form.path = Some(field.text().await.map_err(read_err)?),
            "bucket" => form.bucket = Some(field.text().await.map_err(read_err)?),
            _ => {}
        }
    }
    Ok(form)
}

fn resolve_content_type(declared: Option<&str>) -> &str {
    declared
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

async fn upload(state: &Arc<RelayState>, req: Request) -> Result<UploadResponse, AppError> {
    let form = read_form(state, req).await?;

    let (file, path) = match (form.file, form.path.filter(|p| !p.is_empty())) {
        (Some(file), Some(path)) => (file, path),
        _ => return Err(AppError::Validation(MISSING_FIELDS.into())),
    };
    validate_key(&path)?;
    let bucket = form
        .bucket
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| state.default_bucket.clone());

    let metadata = ObjectMetadata {
        content_type: resolve_content_type(file.content_type.as_deref()).to_string(),
        custom: BTreeMap::from([
            ("uploadedAt".to_string(), chrono::Utc::now().to_rfc3339()),
            ("originalName".to_string(), file.file_name),
        ]),
    };

    let stored = state.objects.put(&path, file.body, metadata).await?;
    tracing::info!(
        path = %stored.key,
        bucket = %bucket,
        size = stored.size,
        etag = %stored.etag,
        "Stored upload"
    );

    Ok(UploadResponse {
        success: true,
        url: state.public_url(&bucket, &path),
        path,
    })
}
