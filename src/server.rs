//! HTTP surface: router, request lifecycle, error → response mapping.
//!
//! ## Routes
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/convert/:mode` | Upload a PDF, get the converted result |
//! | `GET`  | `/health` | Liveness and enabled modes |
//!
//! The upload is either the raw body (`application/pdf`, `image/png`,
//! `image/jpeg` or `application/octet-stream`) or a `multipart/form-data` form
//! with a `file` field. Query parameters map onto [`ConversionOptions`].
//!
//! PNG and JPEG uploads are treated as one-page documents: `image` and `pages`
//! serve them directly without staging or spawning a tool. In a multipart
//! form the file name's extension decides; unknown extensions are a 415.
//!
//! ## Lifecycle
//!
//! Every request moves forward through [`RequestPhase`]:
//! `Received → Staged → Converting → Responded`. Mode and options are
//! validated while `Received`, before the body is read, so bad requests never
//! touch the disk. Conversion runs on its own task which owns the staged file:
//! if the client disconnects the task still finishes, reaps the tool process
//! and deletes the file. A panic inside that task becomes a 500.

use crate::config::{ConversionOptions, ImageFormat, ServerConfig};
use crate::convert::{ConversionRequest, Converter};
use crate::error::ConvertError;
use crate::output::ConversionPayload;
use crate::pipeline::staging;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Room for multipart boundaries and part headers on top of the upload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    converter: Arc<Converter>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            converter: Arc::new(Converter::new(config)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        self.converter.config()
    }
}

/// Build the application router.
pub fn router(config: Arc<ServerConfig>) -> Router {
    let body_limit = config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let cors = config.cors;

    let router = Router::new()
        .route("/health", get(health))
        .route("/convert/:mode", post(convert_document))
        .with_state(AppState::new(config))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http());

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Serve `router(config)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(
            "Serving on http://{addr} (modes: {}, scratch: {})",
            config.enabled_modes_label(),
            config.scratch_dir.display()
        );
    }
    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Lifecycle ────────────────────────────────────────────────────────────

/// Where a request is in its single pass through the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPhase {
    Received,
    Staged,
    Converting,
    Responded,
}

/// Forward-only phase tracker; no phase can be re-entered.
#[derive(Debug)]
pub struct RequestLifecycle {
    phase: RequestPhase,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self {
            phase: RequestPhase::Received,
        }
    }
}

impl RequestLifecycle {
    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn advance(&mut self, next: RequestPhase) -> Result<(), ConvertError> {
        if next <= self.phase {
            return Err(ConvertError::Internal(format!(
                "illegal request transition {:?} → {:?}",
                self.phase, next
            )));
        }
        debug!("request phase {:?} → {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub modes: Vec<String>,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        modes: state
            .config()
            .enabled_modes
            .iter()
            .map(|m| m.to_string())
            .collect(),
    })
}

/// POST /convert/:mode
async fn convert_document(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    query: Result<Query<ConversionOptions>, QueryRejection>,
    request: Request,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("convert", %request_id, mode = %mode);

    let mut lifecycle = RequestLifecycle::default();
    let result = handle_conversion(&state, &mode, query, request, &mut lifecycle)
        .instrument(span.clone())
        .await
        .and_then(|payload| {
            let content_type = payload.content_type();
            let body = payload.into_body()?;
            Ok((content_type, body))
        });

    let mut response = match result {
        Ok((content_type, body)) => {
            span.in_scope(|| debug!("responding with {} bytes of {content_type}", body.len()));
            ([(CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => span.in_scope(|| e.into_response()),
    };
    span.in_scope(|| {
        if let Err(e) = lifecycle.advance(RequestPhase::Responded) {
            warn!("{e}");
        }
        info!(status = response.status().as_u16(), "request finished");
    });

    if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), v);
    }
    response
}

async fn handle_conversion(
    state: &AppState,
    mode: &str,
    query: Result<Query<ConversionOptions>, QueryRejection>,
    request: Request,
    lifecycle: &mut RequestLifecycle,
) -> Result<ConversionPayload, ConvertError> {
    let config = state.config();

    // ── Received: validate before reading the body ───────────────────────
    let Query(options) = query.map_err(|e| ConvertError::invalid(e.body_text()))?;
    let job = ConversionRequest::new(config, mode, &options)?;
    let upload = match read_upload(request, config.max_upload_bytes).await? {
        Upload::Pdf(bytes) => bytes,
        // Pictures never reach poppler, so there is nothing to stage.
        Upload::Image { format, bytes } => {
            lifecycle.advance(RequestPhase::Converting)?;
            let result = state.converter.convert_image(bytes, format, &job).await?;
            return result.into_result();
        }
    };

    // ── Staged ───────────────────────────────────────────────────────────
    let staged = staging::stage_upload(config.scratch_dir.clone(), upload).await?;
    lifecycle.advance(RequestPhase::Staged)?;

    // ── Converting: the task owns the staged file ───────────────────────
    lifecycle.advance(RequestPhase::Converting)?;
    let converter = Arc::clone(&state.converter);
    let task = tokio::spawn(
        async move {
            let result = converter.convert(staged.path(), &job).await;
            drop(staged);
            result
        }
        .in_current_span(),
    );

    let result = task
        .await
        .map_err(|e| ConvertError::Internal(format!("Conversion task failed: {e}")))??;
    result.into_result()
}

/// A validated upload: a PDF for poppler, or a picture handled in-process.
#[derive(Debug)]
enum Upload {
    Pdf(Bytes),
    Image { format: ImageFormat, bytes: Bytes },
}

/// What the request declared about its upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    Pdf,
    Image(ImageFormat),
    /// No usable hint; decided from the leading bytes.
    Unknown,
}

impl Upload {
    fn new(bytes: Bytes, declared: Declared) -> Self {
        match declared {
            Declared::Pdf => Upload::Pdf(bytes),
            Declared::Image(format) => Upload::Image { format, bytes },
            Declared::Unknown => match ImageFormat::sniff(&bytes) {
                Some(format) => Upload::Image { format, bytes },
                None => Upload::Pdf(bytes),
            },
        }
    }
}

/// Pull the document out of the request body.
async fn read_upload(request: Request, limit: usize) -> Result<Upload, ConvertError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let essence = media_essence(&content_type);

    let (bytes, declared) = match essence.as_str() {
        "application/pdf" => (read_body(request, limit).await?, Declared::Pdf),
        "application/octet-stream" => (read_body(request, limit).await?, Declared::Unknown),
        "multipart/form-data" => {
            let multipart = Multipart::from_request(request, &())
                .await
                .map_err(|r| ConvertError::invalid(r.body_text()))?;
            read_file_field(multipart, limit).await?
        }
        other => match ImageFormat::from_mime(other) {
            Some(format) => (read_body(request, limit).await?, Declared::Image(format)),
            None => {
                return Err(ConvertError::UnsupportedMediaType {
                    content_type: if content_type.is_empty() {
                        "(none)".to_string()
                    } else {
                        content_type
                    },
                })
            }
        },
    };

    if bytes.len() > limit {
        return Err(ConvertError::PayloadTooLarge { limit_bytes: limit });
    }
    if bytes.is_empty() {
        return Err(ConvertError::invalid("Uploaded document is empty"));
    }
    Ok(Upload::new(bytes, declared))
}

async fn read_body(request: Request, limit: usize) -> Result<Bytes, ConvertError> {
    Bytes::from_request(request, &())
        .await
        .map_err(|r| body_error(r.status(), r.body_text(), limit))
}

fn media_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Find the `file` part of a multipart form.
///
/// The file name's extension decides the upload kind; anything other than
/// pdf/png/jpg/jpeg is refused before the part is read.
async fn read_file_field(
    mut multipart: Multipart,
    limit: usize,
) -> Result<(Bytes, Declared), ConvertError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e.status(), e.body_text(), limit))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if field.file_name() == Some("") {
            return Err(ConvertError::invalid("No file selected"));
        }
        let declared = declared_by_part(field.file_name(), field.content_type())?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| body_error(e.status(), e.body_text(), limit))?;
        return Ok((bytes, declared));
    }
    Err(ConvertError::invalid("No 'file' field in multipart upload"))
}

fn declared_by_part(
    file_name: Option<&str>,
    content_type: Option<&str>,
) -> Result<Declared, ConvertError> {
    if let Some((_, ext)) = file_name.and_then(|name| name.rsplit_once('.')) {
        if ext.eq_ignore_ascii_case("pdf") {
            return Ok(Declared::Pdf);
        }
        return ImageFormat::from_extension(ext)
            .map(Declared::Image)
            .ok_or_else(|| ConvertError::UnsupportedFileType {
                extension: ext.to_string(),
            });
    }
    let declared = match content_type.map(media_essence).as_deref() {
        Some("application/pdf") => Declared::Pdf,
        Some(essence) => ImageFormat::from_mime(essence).map_or(Declared::Unknown, Declared::Image),
        None => Declared::Unknown,
    };
    Ok(declared)
}

fn body_error(status: StatusCode, detail: String, limit: usize) -> ConvertError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::PayloadTooLarge { limit_bytes: limit }
    } else {
        ConvertError::invalid(format!("Failed to read upload: {detail}"))
    }
}

// ── Error responses ──────────────────────────────────────────────────────

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ConvertError {
    pub fn status(&self) -> StatusCode {
        match self {
            ConvertError::InvalidRequest { .. } | ConvertError::UnsupportedMode { .. } => {
                StatusCode::BAD_REQUEST
            }
            ConvertError::UnsupportedMediaType { .. } | ConvertError::UnsupportedFileType { .. } => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ConvertError::UnreadableImage { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ConvertError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ConvertError::ConversionFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ConvertError::ToolUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ConvertError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{self}");
        } else {
            warn!(code = self.code(), "{self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    ConvertError::Internal(format!("Handler panicked: {detail}")).into_response()
}
