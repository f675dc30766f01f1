//! Error types for the edgequake-pdfconv library.
//!
//! A single [`ConvertError`] covers every way a request can fail, grouped the
//! same way the HTTP layer reports them:
//!
//! * **Client faults**: bad payload, bad parameters, unknown or disabled
//!   mode. The converter is never invoked.
//!   Unknown file extensions and undecodable image uploads belong here too.
//! * **Conversion failures**: the poppler tool ran and reported failure
//!   (corrupt PDF, wrong page range). Carries the tool's exit code and stderr.
//! * **Environment faults**: the tool binary is missing or exceeded its time
//!   budget.
//! * **Internal faults**: staging/cleanup I/O, task panics.
//!
//! Each variant has a stable machine-readable [`ConvertError::code`] that is
//! returned to HTTP clients alongside the human-readable message.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-pdfconv library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Client errors ─────────────────────────────────────────────────────
    /// Malformed request: empty body, missing upload field, bad parameters.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The requested mode is unknown or disabled on this server.
    #[error("Unsupported conversion mode '{mode}'. Supported: {supported}")]
    UnsupportedMode { mode: String, supported: String },

    /// The request body is not a PDF or picture upload.
    #[error("Unsupported media type '{content_type}'. Send application/pdf, image/png, image/jpeg or multipart/form-data")]
    UnsupportedMediaType { content_type: String },

    /// A multipart upload whose file name is not a PDF, JPEG or PNG.
    #[error("Unsupported file type: {extension}. Please upload a PDF, JPEG, or PNG file.")]
    UnsupportedFileType { extension: String },

    /// An uploaded JPEG/PNG could not be decoded.
    #[error("Uploaded image could not be read: {reason}")]
    UnreadableImage { reason: String },

    /// The upload exceeds the configured size limit.
    #[error("Payload exceeds the {limit_bytes} byte upload limit")]
    PayloadTooLarge { limit_bytes: usize },

    // ── Tool errors ───────────────────────────────────────────────────────
    /// The tool ran but reported failure.
    #[error("{tool} failed ({}): {detail}", exit_label(.exit_code))]
    ConversionFailure {
        tool: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The tool binary could not be executed.
    #[error("Converter '{tool}' is unavailable at '{path}': {reason}\nInstall poppler-utils or set --tool-dir.")]
    ToolUnavailable {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    /// The tool did not finish within its time budget and was killed.
    #[error("{tool} timed out after {secs}s and was terminated")]
    Timeout { tool: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_string(),
    }
}

impl ConvertError {
    /// Stable error code reported to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::InvalidRequest { .. } => "invalid_request",
            ConvertError::UnsupportedMode { .. } => "unsupported_mode",
            ConvertError::UnsupportedMediaType { .. } => "unsupported_media_type",
            ConvertError::UnsupportedFileType { .. } => "unsupported_file_type",
            ConvertError::UnreadableImage { .. } => "unreadable_image",
            ConvertError::PayloadTooLarge { .. } => "payload_too_large",
            ConvertError::ConversionFailure { .. } => "conversion_failure",
            ConvertError::ToolUnavailable { .. } => "tool_unavailable",
            ConvertError::Timeout { .. } => "timeout",
            ConvertError::InvalidConfig(_) => "invalid_config",
            ConvertError::Internal(_) => "internal_error",
        }
    }

    /// True when the request itself was at fault (4xx-class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConvertError::InvalidRequest { .. }
                | ConvertError::UnsupportedMode { .. }
                | ConvertError::UnsupportedMediaType { .. }
                | ConvertError::UnsupportedFileType { .. }
                | ConvertError::UnreadableImage { .. }
                | ConvertError::PayloadTooLarge { .. }
                | ConvertError::ConversionFailure { .. }
        )
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ConvertError::InvalidRequest {
            reason: reason.into(),
        }
    }
}
