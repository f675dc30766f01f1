//! Result types produced by the converter and consumed by the HTTP layer.

use crate::config::ImageFormat;
use crate::error::ConvertError;
use serde::{Deserialize, Serialize};

/// Outcome of one tool invocation.
///
/// `Failure` means the tool itself ran and reported an error (non-zero exit,
/// no output). Host-side faults such as a missing binary or a timeout are
/// returned as `Err(ConvertError)` instead.
#[derive(Debug)]
pub enum ConversionResult {
    Success(ConversionPayload),
    Failure(ToolFailure),
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success(_))
    }

    /// Collapse into a `Result`, turning a tool failure into
    /// [`ConvertError::ConversionFailure`].
    pub fn into_result(self) -> Result<ConversionPayload, ConvertError> {
        match self {
            ConversionResult::Success(payload) => Ok(payload),
            ConversionResult::Failure(f) => Err(ConvertError::ConversionFailure {
                tool: f.tool,
                exit_code: f.exit_code,
                detail: f.diagnostic,
            }),
        }
    }
}

/// Diagnostic for a tool run that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub tool: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Trimmed stderr, or a short description when stderr was empty.
    pub diagnostic: String,
}

/// What a successful conversion produced, one variant per mode.
#[derive(Debug, Clone)]
pub enum ConversionPayload {
    Text(String),
    Image { format: ImageFormat, bytes: Vec<u8> },
    Pages(RenderedPages),
    Info(DocumentMetadata),
}

impl ConversionPayload {
    pub fn content_type(&self) -> &'static str {
        match self {
            ConversionPayload::Text(_) => "text/plain; charset=utf-8",
            ConversionPayload::Image { format, .. } => format.mime_type(),
            ConversionPayload::Pages(_) | ConversionPayload::Info(_) => "application/json",
        }
    }

    /// Serialise into the HTTP response body.
    pub fn into_body(self) -> Result<Vec<u8>, ConvertError> {
        match self {
            ConversionPayload::Text(text) => Ok(text.into_bytes()),
            ConversionPayload::Image { bytes, .. } => Ok(bytes),
            ConversionPayload::Pages(pages) => serde_json::to_vec(&pages)
                .map_err(|e| ConvertError::Internal(format!("serialise pages: {e}"))),
            ConversionPayload::Info(meta) => serde_json::to_vec(&meta)
                .map_err(|e| ConvertError::Internal(format!("serialise metadata: {e}"))),
        }
    }
}

/// Body of a `pages` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPages {
    pub page_count: usize,
    pub dpi: u32,
    pub pages: Vec<PageImage>,
}

/// One rendered page, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page: u32,
    pub mime_type: String,
    /// Pixel dimensions; absent when the image header could not be read.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Base64 (standard alphabet) image bytes.
    pub data: String,
}

/// Document metadata reported by `pdfinfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
    pub is_encrypted: bool,
    /// Page size of the first page as printed by pdfinfo, e.g. `612 x 792 pts (letter)`.
    pub page_size: Option<String>,
}
