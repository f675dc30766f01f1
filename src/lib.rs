//! # edgequake-pdfconv
//!
//! A small HTTP service that turns uploaded PDFs into text, images or
//! metadata by driving the poppler command-line tools.
//!
//! ## Request Overview
//!
//! ```text
//! POST /convert/:mode
//!  │
//!  ├─ 1. Validate  mode enabled? options in range? (nothing touches disk)
//!  ├─ 2. Read      raw body or multipart `file` field, size-limited
//!  ├─ 3. Stage     random-named temp file in the scratch directory
//!  ├─ 4. Invoke    pdftotext / pdftoppm / pdfinfo under a time budget
//!  ├─ 5. Encode    text, image bytes, base64 pages or metadata JSON
//!  └─ 6. Respond   temp file and tool outputs removed on every path
//! ```
//!
//! ## Modes
//!
//! | Mode | Tool | Response |
//! |------|------|----------|
//! | `text`  | `pdftotext` | `text/plain; charset=utf-8` |
//! | `image` | `pdftoppm`  | `image/png` or `image/jpeg` (one page) |
//! | `pages` | `pdftoppm`  | JSON array of base64 page images |
//! | `info`  | `pdfinfo`   | JSON document metadata |
//!
//! PNG and JPEG uploads are accepted as one-page documents by `image` and
//! `pages`; they are re-encoded in-process and never reach poppler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfconv::{serve, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServerConfig::builder().port(8080).build()?);
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
//!     serve(listener, config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfconvd` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod server;

#[cfg(all(test, unix))]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionMode, ConversionOptions, ImageFormat, PageRange, ServerConfig, ServerConfigBuilder,
    ToolPaths, MAX_DPI, MIN_DPI,
};
pub use convert::{ConversionRequest, Converter, ToolCheck};
pub use error::ConvertError;
pub use output::{
    ConversionPayload, ConversionResult, DocumentMetadata, PageImage, RenderedPages, ToolFailure,
};
pub use server::{router, serve, AppState, ErrorBody, HealthResponse, REQUEST_ID_HEADER};
