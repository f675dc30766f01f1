//! Configuration types for the conversion service.
//!
//! All deployment knobs live in [`ServerConfig`], built once at startup via
//! [`ServerConfigBuilder`] and shared read-only with every request handler
//! through an `Arc`. Nothing in the crate keeps process-wide mutable state.
//!
//! Per-request choices (mode, page range, resolution) are carried by
//! [`ConversionOptions`] and validated against the server config before any
//! subprocess is spawned.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the conversion service.
///
/// # Example
/// ```rust
/// use edgequake_pdfconv::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .port(8080)
///     .default_dpi(200)
///     .tool_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.socket_addr().port(), 8080);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to. Default: `0.0.0.0`.
    pub bind_addr: IpAddr,

    /// Listening port. Default: 5000.
    pub port: u16,

    /// Tokio worker threads. Default: available parallelism.
    pub workers: usize,

    /// Writable directory holding per-request temp files. Default: `$TMPDIR/pdfconv`.
    pub scratch_dir: PathBuf,

    /// Maximum accepted upload size in bytes. Default: 25 MiB.
    pub max_upload_bytes: usize,

    /// Wall-clock budget for one tool invocation, in seconds. Default: 60.
    ///
    /// The process is killed and reaped when the budget is exceeded.
    pub tool_timeout_secs: u64,

    /// Locations of the poppler binaries.
    pub tools: ToolPaths,

    /// Resolution used when the request does not specify one. Range: 72–400. Default: 150.
    pub default_dpi: u32,

    /// Upper bound on pages rendered by one `pages` request. Default: 50.
    pub max_pages: u32,

    /// Modes this deployment accepts. Default: all.
    pub enabled_modes: Vec<ConversionMode>,

    /// Attach a permissive CORS layer. Default: true.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            scratch_dir: std::env::temp_dir().join("pdfconv"),
            max_upload_bytes: 25 * 1024 * 1024,
            tool_timeout_secs: 60,
            tools: ToolPaths::default(),
            default_dpi: 150,
            max_pages: 50,
            enabled_modes: ConversionMode::ALL.to_vec(),
            cors: true,
        }
    }
}

impl ServerConfig {
    /// Create a new builder for `ServerConfig`.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn is_enabled(&self, mode: ConversionMode) -> bool {
        self.enabled_modes.contains(&mode)
    }

    /// Comma-separated list of enabled modes, for error messages and `/health`.
    pub fn enabled_modes_label(&self) -> String {
        self.enabled_modes
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse a mode name and check that this deployment accepts it.
    ///
    /// Unknown and disabled modes both yield [`ConvertError::UnsupportedMode`].
    pub fn resolve_mode(&self, name: &str) -> Result<ConversionMode, ConvertError> {
        match name.parse::<ConversionMode>() {
            Ok(mode) if self.is_enabled(mode) => Ok(mode),
            _ => Err(ConvertError::UnsupportedMode {
                mode: name.to_string(),
                supported: self.enabled_modes_label(),
            }),
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    /// Look up every poppler binary inside `dir` instead of on `PATH`.
    pub fn tool_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.tools = ToolPaths::in_dir(dir);
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn max_pages(mut self, n: u32) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn enabled_modes(mut self, modes: impl IntoIterator<Item = ConversionMode>) -> Self {
        let mut modes: Vec<ConversionMode> = modes.into_iter().collect();
        modes.sort_unstable();
        modes.dedup();
        self.config.enabled_modes = modes;
        self
    }

    pub fn cors(mut self, v: bool) -> Self {
        self.config.cors = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServerConfig, ConvertError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "Upload limit must be ≥ 1 byte".into(),
            ));
        }
        if c.tool_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Tool timeout must be ≥ 1 second".into(),
            ));
        }
        if c.enabled_modes.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "At least one conversion mode must be enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 400;

/// Paths of the poppler-utils binaries the service shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub pdftoppm: PathBuf,
    pub pdftotext: PathBuf,
    pub pdfinfo: PathBuf,
}

impl Default for ToolPaths {
    /// Bare names, resolved on `PATH` at spawn time.
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            pdftotext: PathBuf::from("pdftotext"),
            pdfinfo: PathBuf::from("pdfinfo"),
        }
    }
}

impl ToolPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            pdftoppm: dir.join("pdftoppm"),
            pdftotext: dir.join("pdftotext"),
            pdfinfo: dir.join("pdfinfo"),
        }
    }

    /// The binary that implements `mode`.
    pub fn for_mode(&self, mode: ConversionMode) -> &Path {
        match mode {
            ConversionMode::Text => &self.pdftotext,
            ConversionMode::Image | ConversionMode::Pages => &self.pdftoppm,
            ConversionMode::Info => &self.pdfinfo,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the client wants back from its PDF.
///
/// The set is closed: mode names arriving over HTTP are parsed into this enum
/// at the boundary and anything else is rejected before staging.
///
/// | Mode | Tool | Response |
/// |------|------|----------|
/// | `text`  | pdftotext | UTF-8 plain text |
/// | `image` | pdftoppm  | one page as PNG/JPEG |
/// | `pages` | pdftoppm  | JSON array of base64 page images |
/// | `info`  | pdfinfo   | JSON document metadata |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    Text,
    Image,
    Pages,
    Info,
}

impl ConversionMode {
    pub const ALL: [ConversionMode; 4] = [
        ConversionMode::Text,
        ConversionMode::Image,
        ConversionMode::Pages,
        ConversionMode::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConversionMode::Text => "text",
            ConversionMode::Image => "image",
            ConversionMode::Pages => "pages",
            ConversionMode::Info => "info",
        }
    }

    /// Name of the poppler binary backing this mode.
    pub fn tool_name(self) -> &'static str {
        match self {
            ConversionMode::Text => "pdftotext",
            ConversionMode::Image | ConversionMode::Pages => "pdftoppm",
            ConversionMode::Info => "pdfinfo",
        }
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionMode {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ConversionMode::Text),
            "image" | "img" => Ok(ConversionMode::Image),
            "pages" => Ok(ConversionMode::Pages),
            "info" => Ok(ConversionMode::Info),
            _ => Err(ConvertError::UnsupportedMode {
                mode: s.to_string(),
                supported: ConversionMode::ALL
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

/// Raster format produced by `pdftoppm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless; keeps text edges crisp. (default)
    #[default]
    Png,
    /// Smaller files for photographic pages.
    #[serde(alias = "jpg")]
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// File extension `pdftoppm` gives its output files.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// Format flag passed to `pdftoppm`.
    pub fn flag(self) -> &'static str {
        match self {
            ImageFormat::Png => "-png",
            ImageFormat::Jpeg => "-jpeg",
        }
    }

    /// Format of an uploaded file, by extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    /// Format named by a media type essence such as `image/png`.
    pub fn from_mime(essence: &str) -> Option<Self> {
        match essence {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    /// Recognize PNG and JPEG payloads by their leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }
}

/// 1-indexed, inclusive page range. Either end may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRange {
    pub first: Option<u32>,
    pub last: Option<u32>,
}

impl PageRange {
    pub fn new(first: Option<u32>, last: Option<u32>) -> Result<Self, ConvertError> {
        if first == Some(0) || last == Some(0) {
            return Err(ConvertError::invalid("Pages are 1-indexed, minimum is 1"));
        }
        if let (Some(f), Some(l)) = (first, last) {
            if f > l {
                return Err(ConvertError::invalid(format!(
                    "Invalid page range '{f}-{l}': first must be <= last"
                )));
            }
        }
        Ok(Self { first, last })
    }

    pub fn first_or_default(&self) -> u32 {
        self.first.unwrap_or(1)
    }

    /// Clamp the range so it covers at most `max_pages` pages.
    pub fn capped(&self, max_pages: u32) -> Self {
        let first = self.first_or_default();
        let cap = first.saturating_add(max_pages.saturating_sub(1));
        Self {
            first: self.first,
            last: Some(self.last.map_or(cap, |l| l.min(cap))),
        }
    }

    /// `-f` / `-l` arguments understood by every poppler tool.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(f) = self.first {
            args.push("-f".to_string());
            args.push(f.to_string());
        }
        if let Some(l) = self.last {
            args.push("-l".to_string());
            args.push(l.to_string());
        }
        args
    }
}

impl FromStr for PageRange {
    type Err = ConvertError;

    /// Parse `all`, `5`, `3-15`, `3-` or `-15`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s.is_empty() || s == "all" {
            return Ok(Self::default());
        }

        let parse = |p: &str| -> Result<Option<u32>, ConvertError> {
            let p = p.trim();
            if p.is_empty() {
                return Ok(None);
            }
            p.parse::<u32>()
                .map(Some)
                .map_err(|_| ConvertError::invalid(format!("Invalid page number: '{p}'")))
        };

        match s.split_once('-') {
            Some((first, last)) => Self::new(parse(first)?, parse(last)?),
            None => {
                let page = parse(&s)?;
                Self::new(page, page)
            }
        }
    }
}

/// Per-request conversion parameters, deserialised from the query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Page selection, e.g. `3-15`. Overrides `first_page`/`last_page`.
    pub pages: Option<String>,
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,
    /// Rendering resolution for image modes. Range: 72–400.
    pub dpi: Option<u32>,
    pub format: ImageFormat,
    /// Keep the physical layout in text mode (`pdftotext -layout`).
    pub layout: bool,
}

impl ConversionOptions {
    /// Resolve the effective page range.
    pub fn page_range(&self) -> Result<PageRange, ConvertError> {
        match self.pages {
            Some(ref selection) => selection.parse(),
            None => PageRange::new(self.first_page, self.last_page),
        }
    }

    /// Resolve the effective DPI, rejecting out-of-range values.
    pub fn dpi_or(&self, default_dpi: u32) -> Result<u32, ConvertError> {
        match self.dpi {
            None => Ok(default_dpi),
            Some(d) if (MIN_DPI..=MAX_DPI).contains(&d) => Ok(d),
            Some(d) => Err(ConvertError::invalid(format!(
                "DPI must be {MIN_DPI}–{MAX_DPI}, got {d}"
            ))),
        }
    }
}
