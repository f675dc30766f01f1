//! The converter: one validated request, one tool invocation, one result.
//!
//! [`ConversionRequest::new`] validates everything that can be validated
//! without touching the disk (mode enabled, page range, DPI), so the HTTP
//! layer can reject bad requests before staging the upload. [`Converter`]
//! then dispatches on the closed [`ConversionMode`] enum to exactly one
//! handler per variant, each of which spawns exactly one poppler process.
//!
//! No retries: a poppler invocation is deterministic for a given input, so
//! a failed run is reported to the caller as-is.

use crate::config::{ConversionMode, ConversionOptions, ImageFormat, PageRange, ServerConfig};
use crate::error::ConvertError;
use crate::output::{ConversionPayload, ConversionResult, RenderedPages, ToolFailure};
use crate::pipeline::invoke::{run_tool, ToolCommand, ToolOutput};
use crate::pipeline::render::{self, RenderOutcome, RenderRequest};
use crate::pipeline::{encode, extract};
use axum::body::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Startup check of one poppler binary and the modes that depend on it.
#[derive(Debug)]
pub struct ToolCheck {
    pub tool: &'static str,
    pub path: PathBuf,
    pub modes: Vec<ConversionMode>,
    pub status: Result<(), ConvertError>,
}

/// A fully validated conversion job. The document itself travels separately,
/// as a staged file or in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub mode: ConversionMode,
    pub pages: PageRange,
    pub dpi: u32,
    pub format: ImageFormat,
    pub layout: bool,
}

impl ConversionRequest {
    /// Validate a mode name and query options against the server config.
    pub fn new(
        config: &ServerConfig,
        mode: &str,
        options: &ConversionOptions,
    ) -> Result<Self, ConvertError> {
        let mode = config.resolve_mode(mode)?;
        Ok(Self {
            mode,
            pages: options.page_range()?,
            dpi: options.dpi_or(config.default_dpi)?,
            format: options.format,
            layout: options.layout,
        })
    }
}

/// Runs poppler tools according to a shared [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct Converter {
    config: Arc<ServerConfig>,
}

impl Converter {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Convert the PDF at `input`.
    ///
    /// # Returns
    /// * `Ok(Success)` — the tool exited 0 and produced output
    /// * `Ok(Failure)` — the tool ran and rejected the document
    ///
    /// # Errors
    /// * [`ConvertError::UnsupportedMode`] — mode disabled; nothing spawned
    /// * [`ConvertError::InvalidRequest`] — `input` is not a readable file
    /// * [`ConvertError::ToolUnavailable`] / [`ConvertError::Timeout`]
    pub async fn convert(
        &self,
        input: &Path,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        if !self.config.is_enabled(request.mode) {
            return Err(ConvertError::UnsupportedMode {
                mode: request.mode.to_string(),
                supported: self.config.enabled_modes_label(),
            });
        }
        check_input(input).await?;

        let start = Instant::now();
        let result = match request.mode {
            ConversionMode::Text => self.text(input, request).await?,
            ConversionMode::Image => self.image(input, request).await?,
            ConversionMode::Pages => self.pages(input, request).await?,
            ConversionMode::Info => self.info(input, request).await?,
        };

        match result {
            ConversionResult::Success(_) => info!(
                "{} conversion succeeded in {}ms",
                request.mode,
                start.elapsed().as_millis()
            ),
            ConversionResult::Failure(ref f) => warn!(
                "{} conversion failed ({:?}): {}",
                request.mode, f.exit_code, f.diagnostic
            ),
        }
        Ok(result)
    }

    /// Check that every poppler binary behind an enabled mode can be spawned.
    ///
    /// Each distinct binary is run once with `-v`; only a spawn failure counts
    /// as unavailable.
    pub async fn check_tools(&self) -> Vec<ToolCheck> {
        let mut checks: Vec<ToolCheck> = Vec::new();
        for &mode in &self.config.enabled_modes {
            match checks.iter_mut().find(|p| p.tool == mode.tool_name()) {
                Some(check) => check.modes.push(mode),
                None => checks.push(ToolCheck {
                    tool: mode.tool_name(),
                    path: self.config.tools.for_mode(mode).to_path_buf(),
                    modes: vec![mode],
                    status: Ok(()),
                }),
            }
        }

        for check in &mut checks {
            let cmd = ToolCommand::new(check.tool, &check.path, TOOL_CHECK_TIMEOUT).arg("-v");
            check.status = run_tool(&cmd).await.map(|out| {
                debug!("{} -v exited with {}", check.tool, out.status);
            });
        }
        checks
    }

    /// Convert an uploaded PNG/JPEG, treated as a one-page document.
    ///
    /// Only `image` and `pages` apply; the picture is re-encoded when the
    /// requested format differs from the upload's.
    pub async fn convert_image(
        &self,
        bytes: Bytes,
        source: ImageFormat,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        if !self.config.is_enabled(request.mode) {
            return Err(ConvertError::UnsupportedMode {
                mode: request.mode.to_string(),
                supported: self.config.enabled_modes_label(),
            });
        }
        if !matches!(request.mode, ConversionMode::Image | ConversionMode::Pages) {
            return Err(ConvertError::UnsupportedMode {
                mode: request.mode.to_string(),
                supported: "image, pages (image uploads)".to_string(),
            });
        }
        if request.pages.first_or_default() > 1 {
            return Err(ConvertError::invalid("Image uploads have a single page"));
        }

        let target = request.format;
        let encoded = tokio::task::spawn_blocking(move || encode::transcode(&bytes, source, target))
            .await
            .map_err(|e| ConvertError::Internal(format!("Image task panicked: {e}")))??;
        info!("{source:?} upload served as {target:?} ({} bytes)", encoded.len());

        let payload = match request.mode {
            ConversionMode::Pages => ConversionPayload::Pages(RenderedPages {
                page_count: 1,
                dpi: request.dpi,
                pages: vec![encode::encode_page(1, target, &encoded)],
            }),
            _ => ConversionPayload::Image {
                format: target,
                bytes: encoded,
            },
        };
        Ok(ConversionResult::Success(payload))
    }

    // ── One handler per mode ─────────────────────────────────────────────

    async fn text(
        &self,
        input: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let out = extract::extract_text(
            &self.config.tools.pdftotext,
            input,
            req.pages,
            req.layout,
            self.config.tool_timeout(),
        )
        .await?;
        if !out.success() {
            return Ok(failed("pdftotext", &out));
        }
        if out.stdout.is_empty() {
            return Ok(no_output("pdftotext"));
        }
        let text = match String::from_utf8(out.stdout) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Ok(ConversionResult::Success(ConversionPayload::Text(text)))
    }

    async fn image(
        &self,
        input: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let outcome = render::render_single(&self.render_request(input, req, req.pages)).await?;
        let rendered = match outcome {
            RenderOutcome::Rendered(r) => r,
            RenderOutcome::Failed(out) => return Ok(failed("pdftoppm", &out)),
        };
        let Some((page, path)) = rendered.files.first() else {
            return Ok(no_output("pdftoppm"));
        };
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ConvertError::Internal(format!("Failed to read rendered page {page}: {e}"))
        })?;
        Ok(ConversionResult::Success(ConversionPayload::Image {
            format: req.format,
            bytes,
        }))
    }

    async fn pages(
        &self,
        input: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let pages = req.pages.capped(self.config.max_pages);
        let outcome = render::render_pages(&self.render_request(input, req, pages)).await?;
        let rendered = match outcome {
            RenderOutcome::Rendered(r) => r,
            RenderOutcome::Failed(out) => return Ok(failed("pdftoppm", &out)),
        };
        if rendered.files.is_empty() {
            return Ok(no_output("pdftoppm"));
        }
        let images = encode::encode_files(rendered.files.clone(), req.format).await?;
        Ok(ConversionResult::Success(ConversionPayload::Pages(
            RenderedPages {
                page_count: images.len(),
                dpi: req.dpi,
                pages: images,
            },
        )))
    }

    async fn info(
        &self,
        input: &Path,
        req: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let out = extract::extract_info(
            &self.config.tools.pdfinfo,
            input,
            req.pages,
            self.config.tool_timeout(),
        )
        .await?;
        if !out.success() {
            return Ok(failed("pdfinfo", &out));
        }
        match extract::parse_pdfinfo(&String::from_utf8_lossy(&out.stdout)) {
            Some(meta) => Ok(ConversionResult::Success(ConversionPayload::Info(meta))),
            None => Ok(ConversionResult::Failure(ToolFailure {
                tool: "pdfinfo".into(),
                exit_code: out.exit_code(),
                diagnostic: "pdfinfo report did not include a page count".into(),
            })),
        }
    }

    fn render_request<'a>(
        &'a self,
        input: &'a Path,
        req: &ConversionRequest,
        pages: PageRange,
    ) -> RenderRequest<'a> {
        RenderRequest {
            program: &self.config.tools.pdftoppm,
            input,
            scratch_dir: &self.config.scratch_dir,
            format: req.format,
            dpi: req.dpi,
            pages,
            timeout: self.config.tool_timeout(),
        }
    }
}

async fn check_input(input: &Path) -> Result<(), ConvertError> {
    match tokio::fs::File::open(input).await {
        Ok(_) => Ok(()),
        Err(e) => Err(ConvertError::invalid(format!(
            "Input '{}' is not readable: {e}",
            input.display()
        ))),
    }
}

fn failed(tool: &str, out: &ToolOutput) -> ConversionResult {
    ConversionResult::Failure(ToolFailure {
        tool: tool.to_string(),
        exit_code: out.exit_code(),
        diagnostic: out.diagnostic(),
    })
}

fn no_output(tool: &str) -> ConversionResult {
    ConversionResult::Failure(ToolFailure {
        tool: tool.to_string(),
        exit_code: Some(0),
        diagnostic: "produced no output".into(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ServerConfigBuilder;
    use crate::test_support::{fake_tool_dir, write_script};
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    struct Fixture {
        work: tempfile::TempDir,
        scratch: tempfile::TempDir,
        converter: Converter,
        input: std::path::PathBuf,
    }

    fn fixture_with(build: impl FnOnce(ServerConfigBuilder) -> ServerConfigBuilder) -> Fixture {
        let work = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let bin = fake_tool_dir(work.path());
        let config = build(
            ServerConfig::builder()
                .tool_dir(&bin)
                .scratch_dir(scratch.path())
                .tool_timeout_secs(5),
        )
        .build()
        .unwrap();
        let input = work.path().join("doc.pdf");
        std::fs::write(&input, b"%PDF-1.7 hello world").unwrap();
        Fixture {
            work,
            scratch,
            converter: Converter::new(Arc::new(config)),
            input,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|b| b)
    }

    fn request(f: &Fixture, mode: &str, options: ConversionOptions) -> ConversionRequest {
        ConversionRequest::new(f.converter.config(), mode, &options).unwrap()
    }

    #[tokio::test]
    async fn text_mode_returns_stdout() {
        let f = fixture();
        let req = request(&f, "text", ConversionOptions::default());
        let result = f.converter.convert(&f.input, &req).await.unwrap();
        match result {
            ConversionResult::Success(ConversionPayload::Text(t)) => {
                assert_eq!(t, "%PDF-1.7 hello world")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupt_input_is_failure_not_error() {
        let f = fixture();
        std::fs::write(&f.input, b"<html>not a pdf</html>").unwrap();
        let req = request(&f, "text", ConversionOptions::default());
        let result = f.converter.convert(&f.input, &req).await.unwrap();
        match result {
            ConversionResult::Failure(fail) => {
                assert_eq!(fail.tool, "pdftotext");
                assert_eq!(fail.exit_code, Some(1));
                assert!(fail.diagnostic.contains("trailer"), "got: {}", fail.diagnostic);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_mode_returns_single_png() {
        let f = fixture();
        let req = request(
            &f,
            "image",
            ConversionOptions {
                first_page: Some(2),
                ..Default::default()
            },
        );
        let result = f.converter.convert(&f.input, &req).await.unwrap();
        match result {
            ConversionResult::Success(ConversionPayload::Image { format, bytes }) => {
                assert_eq!(format, ImageFormat::Png);
                assert_eq!(&bytes[1..4], b"PNG");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(f.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn pages_mode_is_capped_by_max_pages() {
        let f = fixture_with(|b| b.max_pages(2));
        let req = request(&f, "pages", ConversionOptions::default());
        let result = f.converter.convert(&f.input, &req).await.unwrap();
        let pages = match result {
            ConversionResult::Success(ConversionPayload::Pages(p)) => p,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(pages.page_count, 2);
        assert_eq!(pages.pages[0].page, 1);
        assert_eq!(pages.pages[1].page, 2);
        assert_eq!((pages.pages[0].width, pages.pages[0].height), (Some(8), Some(11)));
        assert!(!STANDARD.decode(&pages.pages[1].data).unwrap().is_empty());
        assert_eq!(std::fs::read_dir(f.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn info_mode_parses_metadata() {
        let f = fixture();
        let req = request(&f, "info", ConversionOptions::default());
        let result = f.converter.convert(&f.input, &req).await.unwrap();
        match result {
            ConversionResult::Success(ConversionPayload::Info(meta)) => {
                assert_eq!(meta.title.as_deref(), Some("Quarterly Report"));
                assert_eq!(meta.page_count, 3);
                assert_eq!(meta.pdf_version, "1.7");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_mode_spawns_nothing() {
        let f = fixture_with(|b| b.enabled_modes([ConversionMode::Info]));
        let marker = f.scratch.path().join("spawned");
        let spy = write_script(
            f.work.path(),
            "spy",
            &format!("touch '{}'", marker.display()),
        );
        let mut config = f.converter.config().clone();
        config.tools.pdftotext = spy;
        let converter = Converter::new(Arc::new(config));

        let err = ConversionRequest::new(converter.config(), "text", &ConversionOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_mode");

        let forged = ConversionRequest {
            mode: ConversionMode::Text,
            pages: PageRange::default(),
            dpi: 150,
            format: ImageFormat::Png,
            layout: false,
        };
        let err = converter.convert(&f.input, &forged).await.unwrap_err();
        assert_eq!(err.code(), "unsupported_mode");
        assert!(!marker.exists(), "converter must not spawn for disabled modes");
    }

    #[tokio::test]
    async fn missing_input_is_rejected_before_spawn() {
        let f = fixture();
        let req = request(&f, "text", ConversionOptions::default());
        let err = f
            .converter
            .convert(&f.scratch.path().join("missing.pdf"), &req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn tool_exiting_zero_without_output_is_failure() {
        let f = fixture();
        let silent = write_script(f.work.path(), "silent", "exit 0");
        let mut config = f.converter.config().clone();
        config.tools.pdftotext = silent;
        let converter = Converter::new(Arc::new(config));
        let req = request(&f, "text", ConversionOptions::default());
        let result = converter.convert(&f.input, &req).await.unwrap();
        match result {
            ConversionResult::Failure(fail) => assert_eq!(fail.diagnostic, "produced no output"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_reports_missing_tools() {
        let work = tempfile::tempdir().unwrap();
        let config = ServerConfig::builder()
            .tool_dir(work.path())
            .build()
            .unwrap();
        let checks = Converter::new(Arc::new(config)).check_tools().await;
        let tools: Vec<&str> = checks.iter().map(|p| p.tool).collect();
        assert_eq!(tools, vec!["pdftotext", "pdftoppm", "pdfinfo"]);
        assert_eq!(checks[1].modes, vec![ConversionMode::Image, ConversionMode::Pages]);
        assert!(checks
            .iter()
            .all(|p| matches!(p.status, Err(ConvertError::ToolUnavailable { .. }))));
    }

    #[tokio::test]
    async fn check_runs_shared_binary_once() {
        let f = fixture();
        let log = f.work.path().join("runs.log");
        let counting = write_script(
            f.work.path(),
            "pdftoppm-counting",
            &format!("echo run >> '{}'", log.display()),
        );
        let mut config = f.converter.config().clone();
        config.tools.pdftoppm = counting;
        let checks = Converter::new(Arc::new(config)).check_tools().await;

        assert!(checks.iter().all(|p| p.status.is_ok()));
        let runs = std::fs::read_to_string(&log).unwrap();
        assert_eq!(runs.lines().count(), 1, "pdftoppm ran more than once");
    }

    fn png_upload(w: u32, h: u32) -> Bytes {
        let mut buf = Vec::new();
        image::RgbImage::from_pixel(w, h, image::Rgb([10, 20, 30]))
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    #[tokio::test]
    async fn png_upload_is_transcoded_to_jpeg() {
        let f = fixture();
        let req = request(
            &f,
            "image",
            ConversionOptions {
                format: ImageFormat::Jpeg,
                ..Default::default()
            },
        );
        let result = f
            .converter
            .convert_image(png_upload(6, 4), ImageFormat::Png, &req)
            .await
            .unwrap();
        match result {
            ConversionResult::Success(ConversionPayload::Image { format, bytes }) => {
                assert_eq!(format, ImageFormat::Jpeg);
                assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_upload_in_pages_mode_is_one_page() {
        let f = fixture();
        let req = request(&f, "pages", ConversionOptions::default());
        let result = f
            .converter
            .convert_image(png_upload(6, 4), ImageFormat::Png, &req)
            .await
            .unwrap();
        let pages = match result {
            ConversionResult::Success(ConversionPayload::Pages(p)) => p,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(pages.page_count, 1);
        assert_eq!((pages.pages[0].width, pages.pages[0].height), (Some(6), Some(4)));
    }

    #[tokio::test]
    async fn image_upload_rejects_text_mode_and_later_pages() {
        let f = fixture();
        let text = request(&f, "text", ConversionOptions::default());
        let err = f
            .converter
            .convert_image(png_upload(2, 2), ImageFormat::Png, &text)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_mode");

        let page_two = request(
            &f,
            "image",
            ConversionOptions {
                first_page: Some(2),
                ..Default::default()
            },
        );
        let err = f
            .converter
            .convert_image(png_upload(2, 2), ImageFormat::Png, &page_two)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn corrupt_image_upload_is_unreadable() {
        let f = fixture();
        let req = request(&f, "image", ConversionOptions::default());
        let err = f
            .converter
            .convert_image(Bytes::from_static(b"\x89PNG not really"), ImageFormat::Png, &req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unreadable_image");
    }

    #[test]
    fn request_validation_rejects_bad_options() {
        let config = ServerConfig::default();
        let bad_dpi = ConversionOptions {
            dpi: Some(10),
            ..Default::default()
        };
        assert_eq!(
            ConversionRequest::new(&config, "image", &bad_dpi).unwrap_err().code(),
            "invalid_request"
        );
        let bad_range = ConversionOptions {
            first_page: Some(5),
            last_page: Some(2),
            ..Default::default()
        };
        assert!(ConversionRequest::new(&config, "text", &bad_range).is_err());
        let ok = ConversionRequest::new(&config, "pages", &ConversionOptions::default()).unwrap();
        assert_eq!(ok.mode, ConversionMode::Pages);
        assert_eq!(ok.dpi, 150);
    }
}
