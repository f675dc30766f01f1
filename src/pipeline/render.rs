//! PDF rasterisation via `pdftoppm`.
//!
//! `pdftoppm` writes one file per page into an output root rather than to
//! stdout, so every render gets a private [`TempDir`] inside the scratch
//! directory. Files are named `<root>-<N>.<ext>` with `N` zero-padded to the
//! width of the document's page count, or `<root>.<ext>` with `-singlefile`.
//! The directory is removed when it goes out of scope, whatever the outcome.

use crate::config::{ImageFormat, PageRange};
use crate::error::ConvertError;
use crate::pipeline::invoke::{run_tool, ToolCommand, ToolOutput};
use crate::pipeline::staging;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const OUTPUT_ROOT: &str = "page";

/// Parameters shared by single- and multi-page renders.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub program: &'a Path,
    pub input: &'a Path,
    pub scratch_dir: &'a Path,
    pub format: ImageFormat,
    pub dpi: u32,
    pub pages: PageRange,
    pub timeout: Duration,
}

/// Files produced by a render, kept alive with their directory.
#[derive(Debug)]
pub struct RenderedFiles {
    /// `(page_number, path)` sorted by page.
    pub files: Vec<(u32, PathBuf)>,
    _dir: TempDir,
}

/// Either the rendered files or the raw tool output of a failed run.
#[derive(Debug)]
pub enum RenderOutcome {
    Rendered(RenderedFiles),
    Failed(ToolOutput),
}

/// Render only the first selected page (`pdftoppm -singlefile`).
pub async fn render_single(req: &RenderRequest<'_>) -> Result<RenderOutcome, ConvertError> {
    let first = req.pages.first_or_default();
    let pages = PageRange {
        first: Some(first),
        last: Some(first),
    };
    render(req, pages, true).await
}

/// Render every selected page.
pub async fn render_pages(req: &RenderRequest<'_>) -> Result<RenderOutcome, ConvertError> {
    render(req, req.pages, false).await
}

async fn render(
    req: &RenderRequest<'_>,
    pages: PageRange,
    single: bool,
) -> Result<RenderOutcome, ConvertError> {
    let dir = staging::output_dir(req.scratch_dir)?;
    let root = dir.path().join(OUTPUT_ROOT);

    let mut cmd = ToolCommand::new("pdftoppm", req.program, req.timeout)
        .arg(req.format.flag())
        .args(["-r".to_string(), req.dpi.to_string()])
        .args(pages.to_args());
    if single {
        cmd = cmd.arg("-singlefile");
    }
    let cmd = cmd.path_arg(req.input).path_arg(&root);

    let output = run_tool(&cmd).await?;
    if !output.success() {
        return Ok(RenderOutcome::Failed(output));
    }

    let files = collect_page_files(dir.path(), req.format, pages.first_or_default()).await?;
    info!(
        "pdftoppm rendered {} page(s) at {} DPI in {}ms",
        files.len(),
        req.dpi,
        output.elapsed.as_millis()
    );
    Ok(RenderOutcome::Rendered(RenderedFiles { files, _dir: dir }))
}

/// List the page images `pdftoppm` wrote, sorted by page number.
///
/// `-singlefile` output carries no page suffix and is reported as `single_page`.
async fn collect_page_files(
    dir: &Path,
    format: ImageFormat,
    single_page: u32,
) -> Result<Vec<(u32, PathBuf)>, ConvertError> {
    let list_error = |e: std::io::Error| {
        ConvertError::Internal(format!("Failed to list render output: {e}"))
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_error)?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
            continue;
        }
        match page_number(&path) {
            Some(n) => files.push((n, path)),
            None if is_single_output(&path) => files.push((single_page, path)),
            None => debug!("Ignoring unexpected render output {}", path.display()),
        }
    }
    files.sort_by_key(|(n, _)| *n);
    Ok(files)
}

/// Parse the page number out of `page-007.png`.
fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (root, num) = stem.rsplit_once('-')?;
    if root != OUTPUT_ROOT {
        return None;
    }
    num.parse().ok()
}

fn is_single_output(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some(OUTPUT_ROOT)
}
