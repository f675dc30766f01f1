//! Text and metadata extraction via `pdftotext` and `pdfinfo`.
//!
//! Both tools write to stdout, so no output directory is needed.

use crate::config::PageRange;
use crate::error::ConvertError;
use crate::output::DocumentMetadata;
use crate::pipeline::invoke::{run_tool, ToolCommand, ToolOutput};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;

/// `Key:   value` lines printed by pdfinfo.
static INFO_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9 ]*?):\s*(.*?)\s*$").expect("valid pdfinfo regex")
});

/// Run `pdftotext` with output to stdout (`-`).
pub async fn extract_text(
    program: &Path,
    input: &Path,
    pages: PageRange,
    layout: bool,
    timeout: Duration,
) -> Result<ToolOutput, ConvertError> {
    let mut cmd = ToolCommand::new("pdftotext", program, timeout);
    if layout {
        cmd = cmd.arg("-layout");
    }
    let cmd = cmd
        .args(pages.to_args())
        .args(["-enc", "UTF-8"])
        .path_arg(input)
        .arg("-");
    run_tool(&cmd).await
}

/// Run `pdfinfo`; parse the output with [`parse_pdfinfo`].
pub async fn extract_info(
    program: &Path,
    input: &Path,
    pages: PageRange,
    timeout: Duration,
) -> Result<ToolOutput, ConvertError> {
    let cmd = ToolCommand::new("pdfinfo", program, timeout)
        .args(pages.to_args())
        .path_arg(input);
    run_tool(&cmd).await
}

/// Parse pdfinfo's `Key: value` report.
///
/// Returns `None` when the report has no `Pages:` line, which only happens
/// when pdfinfo did not actually understand the document.
pub fn parse_pdfinfo(report: &str) -> Option<DocumentMetadata> {
    let mut meta = DocumentMetadata::default();
    let mut saw_pages = false;

    for line in report.lines() {
        let Some(caps) = INFO_LINE.captures(line) else {
            continue;
        };
        let key = &caps[1];
        let value = caps[2].to_string();
        let non_empty = || (!value.is_empty()).then(|| value.clone());

        match key {
            "Title" => meta.title = non_empty(),
            "Author" => meta.author = non_empty(),
            "Subject" => meta.subject = non_empty(),
            "Creator" => meta.creator = non_empty(),
            "Producer" => meta.producer = non_empty(),
            "CreationDate" => meta.creation_date = non_empty(),
            "ModDate" => meta.modification_date = non_empty(),
            "Pages" => {
                if let Ok(n) = value.parse() {
                    meta.page_count = n;
                    saw_pages = true;
                }
            }
            "Encrypted" => meta.is_encrypted = value.starts_with("yes"),
            "PDF version" => meta.pdf_version = value.clone(),
            // With -f/-l pdfinfo prints "Page    1 size:"; keep the first one.
            k if k == "Page size" || (k.starts_with("Page") && k.ends_with("size")) => {
                if meta.page_size.is_none() {
                    meta.page_size = non_empty();
                }
            }
            _ => {}
        }
    }

    saw_pages.then_some(meta)
}
