//! Shared helpers for the HTTP integration tests.
//!
//! The real poppler binaries are replaced by the `/bin/sh` scripts in
//! `tests/fixtures/fake-tools/` (also used by the unit tests), so the tests
//! exercise process spawning, exit codes, stderr capture and timeouts without
//! depending on poppler being installed.

#![allow(dead_code)]

use edgequake_pdfconv::{router, ServerConfig, ServerConfigBuilder, ToolPaths};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const PDF_MAGIC: &[u8] = b"%PDF-1.7\n";

const FAKE_PDFTOTEXT: &str = include_str!("../fixtures/fake-tools/pdftotext.sh");
const FAKE_PDFINFO: &str = include_str!("../fixtures/fake-tools/pdfinfo.sh");
const FAKE_PDFTOPPM: &str = include_str!("../fixtures/fake-tools/pdftoppm.sh");

/// Running server plus the temp directories backing it.
pub struct TestServer {
    pub addr: SocketAddr,
    pub scratch: PathBuf,
    pub tools: PathBuf,
    pub fixture: PathBuf,
    _root: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Files currently left in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.scratch) {
            Ok(rd) => rd.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Replace one fake tool with a custom script body.
    pub fn replace_tool(&self, name: &str, body: &str) {
        write_script(&self.tools, name, body);
    }
}

pub fn install_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    install_script(dir, name, &format!("#!/bin/sh\n{body}\n"))
}

/// Start a server on an ephemeral port with fake tools installed.
///
/// `configure` can adjust the builder; scratch and tool paths are already set.
pub async fn start_server(
    configure: impl FnOnce(ServerConfigBuilder) -> ServerConfigBuilder,
) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    let scratch = root.path().join("scratch");
    let tools = root.path().join("bin");
    std::fs::create_dir_all(&scratch).unwrap();
    std::fs::create_dir_all(&tools).unwrap();

    // The fake pdftoppm copies the fixture sitting next to it.
    let fixture = tools.join("fixture.png");
    image::RgbImage::from_pixel(12, 16, image::Rgb([0, 0, 0]))
        .save(&fixture)
        .unwrap();

    install_script(&tools, "pdftotext", FAKE_PDFTOTEXT);
    install_script(&tools, "pdfinfo", FAKE_PDFINFO);
    install_script(&tools, "pdftoppm", FAKE_PDFTOPPM);

    let builder = ServerConfig::builder()
        .scratch_dir(&scratch)
        .tools(ToolPaths::in_dir(&tools))
        .tool_timeout_secs(10);
    let config = Arc::new(configure(builder).build().unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(config)).await.unwrap();
    });

    TestServer {
        addr,
        scratch,
        tools,
        fixture,
        _root: root,
    }
}

/// A small payload that passes the fake tools' `%PDF` check.
pub fn fake_pdf(body: &str) -> Vec<u8> {
    let mut bytes = PDF_MAGIC.to_vec();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}
