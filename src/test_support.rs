//! Fake poppler tools for unit tests.
//!
//! The scripts live in `tests/fixtures/fake-tools/` and are shared with the
//! HTTP integration tests. Each mimics the argument conventions of the real
//! binary closely enough for the converter to drive it.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const FAKE_PDFTOTEXT: &str = include_str!("../tests/fixtures/fake-tools/pdftotext.sh");
pub const FAKE_PDFINFO: &str = include_str!("../tests/fixtures/fake-tools/pdfinfo.sh");
/// Copies `fixture.png` from its own directory.
pub const FAKE_PDFTOPPM: &str = include_str!("../tests/fixtures/fake-tools/pdftoppm.sh");

/// Write an executable file named `name` into `dir` with `contents` verbatim.
pub fn install_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write an executable `/bin/sh` script with the given body.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    install_script(dir, name, &format!("#!/bin/sh\n{body}\n"))
}

/// Write a tiny real PNG so dimension reads have something to parse.
pub fn write_png_fixture(dir: &Path, width: u32, height: u32) -> PathBuf {
    let path = dir.join("fixture.png");
    image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

/// Fake tool directory with all three binaries and an 8x11 page fixture.
pub fn fake_tool_dir(dir: &Path) -> PathBuf {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    write_png_fixture(&bin, 8, 11);
    install_script(&bin, "pdftotext", FAKE_PDFTOTEXT);
    install_script(&bin, "pdfinfo", FAKE_PDFINFO);
    install_script(&bin, "pdftoppm", FAKE_PDFTOPPM);
    bin
}
