//! Pipeline stages for one conversion request.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own with fake tools.
//!
//! ## Data Flow
//!
//! ```text
//! staging ──▶ invoke ──▶ render / extract ──▶ encode
//! (temp file)  (process)  (pdftoppm/pdftotext/pdfinfo)  (base64)
//! ```
//!
//! 1. [`staging`] — write the upload into the scratch directory
//! 2. [`invoke`]  — spawn a tool, capture output, enforce the time budget
//! 3. [`render`]  — drive `pdftoppm` and collect the page files it wrote
//! 4. [`extract`] — drive `pdftotext` and `pdfinfo`, parse pdfinfo's report
//! 5. [`encode`]  — base64-wrap rendered pages for JSON responses

pub mod encode;
pub mod extract;
pub mod invoke;
pub mod render;
pub mod staging;
