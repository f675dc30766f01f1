//! Page encoding: rendered image file → base64 [`PageImage`].
//!
//! `pages` responses are JSON, so binary page images travel as standard
//! base64. Dimensions are read from the image header only; the pixels are
//! never decoded.
//!
//! Uploaded PNG/JPEG pictures skip poppler entirely: [`transcode`] passes them
//! through or re-encodes them into the requested format.

use crate::config::ImageFormat;
use crate::error::ConvertError;
use crate::output::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Concurrent file reads while encoding a multi-page render.
const ENCODE_CONCURRENCY: usize = 4;

/// Encode one page image held in memory.
pub fn encode_page(page: u32, format: ImageFormat, bytes: &[u8]) -> PageImage {
    let (width, height) = match read_dimensions(bytes) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(e) => {
            warn!("Could not read dimensions of page {page}: {e}");
            (None, None)
        }
    };

    let data = STANDARD.encode(bytes);
    debug!("Encoded page {page} → {} bytes base64", data.len());

    PageImage {
        page,
        mime_type: format.mime_type().to_string(),
        width,
        height,
        data,
    }
}

/// Read and encode every rendered page file, preserving page order.
pub async fn encode_files(
    files: Vec<(u32, PathBuf)>,
    format: ImageFormat,
) -> Result<Vec<PageImage>, ConvertError> {
    stream::iter(files.into_iter().map(|(page, path)| async move {
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ConvertError::Internal(format!("Failed to read rendered page {page}: {e}"))
        })?;
        Ok::<_, ConvertError>(encode_page(page, format, &bytes))
    }))
    .buffered(ENCODE_CONCURRENCY)
    .try_collect()
    .await
}

/// Re-encode an uploaded picture as `target`. Same-format uploads are only
/// checked for a readable header and returned unchanged.
pub fn transcode(
    bytes: &[u8],
    source: ImageFormat,
    target: ImageFormat,
) -> Result<Vec<u8>, ConvertError> {
    let unreadable = |e: image::ImageError| ConvertError::UnreadableImage {
        reason: e.to_string(),
    };
    if source == target {
        read_dimensions(bytes).map_err(unreadable)?;
        return Ok(bytes.to_vec());
    }

    let decoded = image::load_from_memory_with_format(bytes, codec(source)).map_err(unreadable)?;
    let mut out = Vec::new();
    let written = match target {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => decoded
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut out), codec(target)),
        ImageFormat::Png => decoded.write_to(&mut Cursor::new(&mut out), codec(target)),
    };
    written.map_err(|e| ConvertError::Internal(format!("Failed to encode {target:?}: {e}")))?;
    debug!("Transcoded {source:?} → {target:?}, {} → {} bytes", bytes.len(), out.len());
    Ok(out)
}

fn codec(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
    }
}

fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
}
