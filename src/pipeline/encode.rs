//! Image encoding: rendered page → PNG bytes → `data:` URI.
//!
//! The inference server receives images inline as
//! `data:<mime>;base64,<payload>` URLs inside the chat request. PNG is used
//! for rendered PDF pages because it is lossless; image files are forwarded
//! in their original encoding.

use crate::error::{OcrError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// One page image, ready to be sent.
#[derive(Clone)]
pub struct RenderedPage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// `page N` or the image file name.
    pub label: String,
    /// 1-based page number for PDF pages.
    pub page_num: Option<usize>,
}

impl std::fmt::Debug for RenderedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedPage")
            .field("label", &self.label)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl RenderedPage {
    /// The image as an inline `data:` URI.
    pub fn data_uri(&self) -> String {
        data_uri(&self.mime_type, &self.bytes)
    }
}

/// Build a `data:<mime>;base64,<payload>` URI.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    format!("data:{mime_type};base64,{b64}")
}

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage, label: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| OcrError::ImageEncoding {
            label: label.to_string(),
            detail: e.to_string(),
        })?;
    Ok(buf)
}
