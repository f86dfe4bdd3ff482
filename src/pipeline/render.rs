//! PDF rasterisation: render one page at a time via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. Every call goes through `tokio::task::spawn_blocking` so the
//! Tokio worker threads never stall while a page is rasterised.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 200 DPI is tens of thousands of
//! pixels wide. `target_image_dim` caps the longest edge regardless of
//! physical size, which is also what the vision encoder cares about.
//!
//! Pages are rendered lazily, one per request, so memory stays bounded by a
//! single page image regardless of document length. The library itself is
//! bound once per process and shared by every render.

use crate::error::{OcrError, Result};
use crate::pipeline::encode::{encode_png, RenderedPage};
use crate::pipeline::input::PageSource;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit pdfium shared library.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

/// Default longest edge of a rendered page, in pixels.
pub const DEFAULT_TARGET_DIM: u32 = 1600;

static PDFIUM: OnceCell<Pdfium> = OnceCell::new();

/// The process-wide pdfium instance, bound on first use.
///
/// A failed bind is not cached, so a later call retries.
pub fn pdfium() -> Result<&'static Pdfium> {
    PDFIUM.get_or_try_init(bind_pdfium)
}

/// Bind pdfium: `$PDFIUM_LIB_PATH`, then the working directory, then the system library.
fn bind_pdfium() -> Result<Pdfium> {
    let bindings = match std::env::var(PDFIUM_LIB_ENV) {
        Ok(path) if !path.trim().is_empty() => Pdfium::bind_to_library(path.trim()),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| OcrError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// A PDF on disk, rendered page by page.
#[derive(Debug, Clone)]
pub struct PdfPageSource {
    path: PathBuf,
    password: Option<String>,
    target_dim: u32,
}

impl PdfPageSource {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
            target_dim: DEFAULT_TARGET_DIM,
        }
    }

    /// Override the longest edge of rendered pages.
    pub fn with_target_dim(mut self, dim: u32) -> Self {
        self.target_dim = dim;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PageSource for PdfPageSource {
    async fn page_count(&self) -> Result<usize> {
        let path = self.path.clone();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || page_count_blocking(&path, password.as_deref()))
            .await
            .map_err(|e| OcrError::Internal(format!("Page count task panicked: {e}")))?
    }

    async fn render(&self, page_num: usize) -> Result<RenderedPage> {
        let path = self.path.clone();
        let password = self.password.clone();
        let dim = self.target_dim;
        tokio::task::spawn_blocking(move || {
            render_page_blocking(&path, password.as_deref(), page_num, dim)
        })
        .await
        .map_err(|e| OcrError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                OcrError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                OcrError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            OcrError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn page_count_blocking(path: &Path, password: Option<&str>) -> Result<usize> {
    let document = open_document(pdfium()?, path, password)?;
    let total = document.pages().len() as usize;
    info!("PDF loaded: {} pages", total);
    Ok(total)
}

fn render_page_blocking(
    path: &Path,
    password: Option<&str>,
    page_num: usize,
    target_dim: u32,
) -> Result<RenderedPage> {
    let label = format!("page {page_num}");
    let document = open_document(pdfium()?, path, password)?;
    let pages = document.pages();
    let total = pages.len() as usize;

    if page_num == 0 || page_num > total {
        return Err(OcrError::RasterisationFailed {
            page: page_num,
            detail: format!("out of range, document has {total} pages"),
        });
    }

    let page = pages
        .get((page_num - 1) as u16)
        .map_err(|e| OcrError::RasterisationFailed {
            page: page_num,
            detail: format!("{e:?}"),
        })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(target_dim as i32)
        .set_maximum_height(target_dim as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| OcrError::RasterisationFailed {
            page: page_num,
            detail: format!("{e:?}"),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered {} → {}x{} px",
        label,
        image.width(),
        image.height()
    );

    Ok(RenderedPage {
        bytes: encode_png(&image, &label)?,
        mime_type: "image/png".to_string(),
        label,
        page_num: Some(page_num),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_defaults() {
        let src = PdfPageSource::new("doc.pdf", None);
        assert_eq!(src.target_dim, DEFAULT_TARGET_DIM);
        assert_eq!(src.path(), Path::new("doc.pdf"));
        assert!(src.paginated());
        assert_eq!(src.with_target_dim(1024).target_dim, 1024);
    }

    #[test]
    fn pdfium_bound_once() {
        let Ok(first) = pdfium() else {
            println!("SKIP: libpdfium not available");
            return;
        };
        let second = pdfium().expect("cached instance");
        assert!(std::ptr::eq(first, second));
    }
}
