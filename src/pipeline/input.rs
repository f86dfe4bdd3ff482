//! Input resolution: turn a user-supplied path into a [`PageSource`].
//!
//! A `.pdf` file becomes a [`crate::pipeline::render::PdfPageSource`]
//! (pages rendered on demand); anything else is treated as a single image
//! and forwarded as-is with a MIME type derived from its extension.

use crate::error::{OcrError, Result};
use crate::pipeline::encode::RenderedPage;
use crate::pipeline::render::PdfPageSource;
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Something that can be split into page images.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Total number of pages.
    async fn page_count(&self) -> Result<usize>;

    /// Render page `page_num` (1-based).
    async fn render(&self, page_num: usize) -> Result<RenderedPage>;

    /// `false` for sources where page selection has no meaning.
    fn paginated(&self) -> bool {
        true
    }
}

/// MIME type for an image path, by extension. Unknown extensions map to JPEG.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tiff" | "tif") => "image/tiff",
        _ => "image/jpeg",
    }
}

/// `true` if the path has a `.pdf` extension (any case).
pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Validate `path` and pick the matching page source.
///
/// `password` and `target_dim` only apply to PDF input.
pub fn resolve_input(
    path: impl AsRef<Path>,
    password: Option<&str>,
    target_dim: u32,
) -> Result<Box<dyn PageSource>> {
    let path = path.as_ref().to_path_buf();
    let mut file = open_readable(&path)?;

    if is_pdf_path(&path) {
        let mut magic = [0u8; 4];
        if file.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
            return Err(OcrError::NotAPdf { path, magic });
        }
        debug!("Resolved PDF input: {}", path.display());
        Ok(Box::new(
            PdfPageSource::new(path, password.map(str::to_string)).with_target_dim(target_dim),
        ))
    } else {
        debug!("Resolved image input: {}", path.display());
        Ok(Box::new(ImageSource::new(path)))
    }
}

fn open_readable(path: &Path) -> Result<std::fs::File> {
    if !path.exists() {
        return Err(OcrError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => OcrError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => OcrError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

/// A single image file, sent unmodified.
#[derive(Debug, Clone)]
pub struct ImageSource {
    path: PathBuf,
}

impl ImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Label shown in progress output and multi-page JSON: the file name.
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[async_trait]
impl PageSource for ImageSource {
    async fn page_count(&self) -> Result<usize> {
        Ok(1)
    }

    async fn render(&self, _page_num: usize) -> Result<RenderedPage> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| OcrError::ReadFailed {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(RenderedPage {
            bytes,
            mime_type: mime_for_path(&self.path).to_string(),
            label: self.label(),
            page_num: None,
        })
    }

    fn paginated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("a.png")), "image/png");
        assert_eq!(mime_for_path(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for_path(Path::new("a.gif")), "image/gif");
        assert_eq!(mime_for_path(Path::new("a.bmp")), "image/bmp");
        assert_eq!(mime_for_path(Path::new("a.tif")), "image/tiff");
        assert_eq!(mime_for_path(Path::new("a.heic")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("noext")), "image/jpeg");
    }

    #[test]
    fn pdf_extension_any_case() {
        assert!(is_pdf_path(Path::new("doc.PDF")));
        assert!(!is_pdf_path(Path::new("doc.pdf.png")));
    }

    #[test]
    fn missing_file_is_input_error() {
        let err = resolve_input("/definitely/not/here.png", None, 1600).err().unwrap();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
    }

    #[test]
    fn fake_pdf_rejected_by_magic() {
        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        tmp.write_all(b"GIF89a not a pdf").unwrap();
        let err = resolve_input(tmp.path(), None, 1600).err().unwrap();
        assert!(matches!(err, OcrError::NotAPdf { magic, .. } if &magic == b"GIF8"));
    }

    #[tokio::test]
    async fn image_source_is_single_unpaginated_page() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"\x89PNG fake").unwrap();
        let source = resolve_input(tmp.path(), None, 1600).unwrap();
        assert!(!source.paginated());
        assert_eq!(source.page_count().await.unwrap(), 1);
        let page = source.render(1).await.unwrap();
        assert_eq!(page.mime_type, "image/png");
        assert_eq!(page.bytes, b"\x89PNG fake");
        assert!(page.label.ends_with(".png"));
        assert_eq!(page.page_num, None);
    }
}
