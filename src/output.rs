//! Result types and final document assembly.
//!
//! [`Document::render`] is deliberately dumb: by the time a [`PageResult`]
//! exists its content has already been repaired and normalised, so assembly
//! is order-preserving concatenation plus a format-specific envelope.

use crate::config::OutputFormat;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Number;

/// `[x, y, w, h]` as the model wrote it.
///
/// The numbers are kept in their original JSON spelling (`0` stays `0`, not
/// `0.0`); equality compares the numeric values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BBox([Number; 4]);

impl BBox {
    /// `None` if any value is NaN or infinite.
    pub fn from_values(values: [f64; 4]) -> Option<Self> {
        let [x, y, w, h] = values;
        Some(Self([
            Number::from_f64(x)?,
            Number::from_f64(y)?,
            Number::from_f64(w)?,
            Number::from_f64(h)?,
        ]))
    }

    pub fn from_numbers(numbers: [Number; 4]) -> Self {
        Self(numbers)
    }

    pub fn values(&self) -> [f64; 4] {
        self.0.each_ref().map(|n| n.as_f64().unwrap_or(f64::NAN))
    }
}

impl PartialEq for BBox {
    fn eq(&self, other: &Self) -> bool {
        self.values() == other.values()
    }
}

/// One visually distinct text group with an optional fractional bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// `[x, y, w, h]` in `[0, 1]`, relative to the image; `x, y` is the top-left corner.
    pub bbox: Option<BBox>,
    /// `true` only for the verbatim-raw fallback chunk.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_error: bool,
}

impl Chunk {
    pub fn new(text: impl Into<String>, bbox: Option<[f64; 4]>) -> Self {
        Self::with_bbox(text, bbox.and_then(BBox::from_values))
    }

    pub fn with_bbox(text: impl Into<String>, bbox: Option<BBox>) -> Self {
        Self {
            text: text.into(),
            bbox,
            parse_error: false,
        }
    }

    /// The chunk emitted when a reply could not be repaired.
    pub fn raw_fallback(raw: impl Into<String>) -> Self {
        Self {
            text: raw.into(),
            bbox: None,
            parse_error: true,
        }
    }
}

/// Format-tagged payload for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "content", rename_all = "lowercase")]
pub enum PageContent {
    Text(String),
    Html(String),
    Json(Vec<Chunk>),
}

impl PageContent {
    /// `true` if the page is the unparseable-reply fallback.
    pub fn has_parse_error(&self) -> bool {
        matches!(self, PageContent::Json(chunks) if chunks.iter().any(|c| c.parse_error))
    }
}

/// Result of one processed page. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// `page N` for PDFs, the file name for images.
    pub label: String,
    /// 1-based PDF page number; `None` for image inputs.
    pub page_num: Option<usize>,
    pub content: PageContent,
    /// The reply hit the output-token budget.
    pub truncated: bool,
    /// Length of the raw aggregated reply, before repair.
    pub raw_chars: usize,
    pub duration_ms: u64,
}

/// Ordered page results of one run.
#[derive(Debug, Clone)]
pub struct Document {
    pub format: OutputFormat,
    pub pages: Vec<PageResult>,
}

#[derive(Serialize)]
struct SourceRegions<'a> {
    source: &'a str,
    regions: &'a [Chunk],
}

impl Document {
    pub fn new(format: OutputFormat, pages: Vec<PageResult>) -> Self {
        Self { format, pages }
    }

    /// Serialise the document per its format.
    ///
    /// * json, one page: the bare chunk array.
    /// * json, otherwise: `[{source, regions}, …]` in page order.
    /// * text: pages joined by a blank line.
    /// * html: fragments joined by a blank line, wrapped once in a minimal
    ///   `<!DOCTYPE html>` skeleton with a UTF-8 charset.
    ///
    /// JSON uses 2-space indentation and keeps non-ASCII characters as-is.
    pub fn render(&self) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let per_page: Vec<(&str, &[Chunk])> = self
                    .pages
                    .iter()
                    .map(|p| (p.label.as_str(), page_chunks(&p.content)))
                    .collect();
                if let [(_, chunks)] = per_page.as_slice() {
                    return Ok(serde_json::to_string_pretty(chunks)?);
                }
                let wrapped: Vec<SourceRegions<'_>> = per_page
                    .into_iter()
                    .map(|(source, regions)| SourceRegions { source, regions })
                    .collect();
                Ok(serde_json::to_string_pretty(&wrapped)?)
            }
            OutputFormat::Text => Ok(self.joined_text()),
            OutputFormat::Html => Ok(format!(
                "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"></head>\n<body>\n{}\n</body>\n</html>",
                self.joined_text()
            )),
        }
    }

    fn joined_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| page_text(&p.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn page_chunks(content: &PageContent) -> &[Chunk] {
    match content {
        PageContent::Json(chunks) => chunks,
        PageContent::Text(_) | PageContent::Html(_) => &[],
    }
}

fn page_text(content: &PageContent) -> &str {
    match content {
        PageContent::Text(s) | PageContent::Html(s) => s,
        PageContent::Json(_) => "",
    }
}

/// Run statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrStats {
    /// Pages in the source (1 for an image).
    pub total_pages: usize,
    pub processed_pages: usize,
    pub truncated_pages: usize,
    pub parse_error_pages: usize,
    pub render_duration_ms: u64,
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    /// The rendered document, ready to print or write.
    pub content: String,
    pub document: Document,
    pub stats: OcrStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(label: &str, content: PageContent) -> PageResult {
        PageResult {
            label: label.to_string(),
            page_num: None,
            content,
            truncated: false,
            raw_chars: 0,
            duration_ms: 0,
        }
    }

    #[test]
    fn json_single_page_is_bare_array() {
        let doc = Document::new(
            OutputFormat::Json,
            vec![page(
                "page 1",
                PageContent::Json(vec![Chunk::new("A", Some([0.0, 0.0, 0.5, 0.5]))]),
            )],
        );
        let out = doc.render().unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(v.is_array());
        assert_eq!(v[0]["text"], "A");
        assert!(v[0].get("source").is_none());
        assert!(v[0].get("parse_error").is_none());
        assert!(out.contains("\n  {"), "2-space indent expected: {out}");
    }

    #[test]
    fn json_two_pages_wrap_in_source_regions() {
        let doc = Document::new(
            OutputFormat::Json,
            vec![
                page("page 2", PageContent::Json(vec![Chunk::new("B", None)])),
                page("page 5", PageContent::Json(vec![Chunk::raw_fallback("oops")])),
            ],
        );
        let v: serde_json::Value = serde_json::from_str(&doc.render().unwrap()).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["source"], "page 2");
        assert_eq!(arr[0]["regions"][0]["text"], "B");
        assert!(arr[0]["regions"][0]["bbox"].is_null());
        assert_eq!(arr[1]["source"], "page 5");
        assert_eq!(arr[1]["regions"][0]["parse_error"], true);
    }

    #[test]
    fn json_keeps_non_ascii() {
        let doc = Document::new(
            OutputFormat::Json,
            vec![page("p", PageContent::Json(vec![Chunk::new("Prénom : Éloïse", None)]))],
        );
        assert!(doc.render().unwrap().contains("Prénom : Éloïse"));
    }

    #[test]
    fn json_zero_pages_is_empty_array() {
        let doc = Document::new(OutputFormat::Json, vec![]);
        assert_eq!(doc.render().unwrap(), "[]");
    }

    #[test]
    fn text_joined_with_blank_line() {
        let doc = Document::new(
            OutputFormat::Text,
            vec![
                page("page 1", PageContent::Text("first".into())),
                page("page 2", PageContent::Text("second".into())),
            ],
        );
        assert_eq!(doc.render().unwrap(), "first\n\nsecond");
    }

    #[test]
    fn html_wrapped_once() {
        let doc = Document::new(
            OutputFormat::Html,
            vec![
                page("page 1", PageContent::Html("<p>a</p>".into())),
                page("page 2", PageContent::Html("<p>b</p>".into())),
            ],
        );
        let out = doc.render().unwrap();
        assert!(out.starts_with("<!DOCTYPE html>\n"));
        assert!(out.contains("<meta charset=\"UTF-8\">"));
        assert!(out.contains("<body>\n<p>a</p>\n\n<p>b</p>\n</body>"));
        assert_eq!(out.matches("<html>").count(), 1);
    }

    #[test]
    fn bbox_numbers_keep_their_spelling() {
        let chunk: Chunk = serde_json::from_str(r#"{"text":"A","bbox":[0,0.25,1,0.5]}"#).unwrap();
        assert_eq!(chunk, Chunk::new("A", Some([0.0, 0.25, 1.0, 0.5])));
        let doc = Document::new(OutputFormat::Json, vec![page("p", PageContent::Json(vec![chunk]))]);
        let out = doc.render().unwrap();
        assert!(out.contains("\"bbox\": [\n      0,\n      0.25,\n      1,\n      0.5\n    ]"), "{out}");
    }

    #[test]
    fn non_finite_bbox_dropped() {
        assert_eq!(Chunk::new("A", Some([f64::NAN, 0.0, 1.0, 1.0])).bbox, None);
    }

    #[test]
    fn parse_error_detection() {
        assert!(PageContent::Json(vec![Chunk::raw_fallback("x")]).has_parse_error());
        assert!(!PageContent::Json(vec![Chunk::new("x", None)]).has_parse_error());
        assert!(!PageContent::Text("x".into()).has_parse_error());
    }
}
