//! Post-processing: deterministic cleanup of model replies.
//!
//! Vision models read the dotted and underscored blanks of paper forms
//! character by character, producing long runs like `..............` that
//! carry no content. [`normalize_fill_zones`] collapses them to a single
//! `___` placeholder so the "there was a blank here" signal survives without
//! the noise. The remaining helpers undo markup the model was told not to
//! produce.

use crate::config::OutputFormat;
use crate::output::{Chunk, PageContent};
use crate::pipeline::repair;
use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder that replaces a fill zone.
pub const FILL_PLACEHOLDER: &str = "___";

/// Turn an aggregated reply into the page payload for `format`.
///
/// * text: strip tags, collapse spaces, normalise fill zones
/// * html: normalise fill zones
/// * json: repair into chunks, normalise each chunk's text
pub fn finalize_page(raw: &str, format: OutputFormat) -> PageContent {
    match format {
        OutputFormat::Text => PageContent::Text(normalize_fill_zones(&strip_markup(raw))),
        OutputFormat::Html => PageContent::Html(normalize_fill_zones(raw)),
        OutputFormat::Json => PageContent::Json(
            repair::repair(raw)
                .into_iter()
                .map(|chunk| Chunk {
                    text: normalize_fill_zones(&chunk.text),
                    ..chunk
                })
                .collect(),
        ),
    }
}

// ── Fill zones ───────────────────────────────────────────────────────────

// A run of 4+ identical fill characters, plus any underscores and further
// runs glued to it, so the replacement never forms a new 4-run with its
// neighbours and a second pass is a no-op.
static RE_FILL_ZONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_*(?:(?:\.{4,}|-{4,}|_{4,})_*)+").unwrap());

/// Collapse every run of four or more `.`, `-` or `_` into `___`.
///
/// Pure and idempotent. Runs of three or fewer are left alone.
pub fn normalize_fill_zones(text: &str) -> String {
    RE_FILL_ZONE.replace_all(text, FILL_PLACEHOLDER).into_owned()
}

// ── Markup ───────────────────────────────────────────────────────────────

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

/// Replace markup tags with a space, squeeze repeated spaces, trim.
///
/// Line breaks are kept: they carry the reading order of plain-text output.
pub fn strip_markup(text: &str) -> String {
    let untagged = RE_TAG.replace_all(text, " ");
    RE_SPACES.replace_all(&untagged, " ").trim().to_string()
}

// ── Code fences ──────────────────────────────────────────────────────────

/// Drop a surrounding markdown code fence, if the trimmed text opens with one.
///
/// The first line (with any language tag) is removed; the last line is
/// removed only if it is a bare fence. Text that does not open with a fence
/// is returned trimmed.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.split('\n').skip(1).collect();
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_zone_dots() {
        assert_eq!(normalize_fill_zones("Name...........: John"), "Name___: John");
    }

    #[test]
    fn fill_zone_each_char_kind() {
        assert_eq!(normalize_fill_zones("a----b"), "a___b");
        assert_eq!(normalize_fill_zones("a________b"), "a___b");
        assert_eq!(normalize_fill_zones("Sign: ...... Date: ----"), "Sign: ___ Date: ___");
    }

    #[test]
    fn short_runs_unchanged() {
        for s in ["Wait...", "a--b", "x__y", "1.2.3", "- - - -", "._-._-", ""] {
            assert_eq!(normalize_fill_zones(s), s);
        }
    }

    #[test]
    fn mixed_runs_need_four_identical() {
        assert_eq!(normalize_fill_zones("..--..--"), "..--..--");
    }

    #[test]
    fn adjacent_zones_collapse_to_one() {
        assert_eq!(normalize_fill_zones("....----"), "___");
        assert_eq!(normalize_fill_zones("__......"), "___");
        assert_eq!(normalize_fill_zones("....__"), "___");
    }

    #[test]
    fn fill_zone_idempotent() {
        let samples = [
            "Name...........: John",
            "__....",
            "....----....",
            "...____",
            "a___.....___b",
            "-----_____-----",
            "Total ..... 12,00 €",
            "___",
            "____",
        ];
        for s in samples {
            let once = normalize_fill_zones(s);
            assert_eq!(normalize_fill_zones(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn strip_markup_removes_tags() {
        assert_eq!(strip_markup("<p>Hello</p>  <b>world</b>"), "Hello world");
        assert_eq!(strip_markup("line1\nline2"), "line1\nline2");
        assert_eq!(strip_markup("a < b"), "a < b");
    }

    #[test]
    fn strip_fence_with_language() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  ```\n[1]\n```  "), "[1]");
    }

    #[test]
    fn strip_fence_without_closing() {
        assert_eq!(strip_code_fence("```json\n[1, 2]"), "[1, 2]");
    }

    #[test]
    fn strip_fence_passthrough() {
        assert_eq!(strip_code_fence("  [1]  "), "[1]");
    }

    #[test]
    fn finalize_text_strips_then_normalises() {
        let page = finalize_page("<h1>Form</h1>\nName: <i>.......</i>", OutputFormat::Text);
        assert_eq!(page, PageContent::Text("Form \nName: ___".into()));
    }

    #[test]
    fn finalize_html_keeps_tags() {
        let page = finalize_page("<p>Date: ______</p>", OutputFormat::Html);
        assert_eq!(page, PageContent::Html("<p>Date: ___</p>".into()));
    }

    #[test]
    fn finalize_json_normalises_chunk_text() {
        let page = finalize_page(r#"[{"text":"Nom.......","bbox":[0.1,0.1,0.2,0.05]}]"#, OutputFormat::Json);
        match page {
            PageContent::Json(chunks) => {
                assert_eq!(chunks.len(), 1);
                assert_eq!(chunks[0].text, "Nom___");
                assert_eq!(chunks[0].bbox.as_ref().map(|b| b.values()), Some([0.1, 0.1, 0.2, 0.05]));
            }
            other => panic!("expected json, got {other:?}"),
        }
    }
}
