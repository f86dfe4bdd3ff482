//! Instruction prompts sent to the vision model.
//!
//! The JSON prompt is a contract: it defines the output grammar that
//! [`crate::pipeline::repair`] parses. A change to the chunk shape here must
//! be mirrored in the repair chain.

use crate::config::OutputFormat;

/// Fill-zone rule shared by the HTML and JSON prompts.
pub const FILL_ZONE_RULE: &str = "Ignore dotted lines. Only transcribe actual alphanumeric text.";

/// Plain-text extraction.
pub const PROMPT_TEXT: &str = "Extract all the alphanumeric text from this image. \
Return plain text only, preserving the reading order. \
Ignore dotted lines. Ignore \".....\". Only transcribe actual alphanumeric text. \
Do NOT use HTML tags, XML, or any markup — plain text only. \
Do not describe the image, just return the extracted text.";

/// Semantic HTML body fragment.
pub const PROMPT_HTML: &str = "Extract all the alphanumeric text from this image and return it as clean HTML. \
Use semantic tags: <h1>–<h4> for headings, <p> for paragraphs, \
<table>/<tr>/<th>/<td> for tables, <ul>/<li> for lists. \
Preserve reading order and document structure. \
Return ONLY the HTML body content, no <html>/<head>/<body> wrapper. \
Ignore dotted lines. Only transcribe actual alphanumeric text.";

/// Text chunks with fractional bounding boxes.
pub const PROMPT_JSON: &str = r#"Perform OCR on this image. Return a JSON array where each element corresponds to one visually distinct text chunk — a group of characters that are close together and separated from neighbouring text by a visible gap. A single visual line may contain several independent chunks (e.g. a label on the left and a value on the right of the same row); each must be its own entry. Never merge text from different chunks into one entry, and never split a continuous block of characters into multiple entries. Ignore dotted lines. Only transcribe actual alphanumeric text.
Each element must have:
  - "text": the extracted text of that chunk
  - "bbox": [x, y, w, h] where x,y are the top-left corner coordinates and w,h are width and height, all as relative values between 0.0 and 1.0 (proportional to image dimensions)

Return ONLY the JSON array, no explanation, no markdown fences."#;

/// Map an output format to its fixed instruction text.
pub fn select(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Text => PROMPT_TEXT,
        OutputFormat::Html => PROMPT_HTML,
        OutputFormat::Json => PROMPT_JSON,
    }
}

// ── Question answering ───────────────────────────────────────────────────

/// System prompt for both batch and interactive question answering.
pub const ASK_SYSTEM_PROMPT: &str = "You are a precise document analysis assistant. \
Answer each question using only information visible in the provided image. \
Be concise and exact — return only the extracted value, no explanation.";

/// Build the numbered-question prompt for batch mode.
///
/// The reply is expected to be a JSON object keyed `"1"`, `"2"`, … in
/// question order.
pub fn batch_prompt(questions: &[String]) -> String {
    let mut lines = vec![
        "Answer the following questions about the image.".to_string(),
        "Return a JSON object with question numbers as keys (\"1\", \"2\", …) \
and the extracted answers as string values."
            .to_string(),
        "If the answer is not visible, use null.".to_string(),
        "Return ONLY the JSON object, no markdown fences.".to_string(),
        String::new(),
    ];
    lines.extend(
        questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q)),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_maps_each_format() {
        assert_eq!(select(OutputFormat::Text), PROMPT_TEXT);
        assert_eq!(select(OutputFormat::Html), PROMPT_HTML);
        assert_eq!(select(OutputFormat::Json), PROMPT_JSON);
    }

    #[test]
    fn json_prompt_states_chunk_contract() {
        assert!(PROMPT_JSON.contains("\"text\""));
        assert!(PROMPT_JSON.contains("\"bbox\": [x, y, w, h]"));
        assert!(PROMPT_JSON.contains("top-left"));
        assert!(PROMPT_JSON.contains("no markdown fences"));
        assert!(PROMPT_JSON.contains(FILL_ZONE_RULE));
    }

    #[test]
    fn html_prompt_forbids_document_wrapper() {
        assert!(PROMPT_HTML.contains("no <html>/<head>/<body> wrapper"));
        assert!(PROMPT_HTML.ends_with(FILL_ZONE_RULE));
    }

    #[test]
    fn text_prompt_forbids_markup() {
        assert!(PROMPT_TEXT.contains("plain text only"));
        assert!(!PROMPT_TEXT.contains("JSON"));
    }

    #[test]
    fn batch_prompt_numbers_questions() {
        let qs = vec!["Name?".to_string(), "Date?".to_string()];
        let p = batch_prompt(&qs);
        assert!(p.contains("\n\n1. Name?\n2. Date?"));
        assert!(p.starts_with("Answer the following questions"));
    }
}
