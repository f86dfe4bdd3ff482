//! Error types for the vision-ocr library.
//!
//! There is exactly one error type, [`OcrError`], and every variant is
//! **fatal**: the run stops and nothing is written to the result destination.
//!
//! What is deliberately *not* an error:
//!
//! * A model reply that cannot be parsed into chunks. The repair chain in
//!   [`crate::pipeline::repair`] always produces a chunk list and marks the
//!   degraded case with `parse_error = true`.
//! * A reply cut off by the output-token budget. That is reported through
//!   [`crate::output::PageResult::truncated`] and a `tracing` warning.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OcrError>;

/// All fatal errors returned by the vision-ocr library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file has a `.pdf` extension but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A page selector token is not an integer or an `N-M` pair.
    #[error("Invalid page selector '{selector}': cannot parse '{token}'\nExpected N, N-M, or a comma-separated list such as 2,4,7-9.")]
    InvalidPageSelector { selector: String, token: String },

    /// The requested backend name is not in the registry.
    #[error("Unknown backend '{name}'. Available: {available}")]
    UnknownBackend { name: String, available: String },

    /// The backend's endpoint identifier is not set.
    #[error("Missing endpoint identifier: set {env_var} in the environment or ./.env, or pass an explicit base URL.")]
    MissingCredential { env_var: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium failed to render a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// A rendered page could not be encoded as PNG.
    #[error("Image encoding failed for {label}: {detail}")]
    ImageEncoding { label: String, detail: String },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The request never produced an HTTP response (DNS, TLS, connect, timeout).
    #[error("Inference request to '{endpoint}' failed: {detail}")]
    Request { endpoint: String, detail: String },

    /// The endpoint answered with a non-success status.
    #[error("Inference endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response stream broke mid-way or carried an undecodable event.
    #[error("Malformed inference stream: {0}")]
    StreamDecode(String),

    // ── Conversation errors ───────────────────────────────────────────────
    /// An image was attached to a user turn other than the first one.
    #[error("Image attachments are only allowed on the first user turn (turn {turn} rejected)")]
    ImageAttachmentRejected { turn: usize },

    /// Batch mode was requested without any question.
    #[error("No questions provided. Pass them as arguments, with --questions-file, or use --interactive.")]
    NoQuestions,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an input file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialisation of the assembled document failed.
    #[error("Failed to serialise output: {0}")]
    Serialisation(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_selector_display_names_token() {
        let e = OcrError::InvalidPageSelector {
            selector: "1,x".into(),
            token: "x".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("'1,x'"), "got: {msg}");
        assert!(msg.contains("'x'"), "got: {msg}");
    }

    #[test]
    fn missing_credential_names_env_var() {
        let e = OcrError::MissingCredential {
            env_var: "QWEN3VL_POD_ID".into(),
        };
        assert!(e.to_string().contains("QWEN3VL_POD_ID"));
    }

    #[test]
    fn http_status_display() {
        let e = OcrError::HttpStatus {
            status: 524,
            body: "timeout".into(),
        };
        assert!(e.to_string().contains("HTTP 524"));
    }

    #[test]
    fn image_rejected_display() {
        let e = OcrError::ImageAttachmentRejected { turn: 3 };
        assert!(e.to_string().contains("turn 3"));
    }

    #[test]
    fn serde_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e: OcrError = err.into();
        assert!(e.to_string().starts_with("Failed to serialise output"));
    }
}
