//! Pipeline stages for page OCR.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the transport can be swapped without touching
//! the text processing.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ repair ──▶ postprocess
//! (path)    (pdfium)   (data:)   (SSE)   (json)     (fill zones)
//! ```
//!
//! 1. [`input`]  — validate the path and pick a [`input::PageSource`]
//! 2. [`render`] — rasterise one PDF page; runs in `spawn_blocking` because
//!    pdfium is not async-aware
//! 3. [`encode`] — PNG-encode and wrap images as `data:` URIs
//! 4. [`llm`]    — chat request types and the streaming transport; the only
//!    stage with network I/O
//! 5. [`repair`] — recover a chunk list from malformed JSON-mode replies
//! 6. [`postprocess`] — deterministic cleanup: fill zones, stray markup

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
pub mod repair;
