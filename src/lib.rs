//! # vision-ocr
//!
//! OCR documents through a remote vision-language model served by vLLM.
//!
//! ## Why this crate?
//!
//! Scanned forms defeat classic OCR: handwriting, stamps, dotted fill-in
//! lines, labels and values scattered across a row. A vision-language model
//! reads them the way a person does. This crate rasterises each page, sends
//! it to an OpenAI-compatible endpoint, and turns the streamed reply into
//! plain text, an HTML fragment, or a list of text chunks with bounding boxes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input    validate path, pick PDF or image source
//!  ├─ 2. Render   rasterise one page via pdfium (spawn_blocking)
//!  ├─ 3. Encode   PNG → data: URI
//!  ├─ 4. VLM      streamed chat completion, aggregated
//!  ├─ 5. Repair   JSON mode: recover the chunk list from malformed replies
//!  ├─ 6. Polish   collapse fill zones, strip stray markup
//!  └─ 7. Output   text / HTML document / JSON + per-run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vision_ocr::{ocr, BackendRegistry, OcrConfig, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = BackendRegistry::builtin();
//!     let profile = registry.get("qwen3")?;
//!     let config = OcrConfig::builder()
//!         .profile(profile)
//!         .endpoint(profile.endpoint(|k| std::env::var(k).ok())?)
//!         .format(OutputFormat::Json)
//!         .build()?;
//!     let output = ocr("form.pdf", &config).await?;
//!     println!("{}", output.content);
//!     eprintln!("{} pages, {} truncated", output.stats.processed_pages, output.stats.truncated_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr` and `ask` binaries (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vision-ocr = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chat;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chat::{ask_batch, BatchReport, Conversation, ImageAttachment, InteractiveSession};
pub use config::{
    resolve_pages, BackendProfile, BackendRegistry, Endpoint, OcrConfig, OcrConfigBuilder,
    OutputFormat, PageSelector,
};
pub use convert::{inspect, ocr, ocr_bytes, ocr_sync, ocr_to_file, run_pages};
pub use error::{OcrError, Result};
pub use output::{BBox, Chunk, Document, OcrOutput, OcrStats, PageContent, PageResult};
pub use pipeline::input::PageSource;
pub use pipeline::llm::{InferenceBackend, OpenAiCompatBackend};
pub use progress::{NoopProgressCallback, OcrProgressCallback, ProgressCallback};
pub use stream::{Completion, FinishReason, StreamAggregator, StreamChunk, TokenStream};
