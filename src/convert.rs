//! Page orchestration: the OCR entry points.
//!
//! ## Why sequential?
//!
//! Every page goes render → request → aggregate → repair → normalise before
//! the next one starts. The endpoint is a single GPU pod that serialises
//! inference anyway; dispatching pages in parallel would only queue them on
//! the server while holding several page images in memory here.
//!
//! Any error aborts the run. Results are assembled only after the last page
//! succeeded, so a failed run never produces a partial document.

use crate::config::OcrConfig;
use crate::error::{OcrError, Result};
use crate::output::{Document, OcrOutput, OcrStats, PageResult};
use crate::pipeline::encode::RenderedPage;
use crate::pipeline::input::{self, PageSource};
use crate::pipeline::llm::{ChatMessage, ChatRequest, InferenceBackend, OpenAiCompatBackend};
use crate::pipeline::postprocess;
use crate::prompts;
use crate::stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// OCR a PDF or image file.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Every error is fatal: input validation (missing file, bad selector, no
/// endpoint) fails before any request is sent; rendering, transport and
/// stream errors abort the remaining pages. Unparseable model replies and
/// truncated replies are not errors, see [`PageResult`].
pub async fn ocr(input_path: impl AsRef<Path>, config: &OcrConfig) -> Result<OcrOutput> {
    let input_path = input_path.as_ref();
    info!("Starting OCR: {} ({} mode)", input_path.display(), config.format);

    let source = input::resolve_input(
        input_path,
        config.password.as_deref(),
        config.target_image_dim,
    )?;
    let backend = resolve_backend(config)?;
    run_pages(source.as_ref(), backend.as_ref(), config).await
}

/// Drive the page loop over an already resolved source and backend.
pub async fn run_pages(
    source: &dyn PageSource,
    backend: &dyn InferenceBackend,
    config: &OcrConfig,
) -> Result<OcrOutput> {
    let total_start = Instant::now();

    let total_pages = source.page_count().await?;
    let selection = select_pages(source, config, total_pages)?;
    debug!("Selected {} of {} pages", selection.len(), total_pages);
    if selection.is_empty() {
        warn!("Page selection matched no pages; output will be empty");
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(selection.len());
    }

    let prompt = prompts::select(config.format);
    let mut pages = Vec::with_capacity(selection.len());
    let mut render_duration_ms = 0u64;
    let mut inference_duration_ms = 0u64;

    for (i, &page_num) in selection.iter().enumerate() {
        let index = i + 1;
        let page_start = Instant::now();

        let rendered = source.render(page_num).await?;
        render_duration_ms += page_start.elapsed().as_millis() as u64;

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(&rendered.label, index, selection.len());
        }

        let llm_start = Instant::now();
        let request = page_request(config, prompt, &rendered);
        let token_stream = backend.stream_chat(&request).await?;
        let completion = stream::aggregate(token_stream, config.max_tokens).await?;
        inference_duration_ms += llm_start.elapsed().as_millis() as u64;

        if completion.truncated {
            debug!("{}: reply truncated", rendered.label);
        }

        let content = postprocess::finalize_page(&completion.text, config.format);
        if content.has_parse_error() {
            warn!("{}: reply was not valid chunk JSON, kept verbatim", rendered.label);
        }

        let result = PageResult {
            label: rendered.label,
            page_num: rendered.page_num,
            content,
            truncated: completion.truncated,
            raw_chars: completion.text.chars().count(),
            duration_ms: page_start.elapsed().as_millis() as u64,
        };
        debug!(
            "{}: {} chars in {}ms",
            result.label, result.raw_chars, result.duration_ms
        );

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_complete(
                &result.label,
                index,
                selection.len(),
                result.raw_chars,
                result.truncated,
            );
        }
        pages.push(result);
    }

    let document = Document::new(config.format, pages);
    let content = document.render()?;

    let stats = OcrStats {
        total_pages,
        processed_pages: document.pages.len(),
        truncated_pages: document.pages.iter().filter(|p| p.truncated).count(),
        parse_error_pages: document
            .pages
            .iter()
            .filter(|p| p.content.has_parse_error())
            .count(),
        render_duration_ms,
        inference_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "OCR complete: {}/{} pages, {}ms total",
        stats.processed_pages, total_pages, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(selection.len());
    }

    Ok(OcrOutput {
        content,
        document,
        stats,
    })
}

/// OCR a file and write the rendered document to `output_path`.
///
/// Uses atomic write (temp file + rename) so a failed run leaves no partial file.
pub async fn ocr_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &OcrConfig,
) -> Result<OcrStats> {
    let output = ocr(input_path, config).await?;
    write_atomic(output_path.as_ref(), &output.content).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`ocr`].
///
/// Creates a temporary tokio runtime internally.
pub fn ocr_sync(input_path: impl AsRef<Path>, config: &OcrConfig) -> Result<OcrOutput> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(ocr(input_path, config))
}

/// OCR an in-memory PDF or image.
///
/// `name_hint` supplies the file name (its extension selects PDF vs image
/// handling and the image MIME type; it is also the label of an image page).
/// The bytes are spilled into a managed temp directory that is removed on
/// return.
pub async fn ocr_bytes(bytes: &[u8], name_hint: &str, config: &OcrConfig) -> Result<OcrOutput> {
    let dir = tempfile::tempdir()
        .map_err(|e| OcrError::Internal(format!("tempdir: {e}")))?;
    let file_name = Path::new(name_hint)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "input".into());
    let path = dir.path().join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| OcrError::Internal(format!("tempfile write: {e}")))?;
    // `dir` is dropped (and the file deleted) when `ocr` returns
    ocr(&path, config).await
}

/// Page count of an input without contacting any inference backend.
///
/// Images always count as one page.
pub async fn inspect(input_path: impl AsRef<Path>, password: Option<&str>) -> Result<usize> {
    let source = input::resolve_input(input_path, password, crate::pipeline::render::DEFAULT_TARGET_DIM)?;
    source.page_count().await
}

/// The backend a run will use: the pre-built one, else a client for `endpoint`.
pub fn resolve_backend(config: &OcrConfig) -> Result<Arc<dyn InferenceBackend>> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    match config.endpoint {
        Some(ref endpoint) => {
            debug!("Using endpoint {:?}", endpoint);
            Ok(Arc::new(OpenAiCompatBackend::new(
                endpoint.clone(),
                config.request_timeout_secs,
            )?))
        }
        None => Err(OcrError::InvalidConfig(
            "no inference endpoint configured: set a backend profile or an explicit base URL"
                .to_string(),
        )),
    }
}

/// The per-page chat request: one user turn with the prompt and the page image.
pub fn page_request(config: &OcrConfig, prompt: &str, page: &RenderedPage) -> ChatRequest {
    ChatRequest::new(
        config.model.clone(),
        vec![ChatMessage::user_with_image(prompt, page.data_uri())],
        config.max_tokens,
        config.repetition_penalty,
    )
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn select_pages(source: &dyn PageSource, config: &OcrConfig, total: usize) -> Result<Vec<usize>> {
    if source.paginated() {
        return config.pages.resolve(total);
    }
    if !config.pages.is_all() {
        warn!("Page selection is ignored for image input");
    }
    Ok(vec![1])
}

async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let write_err = |e| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, content).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
