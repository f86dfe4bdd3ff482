//! CLI binary: OCR a PDF or image through a vLLM-hosted vision model.
//!
//! A thin shim over the library crate that maps CLI flags to `OcrConfig`
//! and prints the document to stdout or a file.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vision_ocr::{
    inspect, ocr, ocr_to_file, BackendRegistry, Endpoint, OcrConfig, OcrError,
    OcrProgressCallback, OutputFormat, PageSelector, ProgressCallback,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` tells us how many pages there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Reading");
        self.bar.reset_eta();
    }

    fn take_elapsed_secs(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl OcrProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting OCR of {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, label: &str, _index: usize, _total: usize) {
        if let Ok(mut t) = self.page_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(label.to_string());
    }

    fn on_page_complete(
        &self,
        label: &str,
        index: usize,
        total: usize,
        chars: usize,
        truncated: bool,
    ) {
        let elapsed = self.take_elapsed_secs();
        let mark = if truncated { yellow("⚠") } else { green("✓") };
        let note = if truncated {
            yellow("  truncated, raise --max-tokens")
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<16} {:<8}  {}{}",
            mark,
            index,
            total,
            label,
            dim(&format!("{chars:>5} chars")),
            dim(&format!("{elapsed:.1}s")),
            note,
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} page(s) read", green("✔"), bold(&total_pages.to_string()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Plain text of every page (stdout)
  ocr scan.pdf

  # Selected pages as chunks with bounding boxes
  ocr --format json --pages 2,4,7-9 form.pdf -o form.json

  # A photo, HTML output, through the chandra backend
  ocr --model chandra --format html photo.jpg -o photo.html

  # Any OpenAI-compatible server
  ocr --base-url http://localhost:8000/v1 scan.pdf

  # Page count only (no endpoint needed)
  ocr --inspect-only scan.pdf

BACKENDS:
  Name      Model      Endpoint variable
  ───────   ────────   ─────────────────
  qwen3     qwen3-vl   QWEN3VL_POD_ID   (default)
  chandra   chandra    CHANDRA_POD_ID

  A pod id maps to https://<pod>-8000.proxy.runpod.net/v1.

ENVIRONMENT VARIABLES:
  QWEN3VL_POD_ID     RunPod id of the qwen3-vl pod
  CHANDRA_POD_ID     RunPod id of the chandra pod
  OCR_BASE_URL       Explicit endpoint, overrides the pod id
  OCR_API_KEY        Bearer key sent to the endpoint (default: not-needed)
  PDFIUM_LIB_PATH    Path to libpdfium (else ./ then the system library)
  RUST_LOG           Log filter, e.g. vision_ocr=debug
  Variables may also be set in ./.env; the process environment wins.
"#;

/// OCR PDF files and images through a vision-language model.
#[derive(Parser, Debug)]
#[command(
    name = "ocr",
    version,
    about = "OCR PDF files and images through a vision-language model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or image file (JPEG, PNG, WebP, …).
    input: PathBuf,

    /// Backend profile: qwen3 or chandra.
    #[arg(short, long, env = "OCR_MODEL", default_value = "qwen3")]
    model: String,

    /// Pages to process (PDF only): 3, 1-5, 2,4,7-9. Default: all.
    #[arg(long, env = "OCR_PAGES", default_value = "all")]
    pages: String,

    /// Output format: text, html, or json (text chunks with bounding boxes).
    #[arg(short, long, env = "OCR_FORMAT", default_value = "text")]
    format: OutputFormat,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "OCR_OUTPUT")]
    output: Option<PathBuf>,

    /// Explicit endpoint base URL; overrides the backend's pod id.
    #[arg(long, env = "OCR_BASE_URL")]
    base_url: Option<String>,

    /// Bearer key for the endpoint.
    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Max output tokens per page. Default: the backend's budget.
    #[arg(long, env = "OCR_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Repetition penalty. Default: the backend's value.
    #[arg(long, env = "OCR_REPETITION_PENALTY")]
    repetition_penalty: Option<f32>,

    /// Longest edge of a rendered PDF page, in pixels (256–4096).
    #[arg(long, env = "OCR_IMAGE_DIM", default_value_t = 1600,
          value_parser = clap::value_parser!(u32).range(256..=4096))]
    image_dim: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "OCR_PDF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Per-request timeout in seconds, covering the whole streamed reply.
    #[arg(long, env = "OCR_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// Print the page count only; no endpoint needed.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pod ids and keys may live in ./.env; load it before clap reads `env =` fallbacks.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; warnings (truncation, parse
    // errors) still get through.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if !cli.input.exists() {
        return Err(OcrError::FileNotFound {
            path: cli.input.clone(),
        }
        .into());
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let pages = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to inspect input")?;
        println!("File:   {}", cli.input.display());
        println!("Pages:  {pages}");
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn OcrProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    if !cli.quiet {
        eprintln!("{} {} ({})", dim("Backend:"), cli.model, config.model);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = ocr_to_file(&cli.input, output_path, &config)
            .await
            .context("OCR failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  {}ms  →  {}",
                if stats.truncated_pages + stats.parse_error_pages == 0 {
                    green("✔")
                } else {
                    yellow("⚠")
                },
                stats.processed_pages,
                stats.total_pages,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            print_degraded(stats.truncated_pages, stats.parse_error_pages);
        }
    } else {
        let output = ocr(&cli.input, &config).await.context("OCR failed")?;

        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.content.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.content.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }

        if !cli.quiet && !show_progress {
            eprintln!(
                "Read {}/{} pages in {}ms",
                output.stats.processed_pages, output.stats.total_pages, output.stats.total_duration_ms
            );
        }
        if !cli.quiet {
            print_degraded(output.stats.truncated_pages, output.stats.parse_error_pages);
        }
    }

    Ok(())
}

fn print_degraded(truncated: usize, parse_errors: usize) {
    if truncated > 0 {
        eprintln!("   {} page(s) truncated by --max-tokens", yellow(&truncated.to_string()));
    }
    if parse_errors > 0 {
        eprintln!("   {} page(s) kept as raw text (parse_error)", yellow(&parse_errors.to_string()));
    }
}

/// Map CLI args to `OcrConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<OcrConfig> {
    let registry = BackendRegistry::builtin();
    let profile = registry.get(&cli.model)?;

    let endpoint = match cli.base_url {
        Some(ref url) if !url.trim().is_empty() => Endpoint::new(url.trim()),
        _ => profile.endpoint(|key| std::env::var(key).ok())?,
    };
    let endpoint = match cli.api_key {
        Some(ref key) => endpoint.with_api_key(key),
        None => endpoint,
    };

    let pages: PageSelector = cli.pages.parse()?;

    let mut builder = OcrConfig::builder()
        .profile(profile)
        .format(cli.format)
        .pages(pages)
        .target_image_dim(cli.image_dim)
        .endpoint(endpoint)
        .request_timeout_secs(cli.timeout);

    if let Some(n) = cli.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(p) = cli.repetition_penalty {
        builder = builder.repetition_penalty(p);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
