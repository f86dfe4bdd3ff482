//! CLI binary: ask targeted questions about one image.
//!
//! Batch mode sends every question in one request and prints a JSON report;
//! `--interactive` opens a multi-turn conversation where the image is sent
//! only with the first question.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use vision_ocr::chat::{is_exit_command, read_questions_file};
use vision_ocr::convert::resolve_backend;
use vision_ocr::{
    ask_batch, BackendRegistry, Endpoint, ImageAttachment, InteractiveSession, OcrConfig, OcrError,
};

const AFTER_HELP: &str = r#"EXAMPLES:
  # One question
  ask photo.jpg "What text appears above the word Name?"

  # Several questions, one request, JSON answers
  ask photo.jpg "Surname?" "Date of birth?" -o answers.json

  # Questions from a file (one per line, # comments allowed)
  ask photo.jpg --model chandra --questions-file questions.txt

  # Multi-turn conversation (server needs --enable-prefix-caching)
  ask photo.jpg --interactive

ENVIRONMENT VARIABLES:
  QWEN3VL_POD_ID     RunPod id of the qwen3-vl pod
  CHANDRA_POD_ID     RunPod id of the chandra pod
  OCR_BASE_URL       Explicit endpoint, overrides the pod id
  OCR_API_KEY        Bearer key sent to the endpoint (default: not-needed)
  Variables may also be set in ./.env; the process environment wins.
"#;

/// Ask questions about an image through a vision-language model.
#[derive(Parser, Debug)]
#[command(
    name = "ask",
    version,
    about = "Ask questions about an image through a vision-language model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file (JPEG, PNG, …).
    image: PathBuf,

    /// Questions to ask (one or more, quoted).
    questions: Vec<String>,

    /// Backend profile: qwen3 or chandra.
    #[arg(short, long, env = "OCR_MODEL", default_value = "qwen3")]
    model: String,

    /// Text file with one question per line.
    #[arg(short = 'f', long)]
    questions_file: Option<PathBuf>,

    /// Multi-turn mode; the image is sent with the first question only.
    #[arg(short, long)]
    interactive: bool,

    /// Write the JSON report to this file (batch mode only).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Explicit endpoint base URL; overrides the backend's pod id.
    #[arg(long, env = "OCR_BASE_URL")]
    base_url: Option<String>,

    /// Bearer key for the endpoint.
    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "OCR_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors and answers.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pod ids and keys may live in ./.env; load it before clap reads `env =` fallbacks.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if !cli.image.exists() {
        return Err(OcrError::FileNotFound {
            path: cli.image.clone(),
        }
        .into());
    }

    // ── Backend ──────────────────────────────────────────────────────────
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
    let config = OcrConfig::builder()
        .profile(profile)
        .endpoint(endpoint)
        .request_timeout_secs(cli.timeout)
        .build()
        .context("Invalid configuration")?;
    let backend = resolve_backend(&config)?;

    if !cli.quiet {
        eprintln!("Backend: {} ({})", profile.name, config.model);
        eprintln!("Loading image {}…", cli.image.display());
    }
    let image = ImageAttachment::from_file(&cli.image).await?;

    // ── Interactive mode ─────────────────────────────────────────────────
    if cli.interactive {
        let mut session =
            InteractiveSession::new(backend, config.model.clone(), config.repetition_penalty, image);
        eprintln!("Interactive mode: ask away (Ctrl+D or 'quit' to leave)\n");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("Question: ");
            io::stdout().flush().ok();
            let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
                break;
            };
            if is_exit_command(&line) {
                break;
            }
            let answer = session.ask(&line).await.context("Request failed")?;
            println!("Answer: {answer}\n");
        }
        return Ok(());
    }

    // ── Batch mode ───────────────────────────────────────────────────────
    let mut questions = cli.questions.clone();
    if let Some(ref path) = cli.questions_file {
        questions.extend(read_questions_file(path)?);
    }
    if questions.is_empty() {
        return Err(OcrError::NoQuestions.into());
    }

    if !cli.quiet {
        eprintln!("Sending {} question(s)…", questions.len());
    }
    let report = ask_batch(
        backend.as_ref(),
        &config.model,
        config.repetition_penalty,
        &image,
        questions,
    )
    .await
    .context("Request failed")?;
    let json = report.to_json_pretty()?;

    match cli.output {
        Some(ref path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !cli.quiet {
                eprintln!("Report written to {}", path.display());
            }
        }
        None => println!("{json}"),
    }

    Ok(())
}
