//! VLM interaction: chat request types and the streaming transport.
//!
//! The only stage with network I/O. Requests follow the OpenAI
//! chat-completions wire format, which vLLM serves on `/v1/chat/completions`.
//! All prompt wording lives in [`crate::prompts`]; this module only shapes
//! messages and moves bytes.
//!
//! ## Why a trait?
//!
//! The conversion loop and the conversation driver talk to an
//! [`InferenceBackend`], not to `reqwest` directly. Tests plug in a scripted
//! backend; production uses [`OpenAiCompatBackend`].
//!
//! ## No retries
//!
//! Any transport failure or non-2xx status is fatal for the run. A retry
//! would resend a multi-megabyte image to a GPU pod that is most likely
//! still busy with the previous request.

use crate::config::Endpoint;
use crate::error::{OcrError, Result};
use crate::stream::{FinishReason, StreamChunk, TokenStream};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, info};

/// Sampling temperature for every request: OCR wants the most likely reading.
pub const TEMPERATURE: f32 = 0.0;

// ── Request types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One element of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message body: plain text, or text plus images.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user turn carrying `text` followed by one inline image.
    pub fn user_with_image(text: impl Into<String>, data_uri: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: data_uri.into(),
                    },
                },
            ]),
        }
    }

    /// Number of image parts in this message.
    pub fn image_count(&self) -> usize {
        match &self.content {
            MessageContent::Text(_) => 0,
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                .count(),
        }
    }
}

/// Body of `POST /chat/completions`.
///
/// `repetition_penalty` is a vLLM sampling extension; it sits at the top
/// level of the body next to the standard fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub repetition_penalty: f32,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        repetition_penalty: f32,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: TEMPERATURE,
            max_tokens,
            repetition_penalty,
            stream: true,
        }
    }
}

// ── Backend seam ─────────────────────────────────────────────────────────

/// Something that answers a chat request with a token stream.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Send `request`; the returned stream yields reply fragments in order.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl OpenAiCompatBackend {
    /// `timeout_secs` bounds a whole request, streamed body included.
    pub fn new(endpoint: Endpoint, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client init failed: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.base_url)
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream> {
        let url = self.completions_url();
        info!(
            "POST {} (model={}, messages={}, max_tokens={})",
            url,
            request.model,
            request.messages.len(),
            request.max_tokens
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| OcrError::Request {
                endpoint: url.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Streaming reply from {}", url);
        Ok(sse_stream(response.bytes_stream()))
    }
}

// ── Server-sent events ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes may be split anywhere; only complete lines are decoded. Lines
/// other than `data:` (comments, `event:`, `id:`, keep-alives) are skipped,
/// and everything after `data: [DONE]` is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Append raw bytes and return every chunk completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            out.extend(self.decode_line(line.trim_end_matches(['\r', '\n'])));
        }
        out
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<Result<StreamChunk>> {
        let rest = std::mem::take(&mut self.buf);
        if self.done || rest.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&rest).into_owned();
        self.decode_line(line.trim_end()).into_iter().collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<Result<StreamChunk>> {
        let payload = line.strip_prefix("data:")?.trim();
        if payload == "[DONE]" {
            self.done = true;
            return None;
        }
        if payload.is_empty() {
            return None;
        }
        parse_event(payload)
    }
}

fn parse_event(payload: &str) -> Option<Result<StreamChunk>> {
    let event: StreamEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => return Some(Err(OcrError::StreamDecode(format!("{e}: {payload}")))),
    };
    if let Some(err) = event.error {
        return Some(Err(OcrError::StreamDecode(err.to_string())));
    }
    // Usage-only events carry no choices.
    let choice = event.choices.into_iter().next()?;
    Some(Ok(StreamChunk {
        delta: choice.delta.and_then(|d| d.content),
        finish_reason: choice.finish_reason.as_deref().map(FinishReason::from),
    }))
}

/// Adapt a raw byte stream into a [`TokenStream`].
pub fn sse_stream<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::new(), VecDeque::new(), false);
    Box::pin(futures::stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending, mut eof)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, eof)));
                }
                if eof || decoder.is_done() {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        eof = true;
                        pending.push_back(Err(OcrError::StreamDecode(e.to_string())));
                    }
                    None => {
                        eof = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    ))
}
