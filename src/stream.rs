//! Aggregation of a token-streamed completion.
//!
//! Replies are requested with `stream: true` even though we only use the
//! final text: a long single-shot request sits idle until the model is done,
//! and proxies in front of GPU pods drop idle connections (HTTP 524 after
//! ~100 s). Streaming keeps bytes flowing for the whole generation.

use crate::error::Result;
use futures::StreamExt;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// Why the server stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the reply.
    Stop,
    /// The output-token budget ran out.
    Length,
    /// Anything else the server reports (`content_filter`, `tool_calls`, …).
    Other(String),
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// One incremental unit of model output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            finish_reason: None,
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            delta: None,
            finish_reason: Some(reason),
        }
    }
}

/// A boxed stream of chunks as produced by an inference backend.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// The aggregated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Last terminal reason seen, if any.
    pub finish_reason: Option<FinishReason>,
    /// `finish_reason == Some(Length)`.
    pub truncated: bool,
}

/// Incremental concatenation of stream deltas.
///
/// A stream that ends without any terminal reason is not an error: the
/// completion is simply not truncated.
#[derive(Debug)]
pub struct StreamAggregator {
    text: String,
    finish_reason: Option<FinishReason>,
    chunks: usize,
    max_tokens: u32,
}

impl StreamAggregator {
    /// `max_tokens` is only used in the truncation warning.
    pub fn new(max_tokens: u32) -> Self {
        Self {
            text: String::new(),
            finish_reason: None,
            chunks: 0,
            max_tokens,
        }
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        self.chunks += 1;
        if let Some(delta) = chunk.delta {
            self.text.push_str(&delta);
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }
    }

    pub fn finish(self) -> Completion {
        let truncated = self.finish_reason == Some(FinishReason::Length);
        if truncated {
            warn!(
                "finish_reason=length: reply truncated, max_tokens ({}) is too small",
                self.max_tokens
            );
        }
        debug!(
            "Stream ended after {} chunks, {} chars, finish_reason={:?}",
            self.chunks,
            self.text.len(),
            self.finish_reason
        );
        Completion {
            text: self.text,
            finish_reason: self.finish_reason,
            truncated,
        }
    }
}

/// Drain `stream` into a [`Completion`].
///
/// A transport error mid-stream aborts the aggregation; text received so far
/// is discarded with it.
pub async fn aggregate<S>(stream: S, max_tokens: u32) -> Result<Completion>
where
    S: Stream<Item = Result<StreamChunk>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut agg = StreamAggregator::new(max_tokens);
    while let Some(chunk) = stream.next().await {
        agg.push(chunk?);
    }
    Ok(agg.finish())
}
