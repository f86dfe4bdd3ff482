//! Question answering over a single image.
//!
//! Two modes share the same system prompt:
//!
//! * **batch**: every question goes out in one request and the model answers
//!   with a JSON object keyed by question number ([`ask_batch`]);
//! * **interactive**: a multi-turn [`InteractiveSession`]. The image is sent
//!   once, on the first user turn; later turns are text only and rely on the
//!   server's prefix cache to keep the image in context.
//!
//! The conversation is an append-only [`Conversation`] log. The one-image
//! rule is checked when a turn is appended, not tracked with a flag.

use crate::error::{OcrError, Result};
use crate::pipeline::encode;
use crate::pipeline::input::mime_for_path;
use crate::pipeline::llm::{ChatMessage, ChatRequest, InferenceBackend, Role};
use crate::pipeline::postprocess::strip_code_fence;
use crate::prompts::{batch_prompt, ASK_SYSTEM_PROMPT};
use crate::stream;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output budget for a batch reply.
pub const BATCH_MAX_TOKENS: u32 = 1024;

/// Output budget for one interactive reply.
pub const INTERACTIVE_MAX_TOKENS: u32 = 512;

/// An image inlined as a `data:` URI.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    data_uri: String,
}

impl std::fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("len", &self.data_uri.len())
            .finish()
    }
}

impl ImageAttachment {
    pub fn new(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            data_uri: encode::data_uri(mime_type, bytes),
        }
    }

    /// Read an image file; the MIME type comes from its extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OcrError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| OcrError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("Loaded image {} ({} bytes)", path.display(), bytes.len());
        Ok(Self::new(mime_for_path(path), &bytes))
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }
}

// ── Conversation log ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl Turn {
    fn to_message(&self) -> ChatMessage {
        match (&self.role, &self.image) {
            (Role::User, Some(image)) => ChatMessage::user_with_image(&self.text, image.data_uri()),
            (Role::System, _) => ChatMessage::system(&self.text),
            (Role::User, None) => ChatMessage::user(&self.text),
            (Role::Assistant, _) => ChatMessage::assistant(&self.text),
        }
    }
}

/// Append-only message history.
///
/// An image may be attached to a user turn only if no earlier user turn
/// exists, so at most one turn (the first user turn) ever carries one.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation opened by a system turn.
    pub fn with_system(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::System,
                text: text.into(),
                image: None,
            }],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>, image: Option<ImageAttachment>) -> Result<()> {
        let prior_user_turns = self.user_turns();
        if image.is_some() && prior_user_turns > 0 {
            return Err(OcrError::ImageAttachmentRejected {
                turn: prior_user_turns + 1,
            });
        }
        self.turns.push(Turn {
            role: Role::User,
            text: text.into(),
            image,
        });
        Ok(())
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn user_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::User).count()
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(Turn::to_message).collect()
    }
}

// ── Interactive mode ─────────────────────────────────────────────────────

/// `true` for input that ends an interactive session: blank, `quit`, `exit`, `q`.
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || ["quit", "exit", "q"].iter().any(|c| line.eq_ignore_ascii_case(c))
}

/// A multi-turn conversation about one image.
pub struct InteractiveSession {
    backend: Arc<dyn InferenceBackend>,
    model: String,
    repetition_penalty: f32,
    conversation: Conversation,
    pending_image: Option<ImageAttachment>,
}

impl InteractiveSession {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        model: impl Into<String>,
        repetition_penalty: f32,
        image: ImageAttachment,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            repetition_penalty,
            conversation: Conversation::with_system(ASK_SYSTEM_PROMPT),
            pending_image: Some(image),
        }
    }

    /// Ask one question and record both turns.
    ///
    /// The log only changes once a reply arrives: on error the session is
    /// left as it was, image still pending, so the question can be asked again.
    pub async fn ask(&mut self, question: &str) -> Result<String> {
        let mut candidate = self.conversation.clone();
        candidate.push_user(question.trim(), self.pending_image.clone())?;

        let request = ChatRequest::new(
            self.model.clone(),
            candidate.to_messages(),
            INTERACTIVE_MAX_TOKENS,
            self.repetition_penalty,
        );
        let token_stream = self.backend.stream_chat(&request).await?;
        let completion = stream::aggregate(token_stream, INTERACTIVE_MAX_TOKENS).await?;

        candidate.push_assistant(completion.text.clone());
        self.conversation = candidate;
        self.pending_image = None;
        debug!(
            "Turn {}: {} chars",
            self.conversation.user_turns(),
            completion.text.len()
        );
        Ok(completion.text)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}

// ── Batch mode ───────────────────────────────────────────────────────────

/// Answers to a batch of questions, serialised in question order as
/// `{"1": {"question": …, "answer": …}, …}`.
///
/// When the reply was not a JSON object every answer is `null` and the raw
/// reply is kept under a trailing `"error"` key.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    questions: Vec<String>,
    answers: Map<String, Value>,
    error: Option<String>,
}

impl BatchReport {
    pub fn new(questions: Vec<String>, raw_reply: &str) -> Self {
        let (answers, error) = match parse_batch_answers(raw_reply) {
            Ok(answers) => (answers, None),
            Err(raw) => (Map::new(), Some(raw)),
        };
        Self {
            questions,
            answers,
            error,
        }
    }

    /// Answer to question `n` (1-based); `Null` when the model gave none.
    pub fn answer(&self, n: usize) -> &Value {
        self.answers.get(&n.to_string()).unwrap_or(&Value::Null)
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// The raw reply, if it could not be parsed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Serialize)]
struct Entry<'a> {
    question: &'a str,
    answer: &'a Value,
}

impl Serialize for BatchReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.questions.len() + usize::from(self.error.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (i, question) in self.questions.iter().enumerate() {
            let entry = Entry {
                question,
                answer: self.answer(i + 1),
            };
            map.serialize_entry(&(i + 1).to_string(), &entry)?;
        }
        if let Some(ref raw) = self.error {
            map.serialize_entry("error", raw)?;
        }
        map.end()
    }
}

/// Parse a batch reply into its answer object.
///
/// The reply is fence-stripped first. Anything other than a JSON object
/// comes back as `Err(raw)` with the stripped text.
pub fn parse_batch_answers(raw: &str) -> std::result::Result<Map<String, Value>, String> {
    let text = strip_code_fence(raw);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(text),
    }
}

/// Ask every question about `image` in a single request.
pub async fn ask_batch(
    backend: &dyn InferenceBackend,
    model: &str,
    repetition_penalty: f32,
    image: &ImageAttachment,
    questions: Vec<String>,
) -> Result<BatchReport> {
    if questions.is_empty() {
        return Err(OcrError::NoQuestions);
    }
    info!("Sending {} question(s) to {}", questions.len(), model);

    let mut conversation = Conversation::with_system(ASK_SYSTEM_PROMPT);
    conversation.push_user(batch_prompt(&questions), Some(image.clone()))?;

    let request = ChatRequest::new(
        model,
        conversation.to_messages(),
        BATCH_MAX_TOKENS,
        repetition_penalty,
    );
    let token_stream = backend.stream_chat(&request).await?;
    let completion = stream::aggregate(token_stream, BATCH_MAX_TOKENS).await?;

    let report = BatchReport::new(questions, &completion.text);
    if report.error().is_some() {
        warn!("Batch reply was not a JSON object; answers left empty");
    }
    Ok(report)
}

/// Questions from text: one per line, blank lines and `#` comments skipped.
pub fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read questions from a file, see [`parse_questions`].
pub fn read_questions_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => OcrError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => OcrError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    Ok(parse_questions(&text))
}
