//! Configuration types for OCR runs.
//!
//! All run behaviour is controlled through [`OcrConfig`], built via its
//! [`OcrConfigBuilder`]. Backend choice is an explicit value
//! ([`BackendProfile`] looked up in a [`BackendRegistry`]) rather than
//! process-wide state, so one process can drive several endpoints at once.

use crate::error::{OcrError, Result};
use crate::pipeline::llm::InferenceBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for an OCR run.
///
/// # Example
/// ```rust
/// use vision_ocr::{BackendRegistry, OcrConfig, OutputFormat, PageSelector};
///
/// let registry = BackendRegistry::builtin();
/// let config = OcrConfig::builder()
///     .profile(registry.get("chandra").unwrap())
///     .format(OutputFormat::Json)
///     .pages("2,4,7-9".parse::<PageSelector>().unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(config.model, "chandra");
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// Model identifier sent with every request. Default: `qwen3-vl`.
    pub model: String,

    /// Requested output format. Default: [`OutputFormat::Text`].
    pub format: OutputFormat,

    /// Which PDF pages to process. Ignored for image inputs. Default: all.
    pub pages: PageSelector,

    /// Maximum output tokens per page. Default: 8192.
    ///
    /// Dense forms in JSON mode easily exceed 4 000 tokens because every
    /// chunk carries its own bounding box. When the budget runs out the page
    /// is flagged `truncated` and still processed.
    pub max_tokens: u32,

    /// Repetition-penalty hint forwarded to the server. Default: 1.15.
    ///
    /// Vision models tend to loop on dotted fill lines; a mild penalty breaks
    /// the loop without hurting normal text.
    pub repetition_penalty: f32,

    /// Longest edge, in pixels, of a rendered PDF page. Range: 256–4096. Default: 1600.
    pub target_image_dim: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Endpoint used when no pre-built backend is supplied.
    pub endpoint: Option<Endpoint>,

    /// Pre-constructed inference backend. Takes precedence over `endpoint`.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Per-request timeout in seconds, covering the whole streamed reply. Default: 600.
    pub request_timeout_secs: u64,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: "qwen3-vl".to_string(),
            format: OutputFormat::default(),
            pages: PageSelector::default(),
            max_tokens: 8192,
            repetition_penalty: 1.15,
            target_image_dim: 1600,
            password: None,
            endpoint: None,
            backend: None,
            request_timeout_secs: 600,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("model", &self.model)
            .field("format", &self.format)
            .field("pages", &self.pages)
            .field("max_tokens", &self.max_tokens)
            .field("repetition_penalty", &self.repetition_penalty)
            .field("target_image_dim", &self.target_image_dim)
            .field("endpoint", &self.endpoint.as_ref().map(|e| &e.base_url))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn InferenceBackend>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    /// Copy model name, token budget and repetition penalty from a profile.
    pub fn profile(mut self, profile: &BackendProfile) -> Self {
        self.config.model = profile.model_name.clone();
        self.config.max_tokens = profile.max_tokens;
        self.config.repetition_penalty = profile.repetition_penalty;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn pages(mut self, pages: PageSelector) -> Self {
        self.config.pages = pages;
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn repetition_penalty(mut self, p: f32) -> Self {
        self.config.repetition_penalty = p;
        self
    }

    pub fn target_image_dim(mut self, px: u32) -> Self {
        self.config.target_image_dim = px;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(OcrError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if !(256..=4096).contains(&c.target_image_dim) {
            return Err(OcrError::InvalidConfig(format!(
                "Image dimension must be 256–4096, got {}",
                c.target_image_dim
            )));
        }
        if !(c.repetition_penalty > 0.0) {
            return Err(OcrError::InvalidConfig(format!(
                "Repetition penalty must be > 0, got {}",
                c.repetition_penalty
            )));
        }
        if c.model.trim().is_empty() {
            return Err(OcrError::InvalidConfig("Model name must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Output format ────────────────────────────────────────────────────────

/// Canonical output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain reading-order text. (default)
    #[default]
    Text,
    /// Semantic HTML body fragments.
    Html,
    /// Array of `{text, bbox}` chunks.
    Json,
}

impl FromStr for OutputFormat {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "html" => Ok(OutputFormat::Html),
            "json" => Ok(OutputFormat::Json),
            other => Err(OcrError::InvalidConfig(format!(
                "Unknown output format '{other}' (expected text, html or json)"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Text => "text",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        })
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// A page-selector expression, resolved against the page count at run time.
///
/// Syntax: `N`, `N-M`, or comma-separated combinations, 1-based and
/// inclusive, e.g. `"2,4,7-9"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelector {
    /// Every page, in order. (default)
    #[default]
    All,
    /// A selector expression, validated when resolved.
    Expr(String),
}

impl FromStr for PageSelector {
    type Err = OcrError;

    /// `"all"` (any case) or an empty string selects every page; anything
    /// else is kept as an expression and checked eagerly so CLI input fails
    /// before any remote call.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(PageSelector::All);
        }
        // Syntax check only; the real page count is not known yet.
        resolve_pages(Some(trimmed), 0)?;
        Ok(PageSelector::Expr(trimmed.to_string()))
    }
}

impl PageSelector {
    pub fn is_all(&self) -> bool {
        matches!(self, PageSelector::All)
    }

    /// Resolve into a strictly ascending list of distinct 1-based page numbers.
    pub fn resolve(&self, total: usize) -> Result<Vec<usize>> {
        match self {
            PageSelector::All => resolve_pages(None, total),
            PageSelector::Expr(expr) => resolve_pages(Some(expr), total),
        }
    }
}

/// Parse a selector expression against a known page count.
///
/// * `N` is kept only when `1 <= N <= total`.
/// * `N-M` contributes `N..=min(M, total)`. The start is not clamped, so a
///   start beyond `total` simply yields nothing; page 0 is never emitted.
/// * `None` selects `1..=total`.
pub fn resolve_pages(selector: Option<&str>, total: usize) -> Result<Vec<usize>> {
    let Some(selector) = selector else {
        return Ok((1..=total).collect());
    };

    let invalid = |token: &str| OcrError::InvalidPageSelector {
        selector: selector.to_string(),
        token: token.to_string(),
    };

    let mut pages = BTreeSet::new();
    for token in selector.split(',') {
        let token = token.trim();
        if let Some((start, end)) = token.split_once('-') {
            let start: usize = start.trim().parse().map_err(|_| invalid(token))?;
            let end: usize = end.trim().parse().map_err(|_| invalid(token))?;
            pages.extend((start..=end.min(total)).filter(|&p| p >= 1));
        } else {
            let page: usize = token.parse().map_err(|_| invalid(token))?;
            if (1..=total).contains(&page) {
                pages.insert(page);
            }
        }
    }
    Ok(pages.into_iter().collect())
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Where and how to reach an OpenAI-compatible inference server.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL up to and including `/v1`.
    pub base_url: String,
    /// Opaque bearer credential, passed through untouched.
    pub api_key: String,
}

impl Endpoint {
    /// Placeholder credential accepted by unauthenticated vLLM servers.
    pub const NO_KEY: &'static str = "not-needed";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: Self::NO_KEY.to_string(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Endpoint of a RunPod pod exposing vLLM on port 8000.
    pub fn runpod(pod_id: &str) -> Self {
        Self::new(format!("https://{}-8000.proxy.runpod.net/v1", pod_id.trim()))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Static description of one deployed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Short name used on the command line (`qwen3`, `chandra`).
    pub name: String,
    /// Model identifier the server was started with.
    pub model_name: String,
    /// Environment variable holding the pod identifier.
    pub endpoint_env: String,
    pub repetition_penalty: f32,
    pub max_tokens: u32,
}

impl BackendProfile {
    pub fn new(
        name: impl Into<String>,
        model_name: impl Into<String>,
        endpoint_env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model_name: model_name.into(),
            endpoint_env: endpoint_env.into(),
            repetition_penalty: 1.15,
            max_tokens: 8192,
        }
    }

    /// Resolve the endpoint through `lookup` (normally `std::env::var`).
    ///
    /// Takes a closure so tests and hosted callers never touch process state.
    pub fn endpoint<F>(&self, lookup: F) -> Result<Endpoint>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(&self.endpoint_env) {
            Some(pod) if !pod.trim().is_empty() => Ok(Endpoint::runpod(&pod)),
            _ => Err(OcrError::MissingCredential {
                env_var: self.endpoint_env.clone(),
            }),
        }
    }
}

/// Named set of [`BackendProfile`]s.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    profiles: Vec<BackendProfile>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The two models deployed by the companion pod scripts.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(BackendProfile::new("qwen3", "qwen3-vl", "QWEN3VL_POD_ID"));
        registry.register(BackendProfile::new("chandra", "chandra", "CHANDRA_POD_ID"));
        registry
    }

    /// Add a profile, replacing any existing profile with the same name.
    pub fn register(&mut self, profile: BackendProfile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(slot) => *slot = profile,
            None => self.profiles.push(profile),
        }
    }

    pub fn get(&self, name: &str) -> Result<&BackendProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| OcrError::UnknownBackend {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Profile names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_mixed_selector() {
        assert_eq!(resolve_pages(Some("2,4,7-9"), 10).unwrap(), vec![2, 4, 7, 8, 9]);
    }

    #[test]
    fn resolve_clamps_range_end() {
        assert_eq!(resolve_pages(Some("1-5"), 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn resolve_default_is_every_page() {
        assert_eq!(resolve_pages(None, 5).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(PageSelector::All.resolve(5).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn resolve_dedups_and_sorts() {
        assert_eq!(resolve_pages(Some("2,2,1-3"), 5).unwrap(), vec![1, 2, 3]);
        assert_eq!(resolve_pages(Some("5,1"), 5).unwrap(), vec![1, 5]);
    }

    #[test]
    fn resolve_drops_out_of_range_singles() {
        assert_eq!(resolve_pages(Some("0,3,6"), 5).unwrap(), vec![3]);
    }

    #[test]
    fn resolve_unclamped_start_yields_empty() {
        assert!(resolve_pages(Some("7-9"), 5).unwrap().is_empty());
        assert!(resolve_pages(Some("4-2"), 5).unwrap().is_empty());
    }

    #[test]
    fn resolve_tolerates_spaces() {
        assert_eq!(resolve_pages(Some(" 1 , 3 - 4 "), 5).unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn resolve_rejects_garbage() {
        for bad in ["x", "1,,2", "1-", "-3", "1-2-3", "2.5"] {
            let err = resolve_pages(Some(bad), 10).unwrap_err();
            assert!(
                matches!(err, OcrError::InvalidPageSelector { .. }),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn selector_from_str() {
        assert_eq!("all".parse::<PageSelector>().unwrap(), PageSelector::All);
        assert_eq!("".parse::<PageSelector>().unwrap(), PageSelector::All);
        assert_eq!(
            "1-3".parse::<PageSelector>().unwrap(),
            PageSelector::Expr("1-3".into())
        );
        assert!("one".parse::<PageSelector>().is_err());
    }

    #[test]
    fn output_format_round_trips_names() {
        for f in [OutputFormat::Text, OutputFormat::Html, OutputFormat::Json] {
            assert_eq!(f.to_string().parse::<OutputFormat>().unwrap(), f);
        }
        assert!("pdf".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn builtin_registry_profiles() {
        let reg = BackendRegistry::builtin();
        assert_eq!(reg.names(), vec!["qwen3", "chandra"]);
        let qwen = reg.get("qwen3").unwrap();
        assert_eq!(qwen.model_name, "qwen3-vl");
        assert_eq!(qwen.endpoint_env, "QWEN3VL_POD_ID");
        assert_eq!(qwen.max_tokens, 8192);
        let err = reg.get("olmocr").unwrap_err();
        assert!(err.to_string().contains("qwen3, chandra"));
    }

    #[test]
    fn register_replaces_same_name() {
        let mut reg = BackendRegistry::builtin();
        let mut custom = BackendProfile::new("qwen3", "qwen3-vl-32b", "QWEN3VL_POD_ID");
        custom.max_tokens = 16384;
        reg.register(custom);
        assert_eq!(reg.names().len(), 2);
        assert_eq!(reg.get("qwen3").unwrap().max_tokens, 16384);
    }

    #[test]
    fn profile_endpoint_from_lookup() {
        let profile = BackendProfile::new("chandra", "chandra", "CHANDRA_POD_ID");
        let ep = profile
            .endpoint(|k| (k == "CHANDRA_POD_ID").then(|| "abc123".to_string()))
            .unwrap();
        assert_eq!(ep.base_url, "https://abc123-8000.proxy.runpod.net/v1");
        assert_eq!(ep.api_key, Endpoint::NO_KEY);

        let err = profile.endpoint(|_| Some("  ".into())).unwrap_err();
        assert!(matches!(err, OcrError::MissingCredential { .. }));
    }

    #[test]
    fn endpoint_debug_redacts_key() {
        let ep = Endpoint::new("http://localhost:8000/v1/").with_api_key("secret");
        assert_eq!(ep.base_url, "http://localhost:8000/v1");
        assert!(!format!("{ep:?}").contains("secret"));
    }

    #[test]
    fn builder_applies_profile_and_validates() {
        let reg = BackendRegistry::builtin();
        let cfg = OcrConfig::builder()
            .profile(reg.get("chandra").unwrap())
            .max_tokens(2048)
            .build()
            .unwrap();
        assert_eq!(cfg.model, "chandra");
        assert_eq!(cfg.max_tokens, 2048);

        assert!(OcrConfig::builder().max_tokens(0).build().is_err());
        assert!(OcrConfig::builder().target_image_dim(10).build().is_err());
        assert!(OcrConfig::builder().repetition_penalty(0.0).build().is_err());
    }
}
