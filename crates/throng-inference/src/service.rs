//! Inference service contract and backends.
//!
//! [`InferenceService`] is the only component that can block or incur
//! unbounded latency; the dispatcher always calls it from a spawned task
//! under a timeout. Two backends exist:
//!
//! - [`HttpInferenceService`] talks to an OpenAI-compatible
//!   `/chat/completions` endpoint over `reqwest`.
//! - [`HeuristicInferenceService`] is a deterministic offline analyzer used
//!   when no endpoint is configured.
//!
//! [`InferenceBackend`] dispatches between them by enum, so the engine can
//! hold one concrete type without boxing futures.

use std::future::Future;
use std::path::PathBuf;

use throng_types::{AgentProfile, AnalysisResult, ContentDescriptor, ResponseCategory};
use tracing::debug;

use crate::error::InferenceError;
use crate::parse::parse_analysis_response;
use crate::prompt::PromptRenderer;

/// Analyzes one piece of content for a batch of agent profiles.
///
/// Implementations must return exactly one result per profile, in order.
/// Calls may be retried, so they must not have side effects beyond the
/// returned value.
pub trait InferenceService: Send + Sync + 'static {
    /// Analyze `content` for each profile.
    fn analyze(
        &self,
        content: &ContentDescriptor,
        profiles: &[AgentProfile],
    ) -> impl Future<Output = Result<Vec<AnalysisResult>, InferenceError>> + Send;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Connection settings for the HTTP backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendSettings {
    /// Base URL, e.g. `https://api.openai.com/v1`. Empty selects the
    /// heuristic backend.
    pub api_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// Optional directory with `system.j2` and `analysis.j2` overrides.
    pub templates_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Backend for OpenAI-compatible chat completions APIs.
///
/// Sends requests to `{api_url}/chat/completions` and expects a JSON object
/// in the first choice's message content.
#[derive(Debug)]
pub struct HttpInferenceService {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    prompts: PromptRenderer,
}

impl HttpInferenceService {
    /// Create the backend.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Template`] if prompt templates fail to load.
    pub fn new(settings: &BackendSettings) -> Result<Self, InferenceError> {
        let prompts = match &settings.templates_dir {
            Some(dir) => PromptRenderer::from_dir(dir)?,
            None => PromptRenderer::builtin()?,
        };
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: settings.api_url.trim_end_matches('/').to_owned(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            prompts,
        })
    }

    async fn complete(
        &self,
        content: &ContentDescriptor,
        profiles: &[AgentProfile],
    ) -> Result<Vec<AnalysisResult>, InferenceError> {
        let prompt = self.prompts.render(content, profiles)?;
        let url = format!("{}/chat/completions", self.api_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": 0.2,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Parse(format!("response body is not JSON: {e}")))?;
        let text = extract_message_content(&json)?;
        debug!(
            model = %self.model,
            profiles = profiles.len(),
            response_len = text.len(),
            "Inference response received"
        );
        parse_analysis_response(&text, profiles.len())
    }
}

impl InferenceService for HttpInferenceService {
    async fn analyze(
        &self,
        content: &ContentDescriptor,
        profiles: &[AgentProfile],
    ) -> Result<Vec<AnalysisResult>, InferenceError> {
        if profiles.is_empty() {
            return Ok(Vec::new());
        }
        self.complete(content, profiles).await
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn extract_message_content(json: &serde_json::Value) -> Result<String, InferenceError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            InferenceError::Parse("response missing choices[0].message.content".to_owned())
        })
}

// ---------------------------------------------------------------------------
// Heuristic backend
// ---------------------------------------------------------------------------

/// Deterministic offline analyzer.
///
/// Derives a content lean in `-1.0..=1.0` from the topic bytes and scores
/// each profile by how close its stance is to that lean. The same inputs
/// always produce the same outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicInferenceService;

impl HeuristicInferenceService {
    /// Create the analyzer.
    pub const fn new() -> Self {
        Self
    }

    /// Lean of a piece of content, `-1.0..=1.0`.
    pub fn content_lean(content: &ContentDescriptor) -> f32 {
        let sum = content
            .topic
            .bytes()
            .fold(0_u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        let bucket = u16::try_from(sum % 201).unwrap_or(100);
        f32::from(bucket) / 100.0 - 1.0
    }

    /// Score one profile against a content lean.
    pub fn score(lean: f32, profile: &AgentProfile) -> AnalysisResult {
        let stance = (profile.features.economic_axis + profile.features.social_axis) / 2.0;
        let alignment = 1.0 - ((stance - lean).abs() / 2.0).clamp(0.0, 1.0);
        let sentiment_shift = ((alignment - 0.5) * 0.4).clamp(-1.0, 1.0);
        let volatility = if profile.volatile { 0.05 } else { 0.0 };
        let engagement_change = ((alignment - 0.5).abs() * 0.2 + volatility).clamp(-1.0, 1.0);
        let category = if sentiment_shift > 0.12 && profile.engagement > 0.7 {
            ResponseCategory::Mobilized
        } else if sentiment_shift > 0.05 {
            ResponseCategory::Supportive
        } else if sentiment_shift < -0.12 && profile.engagement < 0.3 {
            ResponseCategory::Disengaged
        } else if sentiment_shift < -0.05 {
            ResponseCategory::Opposed
        } else {
            ResponseCategory::Neutral
        };
        AnalysisResult {
            sentiment_shift,
            engagement_change,
            category,
            confidence: (0.6 + 0.3 * profile.engagement).clamp(0.0, 1.0),
        }
    }
}

impl InferenceService for HeuristicInferenceService {
    async fn analyze(
        &self,
        content: &ContentDescriptor,
        profiles: &[AgentProfile],
    ) -> Result<Vec<AnalysisResult>, InferenceError> {
        let lean = Self::content_lean(content);
        Ok(profiles.iter().map(|p| Self::score(lean, p)).collect())
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

// ---------------------------------------------------------------------------
// Enum dispatch
// ---------------------------------------------------------------------------

/// A concrete inference backend chosen at startup.
#[derive(Debug)]
pub enum InferenceBackend {
    /// OpenAI-compatible HTTP endpoint.
    Http(HttpInferenceService),
    /// Deterministic offline analyzer.
    Heuristic(HeuristicInferenceService),
}

impl InferenceService for InferenceBackend {
    async fn analyze(
        &self,
        content: &ContentDescriptor,
        profiles: &[AgentProfile],
    ) -> Result<Vec<AnalysisResult>, InferenceError> {
        match self {
            Self::Http(backend) => backend.analyze(content, profiles).await,
            Self::Heuristic(backend) => backend.analyze(content, profiles).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Http(backend) => backend.name(),
            Self::Heuristic(backend) => backend.name(),
        }
    }
}

/// Build a backend from settings: HTTP when an endpoint URL is set,
/// heuristic otherwise.
///
/// # Errors
///
/// Returns [`InferenceError::Template`] if HTTP prompt templates fail to load.
pub fn create_backend(settings: &BackendSettings) -> Result<InferenceBackend, InferenceError> {
    if settings.api_url.trim().is_empty() {
        Ok(InferenceBackend::Heuristic(HeuristicInferenceService::new()))
    } else {
        HttpInferenceService::new(settings).map(InferenceBackend::Http)
    }
}
