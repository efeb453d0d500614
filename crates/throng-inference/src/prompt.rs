//! Prompt rendering via `minijinja`.
//!
//! Built-in templates cover the default analysis prompt. Operators can
//! override them by pointing the backend at a directory containing
//! `system.j2` and `analysis.j2`.

use std::path::Path;

use minijinja::Environment;
use serde::Serialize;
use throng_types::{AgentProfile, ContentDescriptor};

use crate::error::InferenceError;

const SYSTEM_TEMPLATE: &str = "\
You are a political sentiment analyst. For each audience profile, estimate how \
that person reacts to the content. Reply with a single JSON object of the form \
{\"results\": [{\"sentiment_shift\": float in [-1, 1], \"engagement_change\": \
float in [-1, 1], \"category\": one of supportive|neutral|opposed|mobilized|disengaged, \
\"confidence\": float in [0, 1]}]} with exactly one entry per profile, in order.";

const ANALYSIS_TEMPLATE: &str = "\
Topic: {{ topic }}
Content:
{{ text }}

Profiles ({{ profiles | length }}):
{% for p in profiles -%}
{{ loop.index }}. age {{ p.age }}, education {{ p.education }}/4, {{ \"urban\" if p.urban else \"rural\" }}, \
economic {{ p.economic }}, social {{ p.social }}, engagement {{ p.engagement }}{{ \", volatile\" if p.volatile }}
{% endfor %}";

/// A rendered prompt ready for a chat-completions call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// System message.
    pub system: String,
    /// User message with the content and profiles.
    pub user: String,
}

#[derive(Serialize)]
struct ProfileView {
    age: u8,
    education: u8,
    urban: bool,
    economic: String,
    social: String,
    engagement: String,
    volatile: bool,
}

impl From<&AgentProfile> for ProfileView {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            age: profile.features.age,
            education: profile.features.education,
            urban: profile.features.urban,
            economic: format!("{:+.2}", profile.features.economic_axis),
            social: format!("{:+.2}", profile.features.social_axis),
            engagement: format!("{:.2}", profile.engagement),
            volatile: profile.volatile,
        }
    }
}

#[derive(Serialize)]
struct AnalysisView<'a> {
    topic: &'a str,
    text: &'a str,
    profiles: Vec<ProfileView>,
}

/// Holds the analysis templates.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer").finish_non_exhaustive()
    }
}

impl PromptRenderer {
    /// Renderer with the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Template`] if a built-in template fails to
    /// compile.
    pub fn builtin() -> Result<Self, InferenceError> {
        Self::with_sources(SYSTEM_TEMPLATE.to_owned(), ANALYSIS_TEMPLATE.to_owned())
    }

    /// Renderer with templates loaded from `dir` (`system.j2`, `analysis.j2`).
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Template`] if a file is missing or does not
    /// compile.
    pub fn from_dir(dir: &Path) -> Result<Self, InferenceError> {
        let load = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|e| {
                InferenceError::Template(format!("failed to read {}: {e}", path.display()))
            })
        };
        Self::with_sources(load("system.j2")?, load("analysis.j2")?)
    }

    fn with_sources(system: String, analysis: String) -> Result<Self, InferenceError> {
        let mut env = Environment::new();
        env.add_template_owned("system", system)
            .map_err(|e| InferenceError::Template(format!("failed to add system template: {e}")))?;
        env.add_template_owned("analysis", analysis).map_err(|e| {
            InferenceError::Template(format!("failed to add analysis template: {e}"))
        })?;
        Ok(Self { env })
    }

    /// Render the prompt for one content descriptor and batch of profiles.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Template`] on a render failure.
    pub fn render(
        &self,
        content: &ContentDescriptor,
        profiles: &[AgentProfile],
    ) -> Result<RenderedPrompt, InferenceError> {
        let view = AnalysisView {
            topic: &content.topic,
            text: &content.text,
            profiles: profiles.iter().map(ProfileView::from).collect(),
        };
        let system = self
            .env
            .get_template("system")
            .and_then(|t| t.render(&view))
            .map_err(|e| InferenceError::Template(format!("system render failed: {e}")))?;
        let user = self
            .env
            .get_template("analysis")
            .and_then(|t| t.render(&view))
            .map_err(|e| InferenceError::Template(format!("analysis render failed: {e}")))?;
        Ok(RenderedPrompt { system, user })
    }
}
