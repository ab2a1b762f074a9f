//! Step and request identity types.
//!
//! A [`Step`] is one unit of explanation received from the step service. Steps
//! are immutable once built and are shared as `Arc<Step>` between the store,
//! the controller, and snapshots.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::markup::{format_display_math, is_well_formed_mathml};

// ============================================================================
// RequestId
// ============================================================================

/// Opaque token identifying one user query.
///
/// Arrivals carrying any other token than the current one are stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps an existing token, e.g. one echoed back by the step service.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints request identities from the wall clock plus a local sequence number.
///
/// Two queries submitted within the same millisecond still get distinct tokens.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    sequence: u64,
}

impl RequestIdGenerator {
    /// Creates a generator starting at sequence zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { sequence: 0 }
    }

    /// Mints the next identity.
    pub fn next_id(&mut self) -> RequestId {
        self.sequence += 1;
        RequestId(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            self.sequence
        ))
    }
}

// ============================================================================
// Step
// ============================================================================

/// Narration attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAudio {
    /// Whether the service marked this step as narrated.
    pub has_audio: bool,
    /// Base64-encoded clip. May be empty or malformed; the player copes.
    pub data: String,
}

/// What the presentation sink is asked to typeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "source", rename_all = "snake_case")]
pub enum RenderContent {
    /// Structured markup (MathML).
    Mathml(String),
    /// Typesetting source (LaTeX), wrapped in display delimiters.
    Latex(String),
}

/// One explanation step belonging to a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    mathml: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<StepAudio>,
}

impl Step {
    /// Creates a step with no markup, explanation, or audio.
    ///
    /// Use the `with_*` methods to fill it in before sharing it.
    #[must_use]
    pub const fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            mathml: None,
            latex: None,
            explanation: None,
            audio: None,
        }
    }

    /// Sets the MathML payload.
    #[must_use]
    pub fn with_mathml(mut self, mathml: impl Into<String>) -> Self {
        self.mathml = Some(mathml.into());
        self
    }

    /// Sets the LaTeX payload.
    #[must_use]
    pub fn with_latex(mut self, latex: impl Into<String>) -> Self {
        self.latex = Some(latex.into());
        self
    }

    /// Sets the natural-language explanation.
    #[must_use]
    pub fn with_explanation(mut self, text: impl Into<String>) -> Self {
        self.explanation = Some(text.into());
        self
    }

    /// Attaches narration.
    #[must_use]
    pub fn with_audio(mut self, audio: StepAudio) -> Self {
        self.audio = Some(audio);
        self
    }

    /// The request this step belongs to.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The natural-language explanation, if any.
    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    /// The narration, if any.
    #[must_use]
    pub const fn audio(&self) -> Option<&StepAudio> {
        self.audio.as_ref()
    }

    /// Returns the narration only when the step is flagged as narrated.
    #[must_use]
    pub fn playable_audio(&self) -> Option<&StepAudio> {
        self.audio.as_ref().filter(|audio| audio.has_audio)
    }

    /// Chooses what to render.
    ///
    /// MathML wins when present and well-formed; otherwise the LaTeX source is
    /// used in display form. Returns `None` when neither is usable.
    #[must_use]
    pub fn display_content(&self) -> Option<RenderContent> {
        if let Some(mathml) = self.mathml.as_deref() {
            if is_well_formed_mathml(mathml) {
                return Some(RenderContent::Mathml(mathml.to_string()));
            }
            tracing::debug!(request_id = %self.request_id, "MathML malformed, falling back to LaTeX");
        }

        self.latex
            .as_deref()
            .filter(|latex| !latex.trim().is_empty())
            .map(|latex| RenderContent::Latex(format_display_math(latex)))
    }
}
