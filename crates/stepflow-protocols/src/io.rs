//! Step input/output envelopes.
//!
//! A [`StepInput`] is immutable per invocation; the engine constructs a
//! fresh one from the prior [`StepOutput`] before invoking the next step.

use serde::{Deserialize, Serialize};

use crate::types::{Metadata, StepMetrics};

/// Reference to an external media artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Location of the artifact.
    pub url: String,

    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// The envelope handed to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    /// Primary payload, opaque to the engine.
    pub input: serde_json::Value,

    /// Output content of the immediately preceding step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_step_content: Option<serde_json::Value>,

    /// Key-value side channel carried across the whole run.
    #[serde(default)]
    pub additional_data: Metadata,

    /// Image references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<MediaRef>,

    /// Video references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<MediaRef>,

    /// File references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<MediaRef>,
}

impl StepInput {
    /// Create an input from a primary payload.
    pub fn new(input: impl Into<serde_json::Value>) -> Self {
        Self {
            input: input.into(),
            previous_step_content: None,
            additional_data: Metadata::new(),
            images: Vec::new(),
            videos: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Set the previous step content.
    pub fn with_previous_step_content(mut self, content: impl Into<serde_json::Value>) -> Self {
        self.previous_step_content = Some(content.into());
        self
    }

    /// Add a side-channel entry.
    pub fn with_additional_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    /// Attach an image reference.
    pub fn with_image(mut self, image: MediaRef) -> Self {
        self.images.push(image);
        self
    }

    /// Build the input for the step that follows `output`.
    ///
    /// The primary payload and side channel carry over unchanged; the
    /// previous-step content and media are taken from the output.
    pub fn advance(&self, output: &StepOutput) -> StepInput {
        StepInput {
            input: self.input.clone(),
            previous_step_content: Some(output.content.clone()),
            additional_data: self.additional_data.clone(),
            images: output.images.clone(),
            videos: output.videos.clone(),
            files: output.files.clone(),
        }
    }

    /// Previous step content rendered as text, when it is a plain string.
    pub fn previous_content_text(&self) -> Option<&str> {
        self.previous_step_content.as_ref().and_then(|v| v.as_str())
    }
}

/// The envelope produced by a step.
///
/// Created once by a runnable invocation and never mutated afterwards;
/// the parent control node consumes it to decide continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    /// Name of the step that produced this output.
    pub step_name: String,

    /// Output payload, opaque to the engine.
    pub content: serde_json::Value,

    /// Whether the step considers itself successful.
    pub success: bool,

    /// Terminal signal: aborts the entire run, not just the local
    /// branch or loop.
    #[serde(default)]
    pub stop: bool,

    /// Image references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<MediaRef>,

    /// Video references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<MediaRef>,

    /// File references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<MediaRef>,

    /// Per-step counters, filled in by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
}

impl StepOutput {
    /// Create a successful output.
    pub fn new(step_name: impl Into<String>, content: impl Into<serde_json::Value>) -> Self {
        Self {
            step_name: step_name.into(),
            content: content.into(),
            success: true,
            stop: false,
            images: Vec::new(),
            videos: Vec::new(),
            files: Vec::new(),
            metrics: None,
        }
    }

    /// Create a failed output.
    pub fn failure(step_name: impl Into<String>, content: impl Into<serde_json::Value>) -> Self {
        Self {
            success: false,
            ..Self::new(step_name, content)
        }
    }

    /// Mark this output as a terminal stop signal.
    pub fn with_stop(mut self) -> Self {
        self.stop = true;
        self
    }

    /// Attach an image reference.
    pub fn with_image(mut self, image: MediaRef) -> Self {
        self.images.push(image);
        self
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: StepMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Content rendered as text, when it is a plain string.
    pub fn content_text(&self) -> Option<&str> {
        self.content.as_str()
    }
}
