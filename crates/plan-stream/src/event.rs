use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedEventError;

/// One entry of a `plan_preview` step list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_order: u32,
    pub step_name: String,
    #[serde(default)]
    pub description: String,
}

/// Plan announced by the backend before any step runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanPreview {
    pub topic: String,
    pub steps: Vec<PlanStep>,
    pub total_steps: u32,
}

/// Terminal success payload of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub content_type: String,
    pub content: Value,
    pub artifact_type: String,
    pub artifact_id: String,
}

/// Events delivered by the orchestration backend, tagged on the wire by
/// `event_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    /// Coarse human-readable progress update.
    Status { message: String },
    /// The backend has produced a plan.
    PlanPreview {
        topic: String,
        steps: Vec<PlanStep>,
        total_steps: u32,
    },
    /// A numbered step begins executing.
    StepStart { step_order: u32, step_name: String },
    /// Reasoning fragment for one step.
    StepThinking { step_order: u32, thinking: String },
    /// A step finished with its artifact payload.
    StepComplete {
        step_order: u32,
        result: Value,
        content_type: String,
    },
    /// Top-level reasoning fragment.
    Thinking { thinking: String },
    /// Top-level answer fragment.
    Content { content: String },
    /// Terminal success.
    Final {
        content_type: String,
        content: Value,
        artifact_type: String,
        artifact_id: String,
    },
    /// Terminal failure.
    Error { error: String },
}

impl Event {
    /// Decodes one JSON frame.
    ///
    /// Fails closed: unknown `event_type` tags and frames missing a field
    /// required by their kind are rejected.
    pub fn decode(frame: &str) -> Result<Self, MalformedEventError> {
        let value: Value = serde_json::from_str(frame)?;
        Self::from_value(value)
    }

    /// Decodes an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, MalformedEventError> {
        let Some(object) = value.as_object() else {
            return Err(MalformedEventError::new("event frame is not a JSON object"));
        };
        match object.get("event_type") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(MalformedEventError::new("`event_type` must be a string")),
            None => return Err(MalformedEventError::new("missing `event_type`")),
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serializes back to the wire shape.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status { .. } => EventKind::Status,
            Self::PlanPreview { .. } => EventKind::PlanPreview,
            Self::StepStart { .. } => EventKind::StepStart,
            Self::StepThinking { .. } => EventKind::StepThinking,
            Self::StepComplete { .. } => EventKind::StepComplete,
            Self::Thinking { .. } => EventKind::Thinking,
            Self::Content { .. } => EventKind::Content,
            Self::Final { .. } => EventKind::Final,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// True for `final` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }

    /// Step order addressed by this event, if any.
    pub fn step_order(&self) -> Option<u32> {
        match self {
            Self::StepStart { step_order, .. }
            | Self::StepThinking { step_order, .. }
            | Self::StepComplete { step_order, .. } => Some(*step_order),
            _ => None,
        }
    }
}

/// Payload-free discriminant of [`Event`], used in logs and errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    PlanPreview,
    StepStart,
    StepThinking,
    StepComplete,
    Thinking,
    Content,
    Final,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::PlanPreview => "plan_preview",
            Self::StepStart => "step_start",
            Self::StepThinking => "step_thinking",
            Self::StepComplete => "step_complete",
            Self::Thinking => "thinking",
            Self::Content => "content",
            Self::Final => "final",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
