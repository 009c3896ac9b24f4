use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a single plan step.
///
/// The protocol has no step-failed event, so the fold never assigns `Error`;
/// a step left `Running` in a failed response is reported through
/// [`crate::ResponseState::abandoned_steps`] instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Error,
}

/// State of one stage within a multi-step plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub order: u32,
    pub name: String,
    pub status: StepStatus,
    /// Append-only reasoning buffer.
    pub thinking: String,
    pub output: Option<Value>,
    pub output_type: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set on completion, measured from `started_at`.
    pub elapsed_ms: Option<u64>,
}

impl StepState {
    /// A step that has not been started yet.
    pub fn pending(order: u32, name: impl Into<String>) -> Self {
        Self {
            order,
            name: name.into(),
            status: StepStatus::Pending,
            thinking: String::new(),
            output: None,
            output_type: None,
            started_at: None,
            elapsed_ms: None,
        }
    }

    /// Marks the step running. A restarted step drops its previous output;
    /// accumulated thinking is kept.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Running;
        self.output = None;
        self.output_type = None;
        self.started_at = Some(now);
        self.elapsed_ms = None;
    }

    pub(crate) fn append_thinking(&mut self, fragment: &str) {
        self.thinking.push_str(fragment);
    }

    pub(crate) fn complete(&mut self, output: Value, output_type: String, now: DateTime<Utc>) {
        let started = *self.started_at.get_or_insert(now);
        let elapsed = (now - started).num_milliseconds().max(0);
        self.status = StepStatus::Complete;
        self.output = Some(output);
        self.output_type = Some(output_type);
        self.elapsed_ms = Some(elapsed as u64);
    }

    pub fn is_complete(&self) -> bool {
        self.status == StepStatus::Complete
    }
}
