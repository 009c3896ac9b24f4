use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{FinalOutput, PlanPreview};
use crate::step::{StepState, StepStatus};

/// Status text of a freshly registered response.
pub const INITIAL_STATUS: &str = "starting";

/// Aggregate state of one in-flight or completed response.
///
/// Every value of this type is renderable: partial state is valid state.
/// Mutation only happens through the fold in [`crate::aggregator`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseState {
    pub(crate) response_id: String,
    pub(crate) status: String,
    pub(crate) thinking: String,
    pub(crate) content: String,
    pub(crate) plan_preview: Option<PlanPreview>,
    pub(crate) current_step: Option<u32>,
    pub(crate) steps: BTreeMap<u32, StepState>,
    #[serde(rename = "final")]
    pub(crate) final_output: Option<FinalOutput>,
    pub(crate) error: Option<String>,
}

/// Coarse outcome of a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Completed,
    Failed,
}

/// What the artifact renderer needs once a response has finalized.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArtifactRef<'a> {
    pub artifact_type: &'a str,
    pub artifact_id: &'a str,
    pub content: &'a Value,
}

/// Output of one completed step, for progressive rendering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutput<'a> {
    pub order: u32,
    pub output_type: &'a str,
    pub output: &'a Value,
}

impl ResponseState {
    /// Initial state: status `starting`, every collection empty.
    pub fn new(response_id: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            status: INITIAL_STATUS.to_string(),
            thinking: String::new(),
            content: String::new(),
            plan_preview: None,
            current_step: None,
            steps: BTreeMap::new(),
            final_output: None,
            error: None,
        }
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn plan_preview(&self) -> Option<&PlanPreview> {
        self.plan_preview.as_ref()
    }

    /// Order of the most recent `step_start`, even if that step has completed.
    pub fn current_step(&self) -> Option<u32> {
        self.current_step
    }

    pub fn step(&self, order: u32) -> Option<&StepState> {
        self.steps.get(&order)
    }

    /// Steps sorted by order.
    pub fn steps(&self) -> impl Iterator<Item = &StepState> {
        self.steps.values()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn final_output(&self) -> Option<&FinalOutput> {
        self.final_output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.final_output.is_some() || self.error.is_some()
    }

    pub fn outcome(&self) -> Outcome {
        match (&self.final_output, &self.error) {
            (Some(_), _) => Outcome::Completed,
            (None, Some(_)) => Outcome::Failed,
            (None, None) => Outcome::Running,
        }
    }

    /// Renderer hand-off for the finalized response.
    pub fn artifact(&self) -> Option<ArtifactRef<'_>> {
        self.final_output.as_ref().map(|f| ArtifactRef {
            artifact_type: &f.artifact_type,
            artifact_id: &f.artifact_id,
            content: &f.content,
        })
    }

    /// Outputs of completed steps in step order.
    pub fn step_outputs(&self) -> impl Iterator<Item = StepOutput<'_>> {
        self.steps.values().filter_map(|step| {
            match (&step.status, &step.output, &step.output_type) {
                (StepStatus::Complete, Some(output), Some(output_type)) => Some(StepOutput {
                    order: step.order,
                    output_type,
                    output,
                }),
                _ => None,
            }
        })
    }

    /// Orders of steps that never completed in a terminated response.
    ///
    /// Their status is left as the stream last reported it; callers decide
    /// how to present an interrupted step.
    pub fn abandoned_steps(&self) -> Vec<u32> {
        if !self.is_terminal() {
            return Vec::new();
        }
        self.steps
            .values()
            .filter(|step| !step.is_complete())
            .map(|step| step.order)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed_step(order: u32, output_type: &str) -> StepState {
        let mut step = StepState::pending(order, format!("step {order}"));
        step.complete(json!({"order": order}), output_type.into(), chrono::Utc::now());
        step
    }

    #[test]
    fn new_state_is_starting_and_empty() {
        let state = ResponseState::new("r-1");
        assert_eq!(state.response_id(), "r-1");
        assert_eq!(state.status(), INITIAL_STATUS);
        assert_eq!(state.step_count(), 0);
        assert!(state.thinking().is_empty() && state.content().is_empty());
        assert_eq!(state.outcome(), Outcome::Running);
        assert!(state.artifact().is_none());
    }

    #[test]
    fn steps_iterate_in_order_regardless_of_insertion() {
        let mut state = ResponseState::new("r");
        state.steps.insert(3, StepState::pending(3, "c"));
        state.steps.insert(1, StepState::pending(1, "a"));
        state.steps.insert(2, StepState::pending(2, "b"));
        let orders: Vec<u32> = state.steps().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn step_outputs_skip_incomplete_steps() {
        let mut state = ResponseState::new("r");
        state.steps.insert(2, completed_step(2, "flashcard_set"));
        state.steps.insert(1, completed_step(1, "explanation"));
        state.steps.insert(3, StepState::pending(3, "quiz"));
        let outputs: Vec<(u32, &str)> = state
            .step_outputs()
            .map(|o| (o.order, o.output_type))
            .collect();
        assert_eq!(outputs, vec![(1, "explanation"), (2, "flashcard_set")]);
    }

    #[test]
    fn abandoned_steps_only_reported_once_terminal() {
        let mut state = ResponseState::new("r");
        state.steps.insert(1, completed_step(1, "explanation"));
        state.steps.insert(2, StepState::pending(2, "quiz"));
        assert!(state.abandoned_steps().is_empty());
        state.error = Some("lost".into());
        assert_eq!(state.abandoned_steps(), vec![2]);
        assert_eq!(state.outcome(), Outcome::Failed);
    }

    #[test]
    fn serializes_final_under_wire_name() {
        let mut state = ResponseState::new("r");
        state.final_output = Some(FinalOutput {
            content_type: "quiz".into(),
            content: json!({}),
            artifact_type: "quiz".into(),
            artifact_id: "a".into(),
        });
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["final"]["artifact_id"], "a");
        assert_eq!(state.artifact().map(|a| a.artifact_id), Some("a"));
    }
}
