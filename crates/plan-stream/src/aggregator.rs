//! Fold of protocol events into [`ResponseState`] and the lazy snapshot stream
//! built on top of it.
//!
//! The fold is synchronous and deterministic given its `now` argument. The
//! only suspension point of an [`Aggregation`] is reading the next event, so
//! each snapshot reflects exactly one applied event.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::error::{ProtocolViolationError, StreamError};
use crate::event::{Event, FinalOutput, PlanPreview};
use crate::registry::WriterGuard;
use crate::state::ResponseState;
use crate::step::{StepState, StepStatus};

/// Error message recorded when a frame fails to decode.
pub const MALFORMED_EVENT_MESSAGE: &str = "received a malformed event from the server";
/// Error message recorded when the source fails or ends before a terminal event.
pub const TRANSPORT_LOST_MESSAGE: &str = "connection to the server was lost";

/// Ordered, fallible sequence of decoded events for one response.
pub type EventStream = Pin<Box<dyn futures::Stream<Item = Result<Event, StreamError>> + Send>>;

/// Applies `event` to `state`, dropping it if it violates the protocol.
///
/// Violations are logged and leave `state` unchanged.
pub fn apply(mut state: ResponseState, event: Event) -> ResponseState {
    let kind = event.kind();
    if let Err(violation) = apply_at(&mut state, event, Utc::now()) {
        warn!(response_id = %state.response_id, %kind, error = %violation, "dropping event");
    }
    state
}

/// Applies `event` to `state` using `now` for step timing.
///
/// All checks run before any mutation, so an `Err` leaves `state` untouched.
pub fn apply_at(
    state: &mut ResponseState,
    event: Event,
    now: DateTime<Utc>,
) -> Result<(), ProtocolViolationError> {
    if state.is_terminal() {
        return Err(ProtocolViolationError::AfterTerminal { kind: event.kind() });
    }

    match event {
        Event::Status { message } => state.status = message,
        Event::PlanPreview {
            topic,
            steps,
            total_steps,
        } => {
            state.plan_preview = Some(PlanPreview {
                topic,
                steps,
                total_steps,
            });
        }
        Event::StepStart {
            step_order,
            step_name,
        } => {
            state.current_step = Some(step_order);
            let step = step_entry(state, step_order, now);
            step.name = step_name;
            if step.status != StepStatus::Running || step.started_at.is_none() {
                step.start(now);
            }
        }
        Event::StepThinking {
            step_order,
            thinking,
        } => step_entry(state, step_order, now).append_thinking(&thinking),
        Event::StepComplete {
            step_order,
            result,
            content_type,
        } => {
            check_step_complete(state, step_order, &content_type)?;
            state
                .steps
                .entry(step_order)
                .or_insert_with(|| StepState::pending(step_order, String::new()))
                .complete(result, content_type, now);
        }
        Event::Thinking { thinking } => state.thinking.push_str(&thinking),
        Event::Content { content } => state.content.push_str(&content),
        Event::Final {
            content_type,
            content,
            artifact_type,
            artifact_id,
        } => {
            state.final_output = Some(FinalOutput {
                content_type,
                content,
                artifact_type,
                artifact_id,
            });
        }
        Event::Error { error } => state.error = Some(error),
    }
    Ok(())
}

/// Create-or-update: returns the step at `order`, creating it in `running`
/// when an event addresses a step whose `step_start` has not been seen.
fn step_entry(state: &mut ResponseState, order: u32, now: DateTime<Utc>) -> &mut StepState {
    state.steps.entry(order).or_insert_with(|| {
        let mut step = StepState::pending(order, String::new());
        step.start(now);
        step
    })
}

fn check_step_complete(
    state: &ResponseState,
    step_order: u32,
    content_type: &str,
) -> Result<(), ProtocolViolationError> {
    if content_type.trim().is_empty() {
        return Err(ProtocolViolationError::MissingContentType { step_order });
    }
    if let Some(step) = state.steps.get(&step_order)
        && step.is_complete()
        && let Some(expected) = step.output_type.as_deref()
        && expected != content_type
    {
        return Err(ProtocolViolationError::ContentTypeMismatch {
            step_order,
            expected: expected.to_string(),
            found: content_type.to_string(),
        });
    }
    Ok(())
}

/// Starts folding `source` into a fresh state for `response_id`.
pub fn aggregate(response_id: impl Into<String>, source: EventStream) -> Aggregation {
    Aggregation::new(ResponseState::new(response_id), source, None)
}

/// Lazy sequence of [`ResponseState`] snapshots for one response.
///
/// Yields one snapshot per applied event and ends after the first terminal
/// snapshot. Decode and transport failures surface as a synthesized `error`
/// snapshot rather than as errors. Dropping the aggregation releases the
/// source and the registry entry's writer slot, and leaves any published
/// state as it was.
pub struct Aggregation {
    state: ResponseState,
    source: EventStream,
    publisher: Option<WriterGuard>,
    finished: bool,
}

impl Aggregation {
    pub(crate) fn new(
        state: ResponseState,
        source: EventStream,
        publisher: Option<WriterGuard>,
    ) -> Self {
        let finished = state.is_terminal();
        Self {
            state,
            source,
            publisher,
            finished,
        }
    }

    pub fn response_id(&self) -> &str {
        &self.state.response_id
    }

    /// State after the most recently applied event.
    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    /// Reads events until one applies and returns the resulting snapshot.
    ///
    /// Returns `None` once the terminal snapshot has been yielded.
    pub async fn next_snapshot(&mut self) -> Option<ResponseState> {
        while !self.finished {
            let event = match self.source.next().await {
                Some(Ok(event)) => event,
                Some(Err(StreamError::Malformed(err))) => {
                    warn!(response_id = %self.state.response_id, error = %err, "terminating on malformed event");
                    synthesized_error(MALFORMED_EVENT_MESSAGE)
                }
                Some(Err(StreamError::Transport(err))) => {
                    warn!(response_id = %self.state.response_id, error = %err, "terminating on transport failure");
                    synthesized_error(TRANSPORT_LOST_MESSAGE)
                }
                None => {
                    warn!(response_id = %self.state.response_id, "event source ended before a terminal event");
                    synthesized_error(TRANSPORT_LOST_MESSAGE)
                }
            };

            let kind = event.kind();
            let step_order = event.step_order();
            if let Err(violation) = apply_at(&mut self.state, event, Utc::now()) {
                warn!(response_id = %self.state.response_id, %kind, ?step_order, error = %violation, "dropping event");
                continue;
            }
            debug!(response_id = %self.state.response_id, %kind, ?step_order, "applied event");

            if self.state.is_terminal() {
                self.close();
            }
            if !self.publish() {
                self.close();
                return None;
            }
            return Some(self.state.clone());
        }
        None
    }

    /// Drains the aggregation and returns the terminal state.
    pub async fn finish(mut self) -> ResponseState {
        while self.next_snapshot().await.is_some() {}
        self.state
    }

    /// Adapts the aggregation into a `futures::Stream` of snapshots.
    pub fn into_stream(self) -> impl futures::Stream<Item = ResponseState> + Send {
        stream::unfold(self, |mut aggregation| async move {
            aggregation
                .next_snapshot()
                .await
                .map(|snapshot| (snapshot, aggregation))
        })
    }

    fn close(&mut self) {
        self.finished = true;
        self.source = Box::pin(stream::empty());
    }

    /// Returns false when the published entry was terminated elsewhere.
    fn publish(&self) -> bool {
        let Some(publisher) = &self.publisher else {
            return true;
        };
        let snapshot = &self.state;
        let mut accepted = true;
        publisher.sender().send_if_modified(|current| {
            if current.is_terminal() {
                accepted = false;
                return false;
            }
            *current = snapshot.clone();
            true
        });
        if !accepted {
            debug!(response_id = %snapshot.response_id, "registry entry already terminal, stopping aggregation");
        }
        accepted
    }
}

fn synthesized_error(message: &str) -> Event {
    Event::Error {
        error: message.to_string(),
    }
}
