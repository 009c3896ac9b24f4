//! Common imports for consumers of the plan stream.
pub use crate::{
    Aggregation, ClientConfig, Event, EventSource, HttpEventSource, Outcome, ResponseState,
    SessionRegistry, StepStatus, StreamRequest, start_response,
};
