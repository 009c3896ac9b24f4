//! Client-side aggregation of streamed multi-step plan responses.
//!
//! An orchestration backend answers a request with an ordered stream of
//! typed events (`status`, `plan_preview`, `step_*`, `thinking`, `content`,
//! and a terminal `final` or `error`). This crate decodes those events,
//! folds them into a render-ready [`ResponseState`] per response, and keeps
//! the states of all observed responses in a [`SessionRegistry`].
//!
//! ```no_run
//! use plan_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! plan_stream::observability::init_observability();
//! let source = HttpEventSource::new(ClientConfig::from_env()?)?;
//! let registry = SessionRegistry::new();
//!
//! let mut aggregation = start_response(
//!     &registry,
//!     &source,
//!     "resp-1",
//!     StreamRequest::new("Teach me about WWII").skill("learning_plan", 0.92),
//! )
//! .await?;
//!
//! while let Some(state) = aggregation.next_snapshot().await {
//!     println!("{}", state.status());
//! }
//! if let Some(artifact) = registry.get("resp-1")?.artifact() {
//!     println!("{} {}", artifact.artifact_type, artifact.artifact_id);
//! }
//! # Ok(())
//! # }
//! ```

/// Event fold and the lazy snapshot stream.
pub mod aggregator;
/// HTTP event source and request type.
pub mod client;
/// Client configuration loaded from the environment.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Protocol event model and decoding.
pub mod event;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Registry of tracked responses.
pub mod registry;
/// Per-response aggregate state.
pub mod state;
/// Per-step state.
pub mod step;
/// Server-sent-events framing.
pub mod transport;

pub use aggregator::{Aggregation, EventStream, aggregate, apply, apply_at};
pub use client::{EventSource, HttpEventSource, StreamRequest, start_response};
pub use config::ClientConfig;
pub use error::{
    ConfigError, MalformedEventError, ProtocolViolationError, RegistryError, StreamError,
    TransportError,
};
pub use event::{Event, EventKind, FinalOutput, PlanPreview, PlanStep};
pub use registry::{SessionRegistry, new_response_id};
pub use state::{ArtifactRef, Outcome, ResponseState, StepOutput};
pub use step::{StepState, StepStatus};
