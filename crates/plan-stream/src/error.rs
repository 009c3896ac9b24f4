use crate::event::EventKind;

/// A raw frame could not be decoded into a known [`crate::Event`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event: {message}")]
pub struct MalformedEventError {
    pub message: String,
}

impl MalformedEventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MalformedEventError {
    fn from(value: serde_json::Error) -> Self {
        Self::new(value.to_string())
    }
}

/// An event was well-formed but cannot be applied to the current state.
///
/// These are logged and dropped by the aggregator; they never abort a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolationError {
    /// Any event arriving after `final` or `error`.
    #[error("`{kind}` event received after the response terminated")]
    AfterTerminal { kind: EventKind },
    /// `step_complete` with an empty content type.
    #[error("step {step_order} completed without a content type")]
    MissingContentType { step_order: u32 },
    /// `step_complete` for a step already completed with another content type.
    #[error("step {step_order} completed as `{found}` but was already `{expected}`")]
    ContentTypeMismatch {
        step_order: u32,
        expected: String,
        found: String,
    },
}

/// The event source failed before delivering a terminal event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed.
    #[error("request failed: {0}")]
    Request(String),
    /// The server answered with a non-success status.
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed mid-stream.
    #[error("stream body error: {0}")]
    Body(String),
    /// The transport could not be configured.
    #[error("transport config error: {0}")]
    Config(String),
}

/// Item error produced by an [`crate::EventStream`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Malformed(#[from] MalformedEventError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Misuse of the [`crate::SessionRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("response `{response_id}` is already registered")]
    Duplicate { response_id: String },
    #[error("response `{response_id}` is not registered")]
    NotFound { response_id: String },
    /// Another aggregation is still writing this entry.
    #[error("response `{response_id}` is already being aggregated")]
    AlreadyStreaming { response_id: String },
}

impl RegistryError {
    pub(crate) fn duplicate(response_id: impl Into<String>) -> Self {
        Self::Duplicate {
            response_id: response_id.into(),
        }
    }

    pub(crate) fn not_found(response_id: impl Into<String>) -> Self {
        Self::NotFound {
            response_id: response_id.into(),
        }
    }

    pub(crate) fn already_streaming(response_id: impl Into<String>) -> Self {
        Self::AlreadyStreaming {
            response_id: response_id.into(),
        }
    }
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
