use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::aggregator::{Aggregation, EventStream};
use crate::config::ClientConfig;
use crate::error::{RegistryError, StreamError, TransportError};
use crate::registry::SessionRegistry;
use crate::transport::decode_event_stream;

/// Request that starts one streamed response.
///
/// `skill`, `confidence` and `params` are forwarded untouched from the intent
/// classifier; the client does not interpret them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl StreamRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attaches the classifier's verdict.
    pub fn skill(mut self, skill: impl Into<String>, confidence: f32) -> Self {
        self.skill = Some(skill.into());
        self.confidence = Some(confidence);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Anything that can open an event stream for a request.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, request: StreamRequest) -> Result<EventStream, TransportError>;
}

/// [`EventSource`] that POSTs the request and reads a `text/event-stream` body.
pub struct HttpEventSource {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpEventSource {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        if config.base_url.trim().is_empty() {
            return Err(TransportError::Config("base_url must not be empty".into()));
        }
        // Bounds connecting and silence between body reads, never the total
        // length of a healthy stream.
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self, request: StreamRequest) -> Result<EventStream, TransportError> {
        let url = self.config.stream_url();
        debug!(%url, skill = ?request.skill, "opening plan stream");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_event_stream(Box::pin(response.bytes_stream())))
    }
}

/// Registers `response_id`, opens its stream and returns the aggregation that
/// publishes into `registry`.
///
/// Failing to open the stream is not an error here: the aggregation yields a
/// single terminal `error` snapshot instead, so the entry always terminates.
pub async fn start_response(
    registry: &SessionRegistry,
    source: &dyn EventSource,
    response_id: &str,
    request: StreamRequest,
) -> Result<Aggregation, RegistryError> {
    registry.begin(response_id)?;
    let events = match source.open(request).await {
        Ok(events) => events,
        Err(err) => {
            warn!(response_id, error = %err, "failed to open plan stream");
            failed_stream(err)
        }
    };
    registry.aggregate(response_id, events)
}

fn failed_stream(err: TransportError) -> EventStream {
    Box::pin(futures::stream::once(async move {
        Err(StreamError::Transport(err))
    }))
}
