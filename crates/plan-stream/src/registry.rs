use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregation, EventStream};
use crate::error::RegistryError;
use crate::event::Event;
use crate::state::ResponseState;

/// One registry entry: the published state plus its single-writer flag.
struct ResponseSlot {
    tx: watch::Sender<ResponseState>,
    writing: AtomicBool,
}

type Slot = Arc<ResponseSlot>;

/// Exclusive write access to one registry entry, held by an [`Aggregation`].
///
/// The entry accepts a new aggregation once the guard is dropped.
pub(crate) struct WriterGuard {
    slot: Slot,
}

impl WriterGuard {
    fn acquire(slot: Slot) -> Option<Self> {
        slot.writing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { slot })
    }

    pub(crate) fn sender(&self) -> &watch::Sender<ResponseState> {
        &self.slot.tx
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.slot.writing.store(false, Ordering::Release);
    }
}

/// Fresh random response id for callers that do not assign their own.
pub fn new_response_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Tracks the responses a caller currently observes, keyed by response id.
///
/// Cloning is cheap and shares the same entries. Each entry is written only
/// by the aggregation that owns it; the registry does no cross-response
/// coordination.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<DashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh state for `response_id`.
    pub fn begin(&self, response_id: impl Into<String>) -> Result<ResponseState, RegistryError> {
        let response_id = response_id.into();
        match self.entries.entry(response_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::duplicate(response_id)),
            Entry::Vacant(vacant) => {
                let state = ResponseState::new(response_id.clone());
                let (tx, _rx) = watch::channel(state.clone());
                vacant.insert(Arc::new(ResponseSlot {
                    tx,
                    writing: AtomicBool::new(false),
                }));
                info!(response_id = %response_id, "response registered");
                Ok(state)
            }
        }
    }

    /// Latest published state for `response_id`.
    pub fn get(&self, response_id: &str) -> Result<ResponseState, RegistryError> {
        let slot = self.slot(response_id)?;
        let state = slot.tx.borrow().clone();
        Ok(state)
    }

    /// Receiver notified on every snapshot published for `response_id`.
    pub fn subscribe(
        &self,
        response_id: &str,
    ) -> Result<watch::Receiver<ResponseState>, RegistryError> {
        Ok(self.slot(response_id)?.tx.subscribe())
    }

    /// Removes `response_id`. Unknown ids are ignored.
    pub fn dispose(&self, response_id: &str) {
        if self.entries.remove(response_id).is_some() {
            debug!(response_id, "response disposed");
        }
    }

    /// Folds `source` into the entry for `response_id`, publishing every
    /// snapshot to the registry as it is produced.
    ///
    /// The aggregation starts from the entry's current state. If the entry is
    /// terminated through [`Self::record_error`] while streaming, the
    /// aggregation stops without overwriting it.
    ///
    /// An entry has at most one aggregation at a time. While one is alive,
    /// further calls fail with [`RegistryError::AlreadyStreaming`]; dropping
    /// it frees the entry again.
    pub fn aggregate(
        &self,
        response_id: &str,
        source: EventStream,
    ) -> Result<Aggregation, RegistryError> {
        let slot = self.slot(response_id)?;
        let Some(writer) = WriterGuard::acquire(slot) else {
            warn!(response_id, "rejecting second aggregation of a live response");
            return Err(RegistryError::already_streaming(response_id));
        };
        let state = writer.sender().borrow().clone();
        Ok(Aggregation::new(state, source, Some(writer)))
    }

    /// Terminates a still-running entry with `message`, e.g. on user
    /// cancellation. Returns whether the entry changed.
    pub fn record_error(
        &self,
        response_id: &str,
        message: impl Into<String>,
    ) -> Result<bool, RegistryError> {
        let slot = self.slot(response_id)?;
        let message = message.into();
        let changed = slot.tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = crate::aggregator::apply(
                state.clone(),
                Event::Error {
                    error: message.clone(),
                },
            );
            true
        });
        if changed {
            info!(response_id, error = %message, "response terminated by caller");
        }
        Ok(changed)
    }

    pub fn contains(&self, response_id: &str) -> bool {
        self.entries.contains_key(response_id)
    }

    /// Registered ids, sorted.
    pub fn response_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, response_id: &str) -> Result<Slot, RegistryError> {
        self.entries
            .get(response_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::not_found(response_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::state::INITIAL_STATUS;
    use futures::stream;

    fn source(events: Vec<Result<Event, StreamError>>) -> EventStream {
        Box::pin(stream::iter(events))
    }

    #[test]
    fn begin_registers_initial_state() {
        let registry = SessionRegistry::new();
        let state = registry.begin("r-1").expect("begin");
        assert_eq!(state.status(), INITIAL_STATUS);
        assert_eq!(registry.get("r-1").expect("get"), state);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn begin_rejects_duplicate_until_disposed() {
        let registry = SessionRegistry::new();
        registry.begin("r-1").expect("first begin");
        assert_eq!(
            registry.begin("r-1").unwrap_err(),
            RegistryError::Duplicate {
                response_id: "r-1".into()
            }
        );
        registry.dispose("r-1");
        assert!(registry.begin("r-1").is_ok());
    }

    #[test]
    fn get_unknown_is_not_found_and_dispose_unknown_is_noop() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(RegistryError::NotFound { .. })
        ));
        registry.dispose("missing");
        assert!(registry.is_empty());
    }

    #[test]
    fn record_error_terminates_once() {
        let registry = SessionRegistry::new();
        registry.begin("r").expect("begin");
        assert!(registry.record_error("r", "cancelled by user").expect("record"));
        assert!(!registry.record_error("r", "second").expect("record"));
        assert_eq!(
            registry.get("r").expect("get").error(),
            Some("cancelled by user")
        );
    }

    #[test]
    fn generated_ids_are_unique() {
        let registry = SessionRegistry::new();
        let a = new_response_id();
        let b = new_response_id();
        assert_ne!(a, b);
        registry.begin(a).expect("begin a");
        registry.begin(b).expect("begin b");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn response_ids_are_sorted() {
        let registry = SessionRegistry::new();
        for id in ["b", "c", "a"] {
            registry.begin(id).expect("begin");
        }
        assert_eq!(registry.response_ids(), vec!["a", "b", "c"]);
        assert!(registry.contains("b"));
    }

    #[tokio::test]
    async fn aggregate_publishes_each_snapshot() {
        let registry = SessionRegistry::new();
        registry.begin("r").expect("begin");
        let mut rx = registry.subscribe("r").expect("subscribe");
        let mut aggregation = registry
            .aggregate(
                "r",
                source(vec![
                    Ok(Event::Content {
                        content: "hi".into(),
                    }),
                    Ok(Event::Error {
                        error: "boom".into(),
                    }),
                ]),
            )
            .expect("aggregate");

        let first = aggregation.next_snapshot().await.expect("snapshot");
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), first);
        assert_eq!(registry.get("r").expect("get").content(), "hi");

        while aggregation.next_snapshot().await.is_some() {}
        assert_eq!(registry.get("r").expect("get").error(), Some("boom"));
    }

    #[tokio::test]
    async fn aggregate_unknown_id_is_not_found() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.aggregate("nope", source(vec![])),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn second_aggregation_is_rejected_while_first_is_alive() {
        let registry = SessionRegistry::new();
        registry.begin("r").expect("begin");
        let content = |text: &str| -> Result<Event, StreamError> {
            Ok(Event::Content {
                content: text.into(),
            })
        };
        let mut first = registry
            .aggregate("r", source(vec![content("A"), content("A")]))
            .expect("first aggregate");
        assert_eq!(
            registry
                .aggregate("r", source(vec![content("B")]))
                .err(),
            Some(RegistryError::AlreadyStreaming {
                response_id: "r".into()
            })
        );

        first.next_snapshot().await.expect("snapshot");
        first.next_snapshot().await.expect("snapshot");
        assert_eq!(registry.get("r").expect("get").content(), "AA");

        drop(first);
        let mut second = registry
            .aggregate("r", source(vec![content("B")]))
            .expect("aggregate after release");
        let snapshot = second.next_snapshot().await.expect("snapshot");
        assert_eq!(snapshot.content(), "AAB");
        assert_eq!(registry.get("r").expect("get").content(), "AAB");
    }

    #[tokio::test]
    async fn finished_aggregation_releases_the_entry() {
        let registry = SessionRegistry::new();
        registry.begin("r").expect("begin");
        let state = registry
            .aggregate(
                "r",
                source(vec![Ok(Event::Error {
                    error: "boom".into(),
                })]),
            )
            .expect("aggregate")
            .finish()
            .await;
        assert_eq!(state.error(), Some("boom"));

        // A terminal entry yields nothing, but the slot is free again.
        let mut again = registry
            .aggregate("r", source(vec![]))
            .expect("aggregate terminal entry");
        assert!(again.next_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn caller_termination_stops_aggregation_without_overwrite() {
        let registry = SessionRegistry::new();
        registry.begin("r").expect("begin");
        let mut aggregation = registry
            .aggregate(
                "r",
                source(vec![
                    Ok(Event::Content {
                        content: "a".into(),
                    }),
                    Ok(Event::Content {
                        content: "b".into(),
                    }),
                ]),
            )
            .expect("aggregate");
        aggregation.next_snapshot().await.expect("first");
        registry
            .record_error("r", "cancelled by user")
            .expect("record");

        assert!(aggregation.next_snapshot().await.is_none());
        let state = registry.get("r").expect("get");
        assert_eq!(state.content(), "a");
        assert_eq!(state.error(), Some("cancelled by user"));
    }
}
