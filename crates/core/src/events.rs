//! Typed events emitted after every successful negotiation transition.
//!
//! The chat transcript store renders these as system messages. Payloads are
//! typed variants keyed by the subtype code and are serialized only at the
//! sink boundary; inside the core they are never untyped data. Delivery is
//! best-effort and strictly after the mutation commits: a sink failure is
//! retried out-of-band and never turns a committed mutation into a
//! caller-visible error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::acceptance::AcceptanceId;
use crate::domain::change::ChangeId;
use crate::domain::quote::{AccountId, QuoteId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSubtype {
    ChangeApplied,
    ChangeProposed,
    ChangeAccepted,
    ChangeRejected,
    AcceptanceRequest,
    AcceptanceConfirmed,
    AcceptanceRejected,
}

impl EventSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeApplied => "CHANGE_APPLIED",
            Self::ChangeProposed => "CHANGE_PROPOSED",
            Self::ChangeAccepted => "CHANGE_ACCEPTED",
            Self::ChangeRejected => "CHANGE_REJECTED",
            Self::AcceptanceRequest => "ACCEPTANCE_REQUEST",
            Self::AcceptanceConfirmed => "ACCEPTANCE_CONFIRMED",
            Self::AcceptanceRejected => "ACCEPTANCE_REJECTED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum EventPayload {
    ChangeApplied {
        change_id: ChangeId,
        applied_by: AccountId,
        item_count: usize,
        total_amount: Decimal,
        version: u32,
    },
    ChangeProposed {
        change_id: ChangeId,
        proposed_by: AccountId,
        item_count: usize,
    },
    ChangeAccepted {
        change_id: ChangeId,
        decided_by: AccountId,
        version: u32,
    },
    ChangeRejected {
        change_id: ChangeId,
        decided_by: AccountId,
    },
    AcceptanceRequested {
        acceptance_id: AcceptanceId,
        proposed_by: AccountId,
        note: Option<String>,
    },
    AcceptanceConfirmed {
        acceptance_id: AcceptanceId,
        confirmed_by: AccountId,
        version: u32,
    },
    AcceptanceRejected {
        acceptance_id: AcceptanceId,
        rejected_by: AccountId,
    },
}

impl EventPayload {
    pub fn subtype(&self) -> EventSubtype {
        match self {
            Self::ChangeApplied { .. } => EventSubtype::ChangeApplied,
            Self::ChangeProposed { .. } => EventSubtype::ChangeProposed,
            Self::ChangeAccepted { .. } => EventSubtype::ChangeAccepted,
            Self::ChangeRejected { .. } => EventSubtype::ChangeRejected,
            Self::AcceptanceRequested { .. } => EventSubtype::AcceptanceRequest,
            Self::AcceptanceConfirmed { .. } => EventSubtype::AcceptanceConfirmed,
            Self::AcceptanceRejected { .. } => EventSubtype::AcceptanceRejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NegotiationEvent {
    pub quote_id: QuoteId,
    pub subtype: EventSubtype,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
}

impl NegotiationEvent {
    pub fn new(quote_id: QuoteId, payload: EventPayload) -> Self {
        Self { quote_id, subtype: payload.subtype(), payload, occurred_at: Utc::now() }
    }

    /// The envelope handed to the chat transcript store.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "quoteId": self.quote_id.0,
            "systemSubtypeCode": self.subtype.as_str(),
            "payload": self.payload,
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventDeliveryError {
    #[error("event transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &NegotiationEvent) -> Result<(), EventDeliveryError>;
}

#[async_trait]
impl EventSink for Box<dyn EventSink> {
    async fn deliver(&self, event: &NegotiationEvent) -> Result<(), EventDeliveryError> {
        (**self).deliver(event).await
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<NegotiationEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<NegotiationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn deliver(&self, event: &NegotiationEvent) -> Result<(), EventDeliveryError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

/// Sink for deployments without a chat collaborator wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn deliver(&self, _event: &NegotiationEvent) -> Result<(), EventDeliveryError> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub retry_max: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { retry_max: 3, retry_delay: Duration::from_secs(5), queue_capacity: 256 }
    }
}

/// Hands events to the sink from a background task so the mutating caller
/// never waits on, or fails because of, the transcript collaborator.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<NegotiationEvent>,
}

impl EventDispatcher {
    pub fn spawn<S>(sink: S, config: DispatchConfig) -> Self
    where
        S: EventSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<NegotiationEvent>(config.queue_capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut attempt: u32 = 0;
                loop {
                    match sink.deliver(&event).await {
                        Ok(()) => break,
                        Err(error) => {
                            attempt += 1;
                            if attempt > config.retry_max {
                                warn!(
                                    event_name = "events.delivery_abandoned",
                                    quote_id = %event.quote_id.0,
                                    subtype = event.subtype.as_str(),
                                    error = %error,
                                    "giving up on event delivery after retries"
                                );
                                break;
                            }
                            warn!(
                                event_name = "events.delivery_retry",
                                quote_id = %event.quote_id.0,
                                subtype = event.subtype.as_str(),
                                attempt,
                                error = %error,
                                "retrying event delivery"
                            );
                            tokio::time::sleep(config.retry_delay).await;
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    /// Enqueue without blocking; a full or closed queue drops the event with
    /// a warning rather than stalling the mutation path.
    pub fn dispatch(&self, event: NegotiationEvent) {
        if let Err(error) = self.tx.try_send(event) {
            warn!(
                event_name = "events.dispatch_dropped",
                error = %error,
                "dropping negotiation event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::domain::acceptance::AcceptanceId;
    use crate::domain::quote::{AccountId, QuoteId};
    use crate::events::{
        DispatchConfig, EventDeliveryError, EventDispatcher, EventPayload, EventSink,
        EventSubtype, InMemoryEventSink, NegotiationEvent,
    };

    fn request_event() -> NegotiationEvent {
        NegotiationEvent::new(
            QuoteId("Q-77".to_string()),
            EventPayload::AcceptanceRequested {
                acceptance_id: AcceptanceId("ACC-1".to_string()),
                proposed_by: AccountId("acct-9".to_string()),
                note: Some("listo para cerrar".to_string()),
            },
        )
    }

    struct FlakySink {
        failures_left: Arc<Mutex<u32>>,
        delivered: InMemoryEventSink,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn deliver(&self, event: &NegotiationEvent) -> Result<(), EventDeliveryError> {
            {
                let mut failures = self.failures_left.lock().expect("lock");
                if *failures > 0 {
                    *failures -= 1;
                    return Err(EventDeliveryError::Transport("connection reset".to_string()));
                }
            }
            self.delivered.deliver(event).await
        }
    }

    async fn wait_for_events(sink: &InMemoryEventSink, count: usize) -> Vec<NegotiationEvent> {
        for _ in 0..200 {
            let events = sink.events();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sink.events()
    }

    #[test]
    fn payload_determines_the_subtype_code() {
        let event = request_event();
        assert_eq!(event.subtype, EventSubtype::AcceptanceRequest);
        assert_eq!(event.subtype.as_str(), "ACCEPTANCE_REQUEST");
    }

    #[test]
    fn wire_envelope_matches_the_transcript_contract() {
        let wire = request_event().to_wire();
        assert_eq!(wire["quoteId"], "Q-77");
        assert_eq!(wire["systemSubtypeCode"], "ACCEPTANCE_REQUEST");
        assert_eq!(wire["payload"]["acceptanceId"], "ACC-1");
        assert_eq!(wire["payload"]["proposedBy"], "acct-9");
    }

    #[tokio::test]
    async fn dispatcher_delivers_without_blocking_the_caller() {
        let sink = InMemoryEventSink::default();
        let dispatcher = EventDispatcher::spawn(sink.clone(), DispatchConfig::default());

        dispatcher.dispatch(request_event());

        let events = wait_for_events(&sink, 1).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].quote_id, QuoteId("Q-77".to_string()));
    }

    #[tokio::test]
    async fn transient_sink_failures_are_retried_out_of_band() {
        let delivered = InMemoryEventSink::default();
        let sink = FlakySink {
            failures_left: Arc::new(Mutex::new(2)),
            delivered: delivered.clone(),
        };
        let dispatcher = EventDispatcher::spawn(
            sink,
            DispatchConfig { retry_max: 3, retry_delay: Duration::from_millis(5), queue_capacity: 8 },
        );

        dispatcher.dispatch(request_event());

        let events = wait_for_events(&delivered, 1).await;
        assert_eq!(events.len(), 1, "delivery should succeed after transient failures");
    }

    #[tokio::test]
    async fn exhausted_retries_drop_the_event_without_surfacing_an_error() {
        let delivered = InMemoryEventSink::default();
        let sink = FlakySink {
            failures_left: Arc::new(Mutex::new(u32::MAX)),
            delivered: delivered.clone(),
        };
        let dispatcher = EventDispatcher::spawn(
            sink,
            DispatchConfig { retry_max: 1, retry_delay: Duration::from_millis(1), queue_capacity: 8 },
        );

        dispatcher.dispatch(request_event());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(delivered.events().is_empty());
    }
}
