pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod negotiation;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::acceptance::{Acceptance, AcceptanceId, AcceptanceStatus};
pub use domain::change::{
    Change, ChangeId, ChangeItem, ChangeItemId, ChangeKind, ChangeStatus, FieldCode,
};
pub use domain::quote::{
    AccountId, CompanyId, Quote, QuoteId, QuoteItem, QuoteItemId, QuoteState, RequestId,
    RequestItemId,
};
pub use errors::NegotiationError;
pub use events::{
    DispatchConfig, EventDeliveryError, EventDispatcher, EventPayload, EventSink, EventSubtype,
    InMemoryEventSink, NegotiationEvent, NoopEventSink,
};
pub use ledger::{IdempotencyRecord, InMemoryIdempotencyLedger, OperationKind, StoredOutcome};
pub use negotiation::engine::NegotiationEngine;
pub use negotiation::service::{NegotiationService, ServiceError};
pub use negotiation::store::{
    CommitSet, InMemoryNegotiationStore, NegotiationStore, QuoteWrite, StoreError,
};
