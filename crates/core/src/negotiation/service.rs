//! Orchestration around the pure engine.
//!
//! Each mutating call runs as one atomic unit per quote: idempotency lookup,
//! load, transition and commit all happen under the quote's guard lock, and
//! the commit persists every affected entity together. Event dispatch
//! happens strictly after the commit and never affects the caller's result.

use chrono::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::acceptance::{Acceptance, AcceptanceId};
use crate::domain::change::{Change, ChangeId, ChangeItem};
use crate::domain::quote::{AccountId, Quote, QuoteId};
use crate::errors::NegotiationError;
use crate::events::EventDispatcher;
use crate::guard::QuoteGuards;
use crate::ledger::{IdempotencyRecord, OperationKind, StoredOutcome};
use crate::negotiation::engine::NegotiationEngine;
use crate::negotiation::rules;
use crate::negotiation::store::{CommitSet, NegotiationStore, QuoteWrite, StoreError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct NegotiationService<S> {
    engine: NegotiationEngine,
    store: S,
    guards: QuoteGuards,
    dispatcher: EventDispatcher,
    ledger_ttl: Duration,
}

impl<S> NegotiationService<S>
where
    S: NegotiationStore,
{
    pub fn new(store: S, dispatcher: EventDispatcher, ledger_ttl: Duration) -> Self {
        Self { engine: NegotiationEngine::new(), store, guards: QuoteGuards::new(), dispatcher, ledger_ttl }
    }

    pub async fn apply_change(
        &self,
        caller: &AccountId,
        quote_id: &QuoteId,
        items: Vec<ChangeItem>,
        caller_version: Option<u32>,
        idempotency_key: Option<String>,
    ) -> Result<Change, ServiceError> {
        rules::validate_items(&items)?;

        let _guard = self.guards.acquire(quote_id).await;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(StoredOutcome::Change(change)) =
                self.store.find_operation(quote_id, OperationKind::ApplyChange, key).await?
            {
                return Ok(change);
            }
        }

        let quote = self.load_quote_locked(quote_id).await?;
        let expected_version = quote.version;
        let outcome = self.engine.apply_change(quote, items, caller, caller_version)?;

        let mut commit = CommitSet { change: Some(outcome.change.clone()), ..CommitSet::default() };
        if outcome.quote.version != expected_version {
            commit.quote = Some(QuoteWrite { quote: outcome.quote, expected_version });
        }
        if let Some(key) = idempotency_key {
            commit.idempotency = Some(IdempotencyRecord::new(
                quote_id.clone(),
                OperationKind::ApplyChange,
                key,
                StoredOutcome::Change(outcome.change.clone()),
                self.ledger_ttl,
            ));
        }
        self.store.commit(commit).await?;

        info!(
            event_name = "negotiation.change_recorded",
            quote_id = %quote_id.0,
            change_id = %outcome.change.id.0,
            kind = outcome.change.kind.as_str(),
            "change recorded"
        );
        self.dispatcher.dispatch(outcome.event);
        Ok(outcome.change)
    }

    pub async fn decide_change(
        &self,
        caller: &AccountId,
        quote_id: &QuoteId,
        change_id: &ChangeId,
        accept: bool,
        caller_version: Option<u32>,
    ) -> Result<(), ServiceError> {
        let _guard = self.guards.acquire(quote_id).await;

        let quote = self.load_quote_locked(quote_id).await?;
        let change = self
            .store
            .load_change(change_id)
            .await?
            .filter(|change| change.quote_id.as_ref() == Some(quote_id))
            .ok_or_else(|| NegotiationError::NotFound(format!("change {}", change_id.0)))?;

        let expected_version = quote.version;
        let outcome = self.engine.decide_change(quote, change, accept, caller, caller_version)?;

        let mut commit = CommitSet { change: Some(outcome.change.clone()), ..CommitSet::default() };
        if outcome.quote.version != expected_version {
            commit.quote = Some(QuoteWrite { quote: outcome.quote, expected_version });
        }
        self.store.commit(commit).await?;

        info!(
            event_name = "negotiation.change_decided",
            quote_id = %quote_id.0,
            change_id = %change_id.0,
            accepted = accept,
            "pending change decided"
        );
        self.dispatcher.dispatch(outcome.event);
        Ok(())
    }

    pub async fn propose_acceptance(
        &self,
        caller: &AccountId,
        quote_id: &QuoteId,
        idempotency_key: Option<String>,
        note: Option<String>,
    ) -> Result<Acceptance, ServiceError> {
        let _guard = self.guards.acquire(quote_id).await;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(StoredOutcome::Acceptance(acceptance)) =
                self.store.find_operation(quote_id, OperationKind::ProposeAcceptance, key).await?
            {
                return Ok(acceptance);
            }
        }

        let quote = self.load_quote_locked(quote_id).await?;
        let pending = self.store.find_pending_acceptance(quote_id).await?;
        let outcome = self.engine.propose_acceptance(
            &quote,
            pending.as_ref(),
            caller,
            idempotency_key.clone(),
            note,
        )?;

        let mut commit =
            CommitSet { acceptance: Some(outcome.acceptance.clone()), ..CommitSet::default() };
        if let Some(key) = idempotency_key {
            commit.idempotency = Some(IdempotencyRecord::new(
                quote_id.clone(),
                OperationKind::ProposeAcceptance,
                key,
                StoredOutcome::Acceptance(outcome.acceptance.clone()),
                self.ledger_ttl,
            ));
        }
        self.store.commit(commit).await?;

        info!(
            event_name = "negotiation.acceptance_proposed",
            quote_id = %quote_id.0,
            acceptance_id = %outcome.acceptance.id.0,
            "acceptance handshake opened"
        );
        self.dispatcher.dispatch(outcome.event);
        Ok(outcome.acceptance)
    }

    pub async fn confirm_acceptance(
        &self,
        caller: &AccountId,
        quote_id: &QuoteId,
        acceptance_id: &AcceptanceId,
    ) -> Result<(), ServiceError> {
        let _guard = self.guards.acquire(quote_id).await;

        let quote = self.load_quote_locked(quote_id).await?;
        let acceptance = self.load_acceptance_locked(quote_id, acceptance_id).await?;

        let expected_version = quote.version;
        let outcome = self.engine.confirm_acceptance(quote, acceptance, caller)?;

        let commit = CommitSet {
            quote: Some(QuoteWrite { quote: outcome.quote, expected_version }),
            acceptance: Some(outcome.acceptance),
            ..CommitSet::default()
        };
        self.store.commit(commit).await?;

        info!(
            event_name = "negotiation.acceptance_confirmed",
            quote_id = %quote_id.0,
            acceptance_id = %acceptance_id.0,
            "deal closed"
        );
        self.dispatcher.dispatch(outcome.event);
        Ok(())
    }

    pub async fn reject_acceptance(
        &self,
        caller: &AccountId,
        quote_id: &QuoteId,
        acceptance_id: &AcceptanceId,
    ) -> Result<(), ServiceError> {
        let _guard = self.guards.acquire(quote_id).await;

        let quote = self.load_quote_locked(quote_id).await?;
        let acceptance = self.load_acceptance_locked(quote_id, acceptance_id).await?;

        let outcome = self.engine.reject_acceptance(&quote, acceptance, caller)?;

        let commit =
            CommitSet { acceptance: Some(outcome.acceptance), ..CommitSet::default() };
        self.store.commit(commit).await?;

        info!(
            event_name = "negotiation.acceptance_rejected",
            quote_id = %quote_id.0,
            acceptance_id = %acceptance_id.0,
            "acceptance handshake declined"
        );
        self.dispatcher.dispatch(outcome.event);
        Ok(())
    }

    pub async fn get_quote(&self, quote_id: &QuoteId) -> Result<Quote, ServiceError> {
        self.store
            .load_quote(quote_id)
            .await?
            .ok_or_else(|| NegotiationError::NotFound(format!("quote {}", quote_id.0)).into())
    }

    pub async fn get_change(
        &self,
        quote_id: &QuoteId,
        change_id: &ChangeId,
    ) -> Result<Change, ServiceError> {
        self.store
            .load_change(change_id)
            .await?
            .filter(|change| change.quote_id.as_ref() == Some(quote_id))
            .ok_or_else(|| NegotiationError::NotFound(format!("change {}", change_id.0)).into())
    }

    pub async fn get_acceptance(
        &self,
        quote_id: &QuoteId,
        acceptance_id: &AcceptanceId,
    ) -> Result<Acceptance, ServiceError> {
        self.store
            .load_acceptance(acceptance_id)
            .await?
            .filter(|acceptance| acceptance.quote_id == *quote_id)
            .ok_or_else(|| {
                NegotiationError::NotFound(format!("acceptance {}", acceptance_id.0)).into()
            })
    }

    async fn load_quote_locked(&self, quote_id: &QuoteId) -> Result<Quote, ServiceError> {
        self.store
            .load_quote(quote_id)
            .await?
            .ok_or_else(|| NegotiationError::NotFound(format!("quote {}", quote_id.0)).into())
    }

    async fn load_acceptance_locked(
        &self,
        quote_id: &QuoteId,
        acceptance_id: &AcceptanceId,
    ) -> Result<Acceptance, ServiceError> {
        self.store
            .load_acceptance(acceptance_id)
            .await?
            .filter(|acceptance| acceptance.quote_id == *quote_id)
            .ok_or_else(|| {
                NegotiationError::NotFound(format!("acceptance {}", acceptance_id.0)).into()
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use crate::domain::acceptance::AcceptanceStatus;
    use crate::domain::change::{ChangeItem, ChangeKind, ChangeStatus, FieldCode};
    use crate::domain::quote::{
        AccountId, CompanyId, Quote, QuoteId, QuoteItem, QuoteItemId, QuoteState, RequestId,
        RequestItemId,
    };
    use crate::errors::NegotiationError;
    use crate::events::{DispatchConfig, EventDispatcher, EventSubtype, InMemoryEventSink};
    use crate::negotiation::service::{NegotiationService, ServiceError};
    use crate::negotiation::store::InMemoryNegotiationStore;

    fn requester() -> AccountId {
        AccountId("acct-requester".to_string())
    }

    fn provider() -> AccountId {
        AccountId("acct-provider".to_string())
    }

    fn quote(id: &str, state: QuoteState, version: u32) -> Quote {
        let now = Utc::now();
        Quote {
            id: QuoteId(id.to_string()),
            request_id: RequestId("R-1".to_string()),
            company_id: CompanyId("C-1".to_string()),
            created_by: provider(),
            state,
            currency: "MXN".to_string(),
            total_amount: Decimal::new(120_000, 2),
            version,
            items: vec![QuoteItem {
                id: QuoteItemId("QI-1".to_string()),
                request_item_id: RequestItemId("RI-1".to_string()),
                qty: Decimal::new(2, 0),
                version: 1,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    fn price_item(new_value: &str) -> ChangeItem {
        ChangeItem {
            id: None,
            field: FieldCode::PriceTotal,
            target_quote_item_id: None,
            target_request_item_id: None,
            old_value: None,
            new_value: Some(new_value.to_string()),
        }
    }

    fn service_with_sink(
    ) -> (NegotiationService<Arc<InMemoryNegotiationStore>>, Arc<InMemoryNegotiationStore>, InMemoryEventSink)
    {
        let store = Arc::new(InMemoryNegotiationStore::new());
        let sink = InMemoryEventSink::default();
        let dispatcher = EventDispatcher::spawn(
            sink.clone(),
            DispatchConfig { retry_delay: StdDuration::from_millis(5), ..DispatchConfig::default() },
        );
        let service = NegotiationService::new(store.clone(), dispatcher, Duration::hours(24));
        (service, store, sink)
    }

    async fn wait_for_events(sink: &InMemoryEventSink, count: usize) -> Vec<EventSubtype> {
        for _ in 0..200 {
            let events = sink.events();
            if events.len() >= count {
                return events.into_iter().map(|event| event.subtype).collect();
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        sink.events().into_iter().map(|event| event.subtype).collect()
    }

    #[tokio::test]
    async fn free_change_commits_quote_and_change_together() {
        let (service, store, sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::Trato, 3)).await;

        let change = service
            .apply_change(&requester(), &QuoteId("Q-1".to_string()), vec![price_item("500.00")], Some(3), None)
            .await
            .expect("apply");

        assert_eq!(change.kind, ChangeKind::Libre);
        assert_eq!(change.status, ChangeStatus::Aplicado);

        let stored = service.get_quote(&QuoteId("Q-1".to_string())).await.expect("quote");
        assert_eq!(stored.version, 4);
        assert_eq!(stored.total_amount, Decimal::new(50_000, 2));

        let subtypes = wait_for_events(&sink, 1).await;
        assert_eq!(subtypes, vec![EventSubtype::ChangeApplied]);
    }

    #[tokio::test]
    async fn replaying_the_same_idempotency_key_applies_the_effect_once() {
        let (service, store, _sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::Trato, 1)).await;
        let quote_id = QuoteId("Q-1".to_string());

        let first = service
            .apply_change(&requester(), &quote_id, vec![price_item("500.00")], Some(1), Some("retry-1".to_string()))
            .await
            .expect("first call");
        let second = service
            .apply_change(&requester(), &quote_id, vec![price_item("500.00")], Some(1), Some("retry-1".to_string()))
            .await
            .expect("replay returns the stored outcome despite the stale version");

        assert_eq!(first, second, "replay returns the original result verbatim");
        let stored = service.get_quote(&quote_id).await.expect("quote");
        assert_eq!(stored.version, 2, "the mutation applied exactly once");
    }

    #[tokio::test]
    async fn omitted_keys_are_never_deduplicated() {
        let (service, store, _sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::Trato, 1)).await;
        let quote_id = QuoteId("Q-1".to_string());

        let first = service
            .apply_change(&requester(), &quote_id, vec![price_item("500.00")], None, None)
            .await
            .expect("first");
        let second = service
            .apply_change(&requester(), &quote_id, vec![price_item("600.00")], None, None)
            .await
            .expect("second");

        assert_ne!(first.id, second.id);
        let stored = service.get_quote(&quote_id).await.expect("quote");
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn racing_writers_on_the_same_version_have_one_winner() {
        let (service, store, _sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::Trato, 1)).await;
        let service = Arc::new(service);

        let run = |value: &'static str| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .apply_change(
                        &requester(),
                        &QuoteId("Q-1".to_string()),
                        vec![price_item(value)],
                        Some(1),
                        None,
                    )
                    .await
            })
        };

        let (first, second) = tokio::join!(run("500.00"), run("600.00"));
        let results = [first.expect("task"), second.expect("task")];

        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1, "exactly one writer wins the version race");
        let loser = results
            .iter()
            .find_map(|result| result.as_ref().err())
            .expect("one loser");
        assert!(matches!(
            loser,
            ServiceError::Negotiation(NegotiationError::VersionConflict { expected: 1, actual: 2 })
        ));

        let stored = service.get_quote(&QuoteId("Q-1".to_string())).await.expect("quote");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn proposal_on_closed_deal_waits_for_the_peer_decision() {
        let (service, store, sink) = service_with_sink();
        store.insert_quote(quote("Q-2", QuoteState::Aceptada, 7)).await;
        let quote_id = QuoteId("Q-2".to_string());

        let change = service
            .apply_change(&requester(), &quote_id, vec![price_item("850.00")], None, None)
            .await
            .expect("propose change");
        assert_eq!(change.kind, ChangeKind::Propuesta);
        assert_eq!(change.status, ChangeStatus::Pendiente);

        let untouched = service.get_quote(&quote_id).await.expect("quote");
        assert_eq!(untouched.version, 7);

        service
            .decide_change(&provider(), &quote_id, &change.id, true, Some(7))
            .await
            .expect("peer accepts");

        let decided = service.get_change(&quote_id, &change.id).await.expect("change");
        assert_eq!(decided.status, ChangeStatus::Aplicado);
        let updated = service.get_quote(&quote_id).await.expect("quote");
        assert_eq!(updated.version, 8);
        assert_eq!(updated.total_amount, Decimal::new(85_000, 2));

        let subtypes = wait_for_events(&sink, 2).await;
        assert_eq!(subtypes, vec![EventSubtype::ChangeProposed, EventSubtype::ChangeAccepted]);
    }

    #[tokio::test]
    async fn acceptance_handshake_closes_the_deal_atomically() {
        let (service, store, sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::Trato, 3)).await;
        let quote_id = QuoteId("Q-1".to_string());

        let acceptance = service
            .propose_acceptance(&provider(), &quote_id, Some("retry-9".to_string()), None)
            .await
            .expect("propose");
        assert_eq!(acceptance.status, AcceptanceStatus::Pending);

        let replay = service
            .propose_acceptance(&provider(), &quote_id, Some("retry-9".to_string()), None)
            .await
            .expect("replay");
        assert_eq!(replay, acceptance);

        service
            .confirm_acceptance(&requester(), &quote_id, &acceptance.id)
            .await
            .expect("peer confirms");

        let closed = service.get_quote(&quote_id).await.expect("quote");
        assert_eq!(closed.state, QuoteState::Aceptada);
        assert_eq!(closed.version, 4);
        let stored = service.get_acceptance(&quote_id, &acceptance.id).await.expect("acceptance");
        assert_eq!(stored.status, AcceptanceStatus::Confirmed);

        let subtypes = wait_for_events(&sink, 2).await;
        assert_eq!(
            subtypes,
            vec![EventSubtype::AcceptanceRequest, EventSubtype::AcceptanceConfirmed]
        );
    }

    #[tokio::test]
    async fn a_second_pending_acceptance_is_refused() {
        let (service, store, _sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::EnEspera, 1)).await;
        let quote_id = QuoteId("Q-1".to_string());

        service
            .propose_acceptance(&provider(), &quote_id, None, None)
            .await
            .expect("first handshake");
        let error = service
            .propose_acceptance(&requester(), &quote_id, None, None)
            .await
            .expect_err("second handshake must be refused");
        assert!(matches!(
            error,
            ServiceError::Negotiation(NegotiationError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_quote_is_not_found() {
        let (service, _store, _sink) = service_with_sink();
        let error = service
            .apply_change(&requester(), &QuoteId("Q-404".to_string()), vec![price_item("1.00")], None, None)
            .await
            .expect_err("missing quote");
        assert!(matches!(error, ServiceError::Negotiation(NegotiationError::NotFound(_))));
    }

    #[tokio::test]
    async fn change_of_another_quote_is_invisible() {
        let (service, store, _sink) = service_with_sink();
        store.insert_quote(quote("Q-1", QuoteState::Aceptada, 1)).await;
        store.insert_quote(quote("Q-2", QuoteState::Aceptada, 1)).await;

        let change = service
            .apply_change(&requester(), &QuoteId("Q-1".to_string()), vec![price_item("1.00")], None, None)
            .await
            .expect("propose on Q-1");

        let error = service
            .decide_change(&provider(), &QuoteId("Q-2".to_string()), &change.id, true, None)
            .await
            .expect_err("change belongs to Q-1");
        assert!(matches!(error, ServiceError::Negotiation(NegotiationError::NotFound(_))));
    }
}
