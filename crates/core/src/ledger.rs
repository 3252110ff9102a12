//! Idempotency ledger for mutating negotiation calls.
//!
//! A mutating call that carries an `Idempotency-Key` is recorded under
//! `(quote, operation, key)` together with a snapshot of its outcome. A
//! retry with the same key within the TTL window returns the stored outcome
//! verbatim instead of recomputing; omitted keys are never deduplicated.
//! The ledger write commits in the same atomic unit as the mutation it
//! records, so a duplicate response is always consistent with the original.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::acceptance::Acceptance;
use crate::domain::change::Change;
use crate::domain::quote::QuoteId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ApplyChange,
    ProposeAcceptance,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyChange => "apply_change",
            Self::ProposeAcceptance => "propose_acceptance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apply_change" => Some(Self::ApplyChange),
            "propose_acceptance" => Some(Self::ProposeAcceptance),
            _ => None,
        }
    }
}

/// The outcome snapshot returned to a deduplicated retry. Serialized only at
/// the storage boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredOutcome {
    Change(Change),
    Acceptance(Acceptance),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub quote_id: QuoteId,
    pub operation: OperationKind,
    pub key: String,
    pub outcome: StoredOutcome,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        quote_id: QuoteId,
        operation: OperationKind,
        key: impl Into<String>,
        outcome: StoredOutcome,
        ttl: Duration,
    ) -> Self {
        let stored_at = Utc::now();
        Self { quote_id, operation, key: key.into(), outcome, stored_at, expires_at: stored_at + ttl }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// TTL-bounded in-memory ledger, used by the in-memory store and by tests.
#[derive(Default)]
pub struct InMemoryIdempotencyLedger {
    records: Mutex<HashMap<(String, OperationKind, String), IdempotencyRecord>>,
}

impl InMemoryIdempotencyLedger {
    pub fn find(
        &self,
        quote_id: &QuoteId,
        operation: OperationKind,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<StoredOutcome> {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = (quote_id.0.clone(), operation, key.to_string());
        match records.get(&slot) {
            Some(record) if record.is_expired(now) => {
                records.remove(&slot);
                None
            }
            Some(record) => Some(record.outcome.clone()),
            None => None,
        }
    }

    pub fn record(&self, record: IdempotencyRecord) {
        let slot = (record.quote_id.0.clone(), record.operation, record.key.clone());
        match self.records.lock() {
            Ok(mut records) => {
                records.insert(slot, record);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(slot, record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::acceptance::{Acceptance, AcceptanceId, AcceptanceStatus};
    use crate::domain::quote::{AccountId, QuoteId};
    use crate::ledger::{
        IdempotencyRecord, InMemoryIdempotencyLedger, OperationKind, StoredOutcome,
    };

    fn acceptance_outcome(quote_id: &QuoteId) -> StoredOutcome {
        StoredOutcome::Acceptance(Acceptance {
            id: AcceptanceId("ACC-1".to_string()),
            quote_id: quote_id.clone(),
            proposed_by: AccountId("acct-1".to_string()),
            idempotency_key: Some("retry-1".to_string()),
            note: None,
            status: AcceptanceStatus::Pending,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn retry_within_ttl_returns_the_stored_outcome() {
        let ledger = InMemoryIdempotencyLedger::default();
        let quote_id = QuoteId("Q-1".to_string());
        let outcome = acceptance_outcome(&quote_id);

        ledger.record(IdempotencyRecord::new(
            quote_id.clone(),
            OperationKind::ProposeAcceptance,
            "retry-1",
            outcome.clone(),
            Duration::hours(24),
        ));

        let found = ledger.find(&quote_id, OperationKind::ProposeAcceptance, "retry-1", Utc::now());
        assert_eq!(found, Some(outcome));
    }

    #[test]
    fn expired_record_is_pruned_and_not_returned() {
        let ledger = InMemoryIdempotencyLedger::default();
        let quote_id = QuoteId("Q-1".to_string());

        ledger.record(IdempotencyRecord::new(
            quote_id.clone(),
            OperationKind::ProposeAcceptance,
            "retry-1",
            acceptance_outcome(&quote_id),
            Duration::seconds(0),
        ));

        let found = ledger.find(&quote_id, OperationKind::ProposeAcceptance, "retry-1", Utc::now());
        assert_eq!(found, None);
    }

    #[test]
    fn the_same_key_on_different_operations_does_not_collide() {
        let ledger = InMemoryIdempotencyLedger::default();
        let quote_id = QuoteId("Q-1".to_string());

        ledger.record(IdempotencyRecord::new(
            quote_id.clone(),
            OperationKind::ProposeAcceptance,
            "retry-1",
            acceptance_outcome(&quote_id),
            Duration::hours(24),
        ));

        let found = ledger.find(&quote_id, OperationKind::ApplyChange, "retry-1", Utc::now());
        assert_eq!(found, None);
    }
}
