use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::acceptance::{Acceptance, AcceptanceId, AcceptanceStatus};
use crate::domain::change::{Change, ChangeId};
use crate::domain::quote::{Quote, QuoteId};
use crate::ledger::{IdempotencyRecord, InMemoryIdempotencyLedger, OperationKind, StoredOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("version conflict while committing quote {0:?}")]
    VersionConflict(QuoteId),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Everything one negotiation transition persists. The implementation must
/// commit the whole set atomically: the quote write is a compare-and-swap on
/// its previous version, and a miss fails the entire set.
#[derive(Clone, Debug, Default)]
pub struct CommitSet {
    pub quote: Option<QuoteWrite>,
    pub change: Option<Change>,
    pub acceptance: Option<Acceptance>,
    pub idempotency: Option<IdempotencyRecord>,
}

#[derive(Clone, Debug)]
pub struct QuoteWrite {
    pub quote: Quote,
    /// The version the quote held when this transition loaded it.
    pub expected_version: u32,
}

#[async_trait]
pub trait NegotiationStore: Send + Sync {
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError>;
    async fn load_change(&self, id: &ChangeId) -> Result<Option<Change>, StoreError>;
    async fn load_acceptance(&self, id: &AcceptanceId) -> Result<Option<Acceptance>, StoreError>;
    async fn find_pending_acceptance(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Acceptance>, StoreError>;
    async fn find_operation(
        &self,
        quote_id: &QuoteId,
        operation: OperationKind,
        key: &str,
    ) -> Result<Option<StoredOutcome>, StoreError>;
    async fn commit(&self, commit: CommitSet) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> NegotiationStore for std::sync::Arc<S>
where
    S: NegotiationStore + ?Sized,
{
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        (**self).load_quote(id).await
    }

    async fn load_change(&self, id: &ChangeId) -> Result<Option<Change>, StoreError> {
        (**self).load_change(id).await
    }

    async fn load_acceptance(&self, id: &AcceptanceId) -> Result<Option<Acceptance>, StoreError> {
        (**self).load_acceptance(id).await
    }

    async fn find_pending_acceptance(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Acceptance>, StoreError> {
        (**self).find_pending_acceptance(quote_id).await
    }

    async fn find_operation(
        &self,
        quote_id: &QuoteId,
        operation: OperationKind,
        key: &str,
    ) -> Result<Option<StoredOutcome>, StoreError> {
        (**self).find_operation(quote_id, operation, key).await
    }

    async fn commit(&self, commit: CommitSet) -> Result<(), StoreError> {
        (**self).commit(commit).await
    }
}

/// Store backed by process memory, for tests and single-node tooling.
#[derive(Default)]
pub struct InMemoryNegotiationStore {
    quotes: RwLock<HashMap<String, Quote>>,
    changes: RwLock<HashMap<String, Change>>,
    acceptances: RwLock<HashMap<String, Acceptance>>,
    ledger: InMemoryIdempotencyLedger,
}

impl InMemoryNegotiationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a quote as the upstream creation flow would.
    pub async fn insert_quote(&self, quote: Quote) {
        let mut quotes = self.quotes.write().await;
        quotes.insert(quote.id.0.clone(), quote);
    }
}

#[async_trait]
impl NegotiationStore for InMemoryNegotiationStore {
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn load_change(&self, id: &ChangeId) -> Result<Option<Change>, StoreError> {
        let changes = self.changes.read().await;
        Ok(changes.get(&id.0).cloned())
    }

    async fn load_acceptance(&self, id: &AcceptanceId) -> Result<Option<Acceptance>, StoreError> {
        let acceptances = self.acceptances.read().await;
        Ok(acceptances.get(&id.0).cloned())
    }

    async fn find_pending_acceptance(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Acceptance>, StoreError> {
        let acceptances = self.acceptances.read().await;
        Ok(acceptances
            .values()
            .find(|acceptance| {
                acceptance.quote_id == *quote_id && acceptance.status == AcceptanceStatus::Pending
            })
            .cloned())
    }

    async fn find_operation(
        &self,
        quote_id: &QuoteId,
        operation: OperationKind,
        key: &str,
    ) -> Result<Option<StoredOutcome>, StoreError> {
        Ok(self.ledger.find(quote_id, operation, key, chrono::Utc::now()))
    }

    async fn commit(&self, commit: CommitSet) -> Result<(), StoreError> {
        let mut quotes = self.quotes.write().await;

        if let Some(write) = &commit.quote {
            let stored_version = quotes.get(&write.quote.id.0).map(|quote| quote.version);
            if stored_version != Some(write.expected_version) {
                return Err(StoreError::VersionConflict(write.quote.id.clone()));
            }
        }

        if let Some(write) = commit.quote {
            quotes.insert(write.quote.id.0.clone(), write.quote);
        }
        if let Some(change) = commit.change {
            let mut changes = self.changes.write().await;
            changes.insert(change.id.0.clone(), change);
        }
        if let Some(acceptance) = commit.acceptance {
            let mut acceptances = self.acceptances.write().await;
            acceptances.insert(acceptance.id.0.clone(), acceptance);
        }
        if let Some(record) = commit.idempotency {
            self.ledger.record(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::quote::{
        AccountId, CompanyId, Quote, QuoteId, QuoteState, RequestId,
    };
    use crate::negotiation::store::{
        CommitSet, InMemoryNegotiationStore, NegotiationStore, QuoteWrite, StoreError,
    };

    fn quote(version: u32) -> Quote {
        let now = Utc::now();
        Quote {
            id: QuoteId("Q-1".to_string()),
            request_id: RequestId("R-1".to_string()),
            company_id: CompanyId("C-1".to_string()),
            created_by: AccountId("acct-1".to_string()),
            state: QuoteState::Trato,
            currency: "MXN".to_string(),
            total_amount: Decimal::new(120_000, 2),
            version,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn quote_round_trip() {
        let store = InMemoryNegotiationStore::new();
        store.insert_quote(quote(1)).await;

        let found = store.load_quote(&QuoteId("Q-1".to_string())).await.expect("load");
        assert_eq!(found.map(|quote| quote.version), Some(1));
    }

    #[tokio::test]
    async fn commit_rejects_a_stale_expected_version() {
        let store = InMemoryNegotiationStore::new();
        store.insert_quote(quote(5)).await;

        let mut updated = quote(6);
        updated.total_amount = Decimal::new(99_900, 2);
        let commit = CommitSet {
            quote: Some(QuoteWrite { quote: updated, expected_version: 4 }),
            ..CommitSet::default()
        };

        let error = store.commit(commit).await.expect_err("stale CAS must fail");
        assert_eq!(error, StoreError::VersionConflict(QuoteId("Q-1".to_string())));

        let stored = store.load_quote(&QuoteId("Q-1".to_string())).await.expect("load");
        assert_eq!(stored.map(|quote| quote.version), Some(5), "nothing was applied");
    }
}
