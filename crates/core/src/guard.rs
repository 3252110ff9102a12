//! Per-quote write serialization and optimistic version checking.
//!
//! Quotes are mutually independent, so the guard keeps one async mutex per
//! quote id: every mutating operation runs start-to-commit under that lock,
//! which makes the idempotency lookup, version check, transition and store
//! commit one atomic unit per quote. The staleness check against a
//! caller-supplied expected version is separate so that callers omitting
//! `If-Match` are still serialized but never rejected as stale.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::quote::QuoteId;
use crate::errors::NegotiationError;

#[derive(Default)]
pub struct QuoteGuards {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QuoteGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the quote's write lock; held until the returned guard drops.
    pub async fn acquire(&self, quote_id: &QuoteId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(quote_id.0.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

/// Compare the caller's expected version against the stored one. An omitted
/// expectation skips the staleness check entirely.
pub fn check_version(expected: Option<u32>, actual: u32) -> Result<(), NegotiationError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(NegotiationError::VersionConflict { expected, actual })
        }
        _ => Ok(()),
    }
}
