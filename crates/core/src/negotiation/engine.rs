//! Deterministic negotiation transitions.
//!
//! The engine is pure: entities go in, updated entities and the event to
//! emit come out, and nothing touches storage. The service layer wraps each
//! call in the quote's guard lock and persists the outcome in one commit,
//! so every function here describes exactly one atomic transition.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::acceptance::{Acceptance, AcceptanceId, AcceptanceStatus};
use crate::domain::change::{
    Change, ChangeId, ChangeItem, ChangeItemId, ChangeKind, ChangeStatus, FieldCode,
};
use crate::domain::quote::{AccountId, Quote, QuoteItem, QuoteItemId, QuoteState};
use crate::errors::NegotiationError;
use crate::events::{EventPayload, NegotiationEvent};
use crate::guard::check_version;
use crate::negotiation::rules;

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeOutcome {
    pub quote: Quote,
    pub change: Change,
    pub event: NegotiationEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionOutcome {
    pub quote: Quote,
    pub change: Change,
    pub event: NegotiationEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AcceptanceOutcome {
    pub acceptance: Acceptance,
    pub event: NegotiationEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmOutcome {
    pub quote: Quote,
    pub acceptance: Acceptance,
    pub event: NegotiationEvent,
}

#[derive(Clone, Debug, Default)]
pub struct NegotiationEngine;

impl NegotiationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply or propose a term change depending on the quote's state.
    ///
    /// While the negotiation is open (TRATO/EN_ESPERA) the items mutate the
    /// quote immediately and the change is recorded LIBRE/APLICADO with a
    /// version bump. Once the deal is ACEPTADA the items are stored as a
    /// PROPUESTA/PENDIENTE change and the quote stays untouched until the
    /// counter-party decides.
    pub fn apply_change(
        &self,
        mut quote: Quote,
        items: Vec<ChangeItem>,
        caller: &AccountId,
        caller_version: Option<u32>,
    ) -> Result<ChangeOutcome, NegotiationError> {
        rules::validate_items(&items)?;
        check_version(caller_version, quote.version)?;

        let now = Utc::now();
        let mut items = stamp_item_ids(items);

        if quote.state.can_apply_free_change() {
            apply_items(&mut quote, &mut items)?;
            quote.version += 1;
            quote.updated_at = now;

            let change = Change {
                id: ChangeId(Uuid::new_v4().to_string()),
                quote_id: Some(quote.id.clone()),
                kind: ChangeKind::Libre,
                status: ChangeStatus::Aplicado,
                created_by: caller.clone(),
                created_at: now,
                items,
            };
            let event = NegotiationEvent::new(
                quote.id.clone(),
                EventPayload::ChangeApplied {
                    change_id: change.id.clone(),
                    applied_by: caller.clone(),
                    item_count: change.items.len(),
                    total_amount: quote.total_amount,
                    version: quote.version,
                },
            );
            return Ok(ChangeOutcome { quote, change, event });
        }

        if quote.state.can_propose_change() {
            let change = Change {
                id: ChangeId(Uuid::new_v4().to_string()),
                quote_id: Some(quote.id.clone()),
                kind: ChangeKind::Propuesta,
                status: ChangeStatus::Pendiente,
                created_by: caller.clone(),
                created_at: now,
                items,
            };
            let event = NegotiationEvent::new(
                quote.id.clone(),
                EventPayload::ChangeProposed {
                    change_id: change.id.clone(),
                    proposed_by: caller.clone(),
                    item_count: change.items.len(),
                },
            );
            return Ok(ChangeOutcome { quote, change, event });
        }

        Err(NegotiationError::InvalidState {
            operation: "apply_change",
            reason: format!("quote is {}", quote.state.as_str()),
        })
    }

    /// Decide a pending PROPUESTA change. Only the counter-party may decide;
    /// accepting applies the stored items and bumps the version, rejecting
    /// leaves the quote untouched.
    pub fn decide_change(
        &self,
        mut quote: Quote,
        mut change: Change,
        accept: bool,
        caller: &AccountId,
        caller_version: Option<u32>,
    ) -> Result<DecisionOutcome, NegotiationError> {
        if quote.state != QuoteState::Aceptada || change.status != ChangeStatus::Pendiente {
            return Err(NegotiationError::NotPendingChange(change.id));
        }
        if change.created_by == *caller {
            return Err(NegotiationError::SelfDecision(caller.clone()));
        }

        let now = Utc::now();
        if accept {
            check_version(caller_version, quote.version)?;
            apply_items(&mut quote, &mut change.items)?;
            quote.version += 1;
            quote.updated_at = now;
            change.status = ChangeStatus::Aplicado;

            let event = NegotiationEvent::new(
                quote.id.clone(),
                EventPayload::ChangeAccepted {
                    change_id: change.id.clone(),
                    decided_by: caller.clone(),
                    version: quote.version,
                },
            );
            Ok(DecisionOutcome { quote, change, event })
        } else {
            change.status = ChangeStatus::Rechazado;
            let event = NegotiationEvent::new(
                quote.id.clone(),
                EventPayload::ChangeRejected {
                    change_id: change.id.clone(),
                    decided_by: caller.clone(),
                },
            );
            Ok(DecisionOutcome { quote, change, event })
        }
    }

    /// Open the acceptance handshake. At most one acceptance may be pending
    /// per quote at any time.
    pub fn propose_acceptance(
        &self,
        quote: &Quote,
        pending: Option<&Acceptance>,
        caller: &AccountId,
        idempotency_key: Option<String>,
        note: Option<String>,
    ) -> Result<AcceptanceOutcome, NegotiationError> {
        if !quote.state.can_propose_acceptance() {
            return Err(NegotiationError::InvalidState {
                operation: "propose_acceptance",
                reason: format!("quote is {}", quote.state.as_str()),
            });
        }
        if pending.is_some() {
            return Err(NegotiationError::InvalidState {
                operation: "propose_acceptance",
                reason: "an acceptance is already pending for this quote".to_string(),
            });
        }

        let acceptance = Acceptance {
            id: AcceptanceId(Uuid::new_v4().to_string()),
            quote_id: quote.id.clone(),
            proposed_by: caller.clone(),
            idempotency_key,
            note: note.clone(),
            status: AcceptanceStatus::Pending,
            created_at: Utc::now(),
        };
        let event = NegotiationEvent::new(
            quote.id.clone(),
            EventPayload::AcceptanceRequested {
                acceptance_id: acceptance.id.clone(),
                proposed_by: caller.clone(),
                note,
            },
        );
        Ok(AcceptanceOutcome { acceptance, event })
    }

    /// Close the handshake: the counter-party confirms, the quote becomes
    /// ACEPTADA and the version bumps, all as one outcome.
    pub fn confirm_acceptance(
        &self,
        mut quote: Quote,
        mut acceptance: Acceptance,
        caller: &AccountId,
    ) -> Result<ConfirmOutcome, NegotiationError> {
        if acceptance.status != AcceptanceStatus::Pending {
            return Err(NegotiationError::NotPendingAcceptance(acceptance.id));
        }
        if acceptance.proposed_by == *caller {
            return Err(NegotiationError::SelfDecision(caller.clone()));
        }

        quote.transition_to(QuoteState::Aceptada)?;
        quote.version += 1;
        quote.updated_at = Utc::now();
        acceptance.status = AcceptanceStatus::Confirmed;

        let event = NegotiationEvent::new(
            quote.id.clone(),
            EventPayload::AcceptanceConfirmed {
                acceptance_id: acceptance.id.clone(),
                confirmed_by: caller.clone(),
                version: quote.version,
            },
        );
        Ok(ConfirmOutcome { quote, acceptance, event })
    }

    /// Decline the handshake; the quote keeps negotiating unchanged.
    pub fn reject_acceptance(
        &self,
        quote: &Quote,
        mut acceptance: Acceptance,
        caller: &AccountId,
    ) -> Result<AcceptanceOutcome, NegotiationError> {
        if acceptance.status != AcceptanceStatus::Pending {
            return Err(NegotiationError::NotPendingAcceptance(acceptance.id));
        }

        acceptance.status = AcceptanceStatus::Rejected;
        let event = NegotiationEvent::new(
            quote.id.clone(),
            EventPayload::AcceptanceRejected {
                acceptance_id: acceptance.id.clone(),
                rejected_by: caller.clone(),
            },
        );
        Ok(AcceptanceOutcome { acceptance, event })
    }
}

fn stamp_item_ids(items: Vec<ChangeItem>) -> Vec<ChangeItem> {
    items
        .into_iter()
        .map(|mut item| {
            if item.id.is_none() {
                item.id = Some(ChangeItemId(Uuid::new_v4().to_string()));
            }
            item
        })
        .collect()
}

/// Apply validated change items to the quote, recording previous values on
/// the items that did not carry one.
fn apply_items(quote: &mut Quote, items: &mut [ChangeItem]) -> Result<(), NegotiationError> {
    for item in items.iter_mut() {
        match item.field {
            FieldCode::PriceTotal => {
                let value = require_new_value(item)?;
                let amount = rules::parse_decimal(item.field, &value)?;
                if item.old_value.is_none() {
                    item.old_value = Some(quote.total_amount.to_string());
                }
                quote.total_amount = amount;
            }
            FieldCode::Qty => {
                let value = require_new_value(item)?;
                let qty = rules::parse_decimal(item.field, &value)?;
                let target = require_target_item(item)?;
                let line = quote.item_mut(&target).ok_or_else(|| {
                    NegotiationError::NotFound(format!("quote item {}", target.0))
                })?;
                if item.old_value.is_none() {
                    item.old_value = Some(line.qty.to_string());
                }
                line.qty = qty;
                line.version += 1;
            }
            FieldCode::ItemRemove => {
                let target = require_target_item(item)?;
                let index =
                    quote.items.iter().position(|line| line.id == target).ok_or_else(|| {
                        NegotiationError::NotFound(format!("quote item {}", target.0))
                    })?;
                let removed = quote.items.remove(index);
                if item.old_value.is_none() {
                    item.old_value = Some(removed.qty.to_string());
                }
            }
            FieldCode::ItemAdd => {
                let request_item = item.target_request_item_id.clone().ok_or_else(|| {
                    NegotiationError::InvalidChangeData(
                        "ITEM_ADD requires target_request_item_id".to_string(),
                    )
                })?;
                let qty = match item.new_value.as_deref() {
                    Some(value) => rules::parse_decimal(item.field, value)?,
                    None => rules::rule_for(item.field).default_qty.unwrap_or(Decimal::ONE),
                };
                quote.items.push(QuoteItem {
                    id: QuoteItemId(Uuid::new_v4().to_string()),
                    request_item_id: request_item,
                    qty,
                    version: 1,
                });
            }
        }
    }
    Ok(())
}

fn require_new_value(item: &ChangeItem) -> Result<String, NegotiationError> {
    item.new_value.clone().ok_or_else(|| {
        NegotiationError::InvalidChangeData(format!("{} requires new_value", item.field.as_str()))
    })
}

fn require_target_item(item: &ChangeItem) -> Result<QuoteItemId, NegotiationError> {
    item.target_quote_item_id.clone().ok_or_else(|| {
        NegotiationError::InvalidChangeData(format!(
            "{} requires target_quote_item_id",
            item.field.as_str()
        ))
    })
}
