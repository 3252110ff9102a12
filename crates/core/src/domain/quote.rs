use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::NegotiationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

/// Back-reference to the request line a quote item was priced from.
/// The request aggregate itself is owned upstream, never here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteState {
    Pending,
    Trato,
    EnEspera,
    Aceptada,
    Rechazada,
}

impl QuoteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Trato => "TRATO",
            Self::EnEspera => "EN_ESPERA",
            Self::Aceptada => "ACEPTADA",
            Self::Rechazada => "RECHAZADA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "TRATO" => Some(Self::Trato),
            "EN_ESPERA" => Some(Self::EnEspera),
            "ACEPTADA" => Some(Self::Aceptada),
            "RECHAZADA" => Some(Self::Rechazada),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aceptada | Self::Rechazada)
    }

    /// A free-form change mutates the quote immediately, without peer review.
    pub fn can_apply_free_change(&self) -> bool {
        matches!(self, Self::Trato | Self::EnEspera)
    }

    /// Once the deal is closed, term changes become proposals the peer decides.
    pub fn can_propose_change(&self) -> bool {
        matches!(self, Self::Aceptada)
    }

    pub fn can_propose_acceptance(&self) -> bool {
        matches!(self, Self::Trato | Self::EnEspera)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub id: QuoteItemId,
    pub request_item_id: RequestItemId,
    pub qty: Decimal,
    pub version: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub request_id: RequestId,
    pub company_id: CompanyId,
    pub created_by: AccountId,
    pub state: QuoteState,
    pub currency: String,
    pub total_amount: Decimal,
    pub version: u32,
    pub items: Vec<QuoteItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn can_transition_to(&self, next: &QuoteState) -> bool {
        matches!(
            (&self.state, next),
            (QuoteState::Pending, QuoteState::Trato)
                | (QuoteState::Pending, QuoteState::EnEspera)
                | (QuoteState::Trato, QuoteState::Aceptada)
                | (QuoteState::EnEspera, QuoteState::Aceptada)
                | (QuoteState::Pending, QuoteState::Rechazada)
                | (QuoteState::Trato, QuoteState::Rechazada)
                | (QuoteState::EnEspera, QuoteState::Rechazada)
        )
    }

    pub fn transition_to(&mut self, next: QuoteState) -> Result<(), NegotiationError> {
        if self.can_transition_to(&next) {
            self.state = next;
            return Ok(());
        }

        Err(NegotiationError::InvalidState {
            operation: "transition",
            reason: format!("quote is {} and cannot become {}", self.state.as_str(), next.as_str()),
        })
    }

    pub fn item(&self, id: &QuoteItemId) -> Option<&QuoteItem> {
        self.items.iter().find(|item| item.id == *id)
    }

    pub fn item_mut(&mut self, id: &QuoteItemId) -> Option<&mut QuoteItem> {
        self.items.iter_mut().find(|item| item.id == *id)
    }
}
