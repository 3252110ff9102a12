use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{AccountId, QuoteId, QuoteItemId, RequestItemId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// Applied immediately while the negotiation is open.
    Libre,
    /// Requires the counter-party's decision before taking effect.
    Propuesta,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Libre => "LIBRE",
            Self::Propuesta => "PROPUESTA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LIBRE" => Some(Self::Libre),
            "PROPUESTA" => Some(Self::Propuesta),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    Aplicado,
    Pendiente,
    Rechazado,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aplicado => "APLICADO",
            Self::Pendiente => "PENDIENTE",
            Self::Rechazado => "RECHAZADO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "APLICADO" => Some(Self::Aplicado),
            "PENDIENTE" => Some(Self::Pendiente),
            "RECHAZADO" => Some(Self::Rechazado),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldCode {
    PriceTotal,
    Qty,
    ItemRemove,
    ItemAdd,
}

impl FieldCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceTotal => "PRICE_TOTAL",
            Self::Qty => "QTY",
            Self::ItemRemove => "ITEM_REMOVE",
            Self::ItemAdd => "ITEM_ADD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PRICE_TOTAL" => Some(Self::PriceTotal),
            "QTY" => Some(Self::Qty),
            "ITEM_REMOVE" => Some(Self::ItemRemove),
            "ITEM_ADD" => Some(Self::ItemAdd),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub id: Option<ChangeItemId>,
    pub field: FieldCode,
    pub target_quote_item_id: Option<QuoteItemId>,
    pub target_request_item_id: Option<RequestItemId>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// A recorded mutation of the quote's terms. Immutable once its status is
/// APLICADO or RECHAZADO; only a PENDIENTE proposal may still be decided.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    /// None when the change was parsed from a standalone chat payload.
    pub quote_id: Option<QuoteId>,
    pub kind: ChangeKind,
    pub status: ChangeStatus,
    pub created_by: AccountId,
    pub created_at: DateTime<Utc>,
    pub items: Vec<ChangeItem>,
}

impl Change {
    pub fn is_decided(&self) -> bool {
        matches!(self.status, ChangeStatus::Aplicado | ChangeStatus::Rechazado)
    }
}
