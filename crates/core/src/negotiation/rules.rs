//! Declarative per-field validation for change items.
//!
//! Every field code is one row in [`FIELD_RULES`]; the rows are evaluated
//! uniformly, so adding a field code means adding a row, not a branch.

use rust_decimal::Decimal;

use crate::domain::change::{ChangeItem, FieldCode};
use crate::errors::NegotiationError;

#[derive(Clone, Copy, Debug)]
pub struct FieldRule {
    pub field: FieldCode,
    pub requires_new_value: bool,
    pub forbids_new_value: bool,
    pub requires_quote_item: bool,
    pub forbids_quote_item: bool,
    pub requires_request_item: bool,
    /// Quantity assumed when ITEM_ADD omits new_value.
    pub default_qty: Option<Decimal>,
}

pub static FIELD_RULES: [FieldRule; 4] = [
    FieldRule {
        field: FieldCode::PriceTotal,
        requires_new_value: true,
        forbids_new_value: false,
        requires_quote_item: false,
        forbids_quote_item: true,
        requires_request_item: false,
        default_qty: None,
    },
    FieldRule {
        field: FieldCode::Qty,
        requires_new_value: true,
        forbids_new_value: false,
        requires_quote_item: true,
        forbids_quote_item: false,
        requires_request_item: false,
        default_qty: None,
    },
    FieldRule {
        field: FieldCode::ItemRemove,
        requires_new_value: false,
        forbids_new_value: true,
        requires_quote_item: true,
        forbids_quote_item: false,
        requires_request_item: false,
        default_qty: None,
    },
    FieldRule {
        field: FieldCode::ItemAdd,
        requires_new_value: false,
        forbids_new_value: false,
        requires_quote_item: false,
        forbids_quote_item: false,
        requires_request_item: true,
        default_qty: Some(Decimal::ONE),
    },
];

impl FieldCode {
    fn rule_index(self) -> usize {
        match self {
            Self::PriceTotal => 0,
            Self::Qty => 1,
            Self::ItemRemove => 2,
            Self::ItemAdd => 3,
        }
    }
}

pub fn rule_for(field: FieldCode) -> &'static FieldRule {
    &FIELD_RULES[field.rule_index()]
}

pub fn validate_items(items: &[ChangeItem]) -> Result<(), NegotiationError> {
    if items.is_empty() {
        return Err(NegotiationError::InvalidChangeData(
            "a change must carry at least one item".to_string(),
        ));
    }
    for item in items {
        validate_item(item)?;
    }
    Ok(())
}

fn validate_item(item: &ChangeItem) -> Result<(), NegotiationError> {
    let rule = rule_for(item.field);
    let field = item.field.as_str();

    if rule.requires_new_value && item.new_value.is_none() {
        return Err(NegotiationError::InvalidChangeData(format!("{field} requires new_value")));
    }
    if rule.forbids_new_value && item.new_value.is_some() {
        return Err(NegotiationError::InvalidChangeData(format!("{field} forbids new_value")));
    }
    if rule.requires_quote_item && item.target_quote_item_id.is_none() {
        return Err(NegotiationError::InvalidChangeData(format!(
            "{field} requires target_quote_item_id"
        )));
    }
    if rule.forbids_quote_item && item.target_quote_item_id.is_some() {
        return Err(NegotiationError::InvalidChangeData(format!(
            "{field} forbids target_quote_item_id"
        )));
    }
    if rule.requires_request_item && item.target_request_item_id.is_none() {
        return Err(NegotiationError::InvalidChangeData(format!(
            "{field} requires target_request_item_id"
        )));
    }
    Ok(())
}

/// Parse a decimal value carried in a change item.
pub fn parse_decimal(field: FieldCode, value: &str) -> Result<Decimal, NegotiationError> {
    Decimal::from_str_exact(value.trim()).map_err(|_| {
        NegotiationError::InvalidChangeData(format!(
            "{} carries a non-numeric value `{value}`",
            field.as_str()
        ))
    })
}
