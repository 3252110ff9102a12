//! Seed helpers standing in for the upstream quote-creation flow, which is
//! out of scope for this service but required by tests and local demos.

use chrono::Utc;
use rust_decimal::Decimal;

use trato_core::domain::quote::{
    AccountId, CompanyId, Quote, QuoteId, QuoteItem, QuoteItemId, QuoteState, RequestId,
    RequestItemId,
};

use crate::DbPool;

pub fn sample_quote(id: &str, state: QuoteState, version: u32) -> Quote {
    let now = Utc::now();
    Quote {
        id: QuoteId(id.to_string()),
        request_id: RequestId(format!("R-{id}")),
        company_id: CompanyId("C-1".to_string()),
        created_by: AccountId("acct-provider".to_string()),
        state,
        currency: "MXN".to_string(),
        total_amount: Decimal::new(120_000, 2),
        version,
        items: vec![
            QuoteItem {
                id: QuoteItemId(format!("{id}-item-1")),
                request_item_id: RequestItemId("RI-1".to_string()),
                qty: Decimal::new(2, 0),
                version: 1,
            },
            QuoteItem {
                id: QuoteItemId(format!("{id}-item-2")),
                request_item_id: RequestItemId("RI-2".to_string()),
                qty: Decimal::new(5, 0),
                version: 1,
            },
        ],
        created_at: now,
        updated_at: now,
    }
}

pub async fn insert_quote(pool: &DbPool, quote: &Quote) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO quote
             (id, request_id, company_id, created_by, state, currency,
              total_amount, version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&quote.id.0)
    .bind(&quote.request_id.0)
    .bind(&quote.company_id.0)
    .bind(&quote.created_by.0)
    .bind(quote.state.as_str())
    .bind(&quote.currency)
    .bind(quote.total_amount.to_string())
    .bind(quote.version as i64)
    .bind(quote.created_at.to_rfc3339())
    .bind(quote.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    for (position, item) in quote.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quote_item (id, quote_id, request_item_id, qty, version, position)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(&quote.id.0)
        .bind(&item.request_item_id.0)
        .bind(item.qty.to_string())
        .bind(item.version as i64)
        .bind(position as i64)
        .execute(pool)
        .await?;
    }

    Ok(())
}
