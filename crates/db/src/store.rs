use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use trato_core::domain::acceptance::{Acceptance, AcceptanceId, AcceptanceStatus};
use trato_core::domain::change::{
    Change, ChangeId, ChangeItem, ChangeItemId, ChangeKind, ChangeStatus, FieldCode,
};
use trato_core::domain::quote::{
    AccountId, CompanyId, Quote, QuoteId, QuoteItem, QuoteItemId, QuoteState, RequestId,
    RequestItemId,
};
use trato_core::ledger::{OperationKind, StoredOutcome};
use trato_core::negotiation::store::{CommitSet, NegotiationStore, StoreError};

use crate::DbPool;

/// SQLite-backed store. `commit` persists a whole transition in one
/// transaction; the quote row update is a compare-and-swap on the version
/// column, so an external writer racing this process loses cleanly.
pub struct SqlNegotiationStore {
    pool: DbPool,
}

impl SqlNegotiationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}

fn get_text(row: &SqliteRow, column: &str) -> Result<String, StoreError> {
    row.try_get(column).map_err(|e| decode(format!("column `{column}`: {e}")))
}

fn get_opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>, StoreError> {
    row.try_get(column).map_err(|e| decode(format!("column `{column}`: {e}")))
}

fn parse_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode(format!("column `{column}` is not a timestamp: {e}")))
}

fn parse_decimal(raw: &str, column: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str_exact(raw)
        .map_err(|e| decode(format!("column `{column}` is not a decimal: {e}")))
}

fn parse_version(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column).map_err(|e| decode(format!("column `{column}`: {e}")))?;
    u32::try_from(raw).map_err(|_| decode(format!("column `{column}` out of range: {raw}")))
}

fn row_to_quote(row: &SqliteRow) -> Result<Quote, StoreError> {
    let state_raw = get_text(row, "state")?;
    let state = QuoteState::parse(&state_raw)
        .ok_or_else(|| decode(format!("unknown quote state `{state_raw}`")))?;
    Ok(Quote {
        id: QuoteId(get_text(row, "id")?),
        request_id: RequestId(get_text(row, "request_id")?),
        company_id: CompanyId(get_text(row, "company_id")?),
        created_by: AccountId(get_text(row, "created_by")?),
        state,
        currency: get_text(row, "currency")?,
        total_amount: parse_decimal(&get_text(row, "total_amount")?, "total_amount")?,
        version: parse_version(row, "version")?,
        items: Vec::new(),
        created_at: parse_datetime(&get_text(row, "created_at")?, "created_at")?,
        updated_at: parse_datetime(&get_text(row, "updated_at")?, "updated_at")?,
    })
}

fn row_to_quote_item(row: &SqliteRow) -> Result<QuoteItem, StoreError> {
    Ok(QuoteItem {
        id: QuoteItemId(get_text(row, "id")?),
        request_item_id: RequestItemId(get_text(row, "request_item_id")?),
        qty: parse_decimal(&get_text(row, "qty")?, "qty")?,
        version: parse_version(row, "version")?,
    })
}

fn row_to_change(row: &SqliteRow) -> Result<Change, StoreError> {
    let kind_raw = get_text(row, "kind")?;
    let kind = ChangeKind::parse(&kind_raw)
        .ok_or_else(|| decode(format!("unknown change kind `{kind_raw}`")))?;
    let status_raw = get_text(row, "status")?;
    let status = ChangeStatus::parse(&status_raw)
        .ok_or_else(|| decode(format!("unknown change status `{status_raw}`")))?;
    Ok(Change {
        id: ChangeId(get_text(row, "id")?),
        quote_id: get_opt_text(row, "quote_id")?.map(QuoteId),
        kind,
        status,
        created_by: AccountId(get_text(row, "created_by")?),
        created_at: parse_datetime(&get_text(row, "created_at")?, "created_at")?,
        items: Vec::new(),
    })
}

fn row_to_change_item(row: &SqliteRow) -> Result<ChangeItem, StoreError> {
    let field_raw = get_text(row, "field")?;
    let field = FieldCode::parse(&field_raw)
        .ok_or_else(|| decode(format!("unknown field code `{field_raw}`")))?;
    Ok(ChangeItem {
        id: Some(ChangeItemId(get_text(row, "id")?)),
        field,
        target_quote_item_id: get_opt_text(row, "target_quote_item_id")?.map(QuoteItemId),
        target_request_item_id: get_opt_text(row, "target_request_item_id")?.map(RequestItemId),
        old_value: get_opt_text(row, "old_value")?,
        new_value: get_opt_text(row, "new_value")?,
    })
}

fn row_to_acceptance(row: &SqliteRow) -> Result<Acceptance, StoreError> {
    let status_raw = get_text(row, "status")?;
    let status = AcceptanceStatus::parse(&status_raw)
        .ok_or_else(|| decode(format!("unknown acceptance status `{status_raw}`")))?;
    Ok(Acceptance {
        id: AcceptanceId(get_text(row, "id")?),
        quote_id: QuoteId(get_text(row, "quote_id")?),
        proposed_by: AccountId(get_text(row, "proposed_by")?),
        idempotency_key: get_opt_text(row, "idempotency_key")?,
        note: get_opt_text(row, "note")?,
        status,
        created_at: parse_datetime(&get_text(row, "created_at")?, "created_at")?,
    })
}

#[async_trait]
impl NegotiationStore for SqlNegotiationStore {
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let row = sqlx::query(
            "SELECT id, request_id, company_id, created_by, state, currency,
                    total_amount, version, created_at, updated_at
             FROM quote WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        let mut quote = row_to_quote(&row)?;

        let item_rows = sqlx::query(
            "SELECT id, request_item_id, qty, version
             FROM quote_item WHERE quote_id = ? ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        quote.items = item_rows.iter().map(row_to_quote_item).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(quote))
    }

    async fn load_change(&self, id: &ChangeId) -> Result<Option<Change>, StoreError> {
        let row = sqlx::query(
            "SELECT id, quote_id, kind, status, created_by, created_at
             FROM quote_change WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        let mut change = row_to_change(&row)?;

        let item_rows = sqlx::query(
            "SELECT id, field, target_quote_item_id, target_request_item_id, old_value, new_value
             FROM quote_change_item WHERE change_id = ? ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        change.items = item_rows.iter().map(row_to_change_item).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(change))
    }

    async fn load_acceptance(&self, id: &AcceptanceId) -> Result<Option<Acceptance>, StoreError> {
        let row = sqlx::query(
            "SELECT id, quote_id, proposed_by, idempotency_key, note, status, created_at
             FROM acceptance WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref row) => Ok(Some(row_to_acceptance(row)?)),
            None => Ok(None),
        }
    }

    async fn find_pending_acceptance(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Acceptance>, StoreError> {
        let row = sqlx::query(
            "SELECT id, quote_id, proposed_by, idempotency_key, note, status, created_at
             FROM acceptance WHERE quote_id = ? AND status = 'PENDING' LIMIT 1",
        )
        .bind(&quote_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref row) => Ok(Some(row_to_acceptance(row)?)),
            None => Ok(None),
        }
    }

    async fn find_operation(
        &self,
        quote_id: &QuoteId,
        operation: OperationKind,
        key: &str,
    ) -> Result<Option<StoredOutcome>, StoreError> {
        let row = sqlx::query(
            "SELECT outcome_json, expires_at
             FROM idempotency_record
             WHERE quote_id = ? AND operation = ? AND op_key = ?",
        )
        .bind(&quote_id.0)
        .bind(operation.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        let expires_at = parse_datetime(&get_text(&row, "expires_at")?, "expires_at")?;
        if Utc::now() >= expires_at {
            return Ok(None);
        }

        let outcome_json = get_text(&row, "outcome_json")?;
        let outcome: StoredOutcome = serde_json::from_str(&outcome_json)
            .map_err(|e| decode(format!("stored outcome snapshot: {e}")))?;
        Ok(Some(outcome))
    }

    async fn commit(&self, commit: CommitSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(write) = &commit.quote {
            let quote = &write.quote;
            let result = sqlx::query(
                "UPDATE quote
                 SET state = ?, currency = ?, total_amount = ?, version = ?, updated_at = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(quote.state.as_str())
            .bind(&quote.currency)
            .bind(quote.total_amount.to_string())
            .bind(quote.version as i64)
            .bind(quote.updated_at.to_rfc3339())
            .bind(&quote.id.0)
            .bind(write.expected_version as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::VersionConflict(quote.id.clone()));
            }

            sqlx::query("DELETE FROM quote_item WHERE quote_id = ?")
                .bind(&quote.id.0)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
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
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }
        }

        if let Some(change) = &commit.change {
            sqlx::query(
                "INSERT INTO quote_change (id, quote_id, kind, status, created_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status",
            )
            .bind(&change.id.0)
            .bind(change.quote_id.as_ref().map(|id| id.0.clone()))
            .bind(change.kind.as_str())
            .bind(change.status.as_str())
            .bind(&change.created_by.0)
            .bind(change.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            sqlx::query("DELETE FROM quote_change_item WHERE change_id = ?")
                .bind(&change.id.0)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            for (position, item) in change.items.iter().enumerate() {
                let item_id = item
                    .id
                    .as_ref()
                    .ok_or_else(|| decode("change item is missing its id"))?;
                sqlx::query(
                    "INSERT INTO quote_change_item
                         (id, change_id, field, target_quote_item_id, target_request_item_id,
                          old_value, new_value, position)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&item_id.0)
                .bind(&change.id.0)
                .bind(item.field.as_str())
                .bind(item.target_quote_item_id.as_ref().map(|id| id.0.clone()))
                .bind(item.target_request_item_id.as_ref().map(|id| id.0.clone()))
                .bind(&item.old_value)
                .bind(&item.new_value)
                .bind(position as i64)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }
        }

        if let Some(acceptance) = &commit.acceptance {
            sqlx::query(
                "INSERT INTO acceptance
                     (id, quote_id, proposed_by, idempotency_key, note, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status",
            )
            .bind(&acceptance.id.0)
            .bind(&acceptance.quote_id.0)
            .bind(&acceptance.proposed_by.0)
            .bind(&acceptance.idempotency_key)
            .bind(&acceptance.note)
            .bind(acceptance.status.as_str())
            .bind(acceptance.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        if let Some(record) = &commit.idempotency {
            let outcome_json = serde_json::to_string(&record.outcome)
                .map_err(|e| decode(format!("outcome snapshot: {e}")))?;
            sqlx::query(
                "INSERT OR REPLACE INTO idempotency_record
                     (quote_id, operation, op_key, outcome_json, stored_at, expires_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.quote_id.0)
            .bind(record.operation.as_str())
            .bind(&record.key)
            .bind(outcome_json)
            .bind(record.stored_at.to_rfc3339())
            .bind(record.expires_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }
}
