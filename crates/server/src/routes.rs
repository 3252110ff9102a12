use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use trato_core::domain::acceptance::{Acceptance, AcceptanceId};
use trato_core::domain::change::{Change, ChangeId, ChangeItem, FieldCode};
use trato_core::domain::quote::{Quote, QuoteId, QuoteItemId, RequestItemId};
use trato_core::negotiation::store::NegotiationStore;
use trato_core::NegotiationService;

use crate::error::ApiError;
use crate::identity::CallerIdentity;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub struct ApiState<S> {
    pub service: Arc<NegotiationService<S>>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self { service: self.service.clone() }
    }
}

pub fn router<S>(service: Arc<NegotiationService<S>>) -> Router
where
    S: NegotiationStore + 'static,
{
    Router::new()
        .route("/quotes/{id}", get(get_quote::<S>))
        .route("/quotes/{id}/changes", post(create_change::<S>))
        .route("/quotes/{id}/changes/{cid}", get(get_change::<S>))
        .route("/quotes/{id}/changes/{cid}/decision", post(decide_change::<S>))
        .route("/quotes/{id}/acceptances", post(propose_acceptance::<S>))
        .route("/quotes/{id}/acceptances/{aid}", get(get_acceptance::<S>))
        .route("/quotes/{id}/acceptances/{aid}/confirm", post(confirm_acceptance::<S>))
        .route("/quotes/{id}/acceptances/{aid}/reject", post(reject_acceptance::<S>))
        .with_state(ApiState { service })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeItemBody {
    pub field_code: String,
    pub target_quote_item_id: Option<String>,
    pub target_request_item_id: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChangeRequest {
    pub items: Vec<ChangeItemBody>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeAcceptanceRequest {
    pub idempotency_key: Option<String>,
    pub note: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeCreatedBody {
    change_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptanceCreatedBody {
    acceptance_id: String,
}

#[derive(Serialize)]
struct OkBody {
    ok: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteItemBody {
    quote_item_id: String,
    request_item_id: String,
    qty: String,
    version: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteBody {
    quote_id: String,
    request_id: String,
    company_id: String,
    created_by: String,
    state_code: &'static str,
    currency: String,
    total_amount: String,
    version: u32,
    items: Vec<QuoteItemBody>,
    created_at: String,
    updated_at: String,
}

impl From<Quote> for QuoteBody {
    fn from(quote: Quote) -> Self {
        Self {
            quote_id: quote.id.0,
            request_id: quote.request_id.0,
            company_id: quote.company_id.0,
            created_by: quote.created_by.0,
            state_code: quote.state.as_str(),
            currency: quote.currency,
            total_amount: quote.total_amount.to_string(),
            version: quote.version,
            items: quote
                .items
                .into_iter()
                .map(|item| QuoteItemBody {
                    quote_item_id: item.id.0,
                    request_item_id: item.request_item_id.0,
                    qty: item.qty.to_string(),
                    version: item.version,
                })
                .collect(),
            created_at: quote.created_at.to_rfc3339(),
            updated_at: quote.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeItemView {
    change_item_id: Option<String>,
    field_code: &'static str,
    target_quote_item_id: Option<String>,
    target_request_item_id: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeBody {
    change_id: String,
    quote_id: Option<String>,
    kind_code: &'static str,
    status_code: &'static str,
    created_by: String,
    created_at: String,
    items: Vec<ChangeItemView>,
}

impl From<Change> for ChangeBody {
    fn from(change: Change) -> Self {
        Self {
            change_id: change.id.0,
            quote_id: change.quote_id.map(|id| id.0),
            kind_code: change.kind.as_str(),
            status_code: change.status.as_str(),
            created_by: change.created_by.0,
            created_at: change.created_at.to_rfc3339(),
            items: change
                .items
                .into_iter()
                .map(|item| ChangeItemView {
                    change_item_id: item.id.map(|id| id.0),
                    field_code: item.field.as_str(),
                    target_quote_item_id: item.target_quote_item_id.map(|id| id.0),
                    target_request_item_id: item.target_request_item_id.map(|id| id.0),
                    old_value: item.old_value,
                    new_value: item.new_value,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptanceBody {
    acceptance_id: String,
    quote_id: String,
    proposed_by: String,
    note: Option<String>,
    status_code: &'static str,
    created_at: String,
}

impl From<Acceptance> for AcceptanceBody {
    fn from(acceptance: Acceptance) -> Self {
        Self {
            acceptance_id: acceptance.id.0,
            quote_id: acceptance.quote_id.0,
            proposed_by: acceptance.proposed_by.0,
            note: acceptance.note,
            status_code: acceptance.status.as_str(),
            created_at: acceptance.created_at.to_rfc3339(),
        }
    }
}

fn expected_version(headers: &HeaderMap) -> Result<Option<u32>, ApiError> {
    let Some(value) = headers.get(header::IF_MATCH) else { return Ok(None) };
    let raw = value
        .to_str()
        .map_err(|_| ApiError::bad_request("If-Match header is not valid text"))?;
    let trimmed = raw.trim().trim_matches('"');
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("If-Match `{raw}` is not a version number")))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

fn to_domain_item(body: ChangeItemBody) -> Result<ChangeItem, ApiError> {
    let field = FieldCode::parse(&body.field_code).ok_or_else(|| {
        ApiError::invalid_change_data(format!("unknown field code `{}`", body.field_code))
    })?;
    Ok(ChangeItem {
        id: None,
        field,
        target_quote_item_id: body.target_quote_item_id.map(QuoteItemId),
        target_request_item_id: body.target_request_item_id.map(RequestItemId),
        old_value: body.old_value,
        new_value: body.new_value,
    })
}

async fn get_quote<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(quote_id): Path<String>,
    _caller: CallerIdentity,
) -> Result<Json<QuoteBody>, ApiError> {
    let quote = state.service.get_quote(&QuoteId(quote_id)).await?;
    Ok(Json(quote.into()))
}

async fn create_change<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(quote_id): Path<String>,
    caller: CallerIdentity,
    headers: HeaderMap,
    Json(body): Json<CreateChangeRequest>,
) -> Result<(StatusCode, Json<ChangeCreatedBody>), ApiError> {
    let expected = expected_version(&headers)?;
    let key = idempotency_key(&headers);
    let items =
        body.items.into_iter().map(to_domain_item).collect::<Result<Vec<_>, ApiError>>()?;

    let change = state
        .service
        .apply_change(&caller.0, &QuoteId(quote_id), items, expected, key)
        .await?;
    Ok((StatusCode::CREATED, Json(ChangeCreatedBody { change_id: change.id.0 })))
}

async fn get_change<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((quote_id, change_id)): Path<(String, String)>,
    _caller: CallerIdentity,
) -> Result<Json<ChangeBody>, ApiError> {
    let change = state.service.get_change(&QuoteId(quote_id), &ChangeId(change_id)).await?;
    Ok(Json(change.into()))
}

async fn decide_change<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((quote_id, change_id)): Path<(String, String)>,
    caller: CallerIdentity,
    headers: HeaderMap,
    Json(body): Json<DecisionRequest>,
) -> Result<StatusCode, ApiError> {
    let expected = expected_version(&headers)?;
    state
        .service
        .decide_change(&caller.0, &QuoteId(quote_id), &ChangeId(change_id), body.accept, expected)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn propose_acceptance<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(quote_id): Path<String>,
    caller: CallerIdentity,
    headers: HeaderMap,
    Json(body): Json<ProposeAcceptanceRequest>,
) -> Result<(StatusCode, Json<AcceptanceCreatedBody>), ApiError> {
    // The key may arrive in the body or the conventional header.
    let key = body.idempotency_key.or_else(|| idempotency_key(&headers));
    let acceptance = state
        .service
        .propose_acceptance(&caller.0, &QuoteId(quote_id), key, body.note)
        .await?;
    Ok((StatusCode::CREATED, Json(AcceptanceCreatedBody { acceptance_id: acceptance.id.0 })))
}

async fn get_acceptance<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((quote_id, acceptance_id)): Path<(String, String)>,
    _caller: CallerIdentity,
) -> Result<Json<AcceptanceBody>, ApiError> {
    let acceptance =
        state.service.get_acceptance(&QuoteId(quote_id), &AcceptanceId(acceptance_id)).await?;
    Ok(Json(acceptance.into()))
}

async fn confirm_acceptance<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((quote_id, acceptance_id)): Path<(String, String)>,
    caller: CallerIdentity,
) -> Result<Json<OkBody>, ApiError> {
    state
        .service
        .confirm_acceptance(&caller.0, &QuoteId(quote_id), &AcceptanceId(acceptance_id))
        .await?;
    Ok(Json(OkBody { ok: true }))
}

async fn reject_acceptance<S: NegotiationStore + 'static>(
    State(state): State<ApiState<S>>,
    Path((quote_id, acceptance_id)): Path<(String, String)>,
    caller: CallerIdentity,
) -> Result<Json<OkBody>, ApiError> {
    state
        .service
        .reject_acceptance(&caller.0, &QuoteId(quote_id), &AcceptanceId(acceptance_id))
        .await?;
    Ok(Json(OkBody { ok: true }))
}
