use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use trato_core::domain::quote::AccountId;

use crate::error::ApiError;

/// Stand-in for the identity middleware: the authenticated account id
/// arrives in this header and is threaded explicitly into every core call,
/// never read from ambient state.
pub const ACCOUNT_HEADER: &str = "x-account-id";

#[derive(Clone, Debug)]
pub struct CallerIdentity(pub AccountId);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match account {
            Some(account) => Ok(Self(AccountId(account.to_string()))),
            None => Err(ApiError::unauthorized()),
        }
    }
}
