pub mod health;
pub mod metrics;
pub mod notifications;
pub mod orders;
pub mod products;

use axum::http::HeaderMap;
use common::UserId;

use crate::error::ApiError;

/// Resolves the calling user from the `x-user-id` header.
pub(crate) fn caller(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get("x-user-id")
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))?
        .to_str()
        .map_err(|_| ApiError::BadRequest("x-user-id header is not valid UTF-8".to_string()))?;
    let uuid = uuid::Uuid::parse_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("invalid x-user-id: {e}")))?;
    Ok(UserId::from_uuid(uuid))
}
