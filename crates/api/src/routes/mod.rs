//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use axum::http::HeaderMap;
use common::UserId;

use crate::error::ApiError;

/// Caller identity. Authentication happens upstream.
pub const USER_ID_HEADER: &str = "X-USER-ID";

/// Reads and validates the caller identity header.
pub(crate) fn caller(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {USER_ID_HEADER} header")))?;
    let user_id = raw
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(UserId::new)
        .filter(UserId::is_valid)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {USER_ID_HEADER} header")))?;
    Ok(user_id)
}
