//! Notification query endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use store::{Datastore, Notification};

use crate::error::ApiError;
use crate::routes::caller;
use crate::routes::orders::AppState;

/// GET /notifications — list the caller's notifications, newest first.
#[tracing::instrument(skip(state, headers))]
pub async fn list<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let user_id = caller(&headers)?;
    let notifications = state.ingestor.list_for_user(user_id).await?;
    Ok(Json(notifications))
}
