//! Order lookup.

use crate::WebResult;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};

/// Fetch one order aggregate.
///
/// ```text
/// GET /order/{order_uid}
/// ```
///
/// 200 with the order in its inbound wire shape, 404 `NOT_FOUND` if it was
/// never ingested, 500 `INTERNAL_SERVER_ERROR` if the store is failing.
///
/// # Errors
///
/// Returns [`AppError`](crate::AppError) for the 404 and 500 cases.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> WebResult<Response> {
    let order = state.service().get_order(&order_uid).await?;
    Ok(Json(order.as_ref()).into_response())
}
