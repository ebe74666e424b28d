//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether to route
//! traffic to this instance.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use orderflow_core::CacheStats;
use serde::Serialize;

/// Liveness: the process is up and serving HTTP.
///
/// ```text
/// GET /health  →  200 "ok"
/// ```
///
/// Does not touch the database.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Body of `GET /health/ready`.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `"ready"` or `"unavailable"`.
    pub status: &'static str,
    /// Whether the store answered a ping.
    pub store_reachable: bool,
    /// Cache counters at the time of the check.
    pub cache: CacheStats,
}

/// Readiness: the order store answers, so lookups can be served.
///
/// Returns 200 when the store ping succeeds and 503 otherwise. Both carry
/// the current cache statistics.
///
/// ```text
/// GET /health/ready
/// ```
///
/// ```json
/// {
///   "status": "ready",
///   "store_reachable": true,
///   "cache": { "hits": 12, "misses": 3, "evictions": 0, "len": 3, "capacity": 30 }
/// }
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let service = state.service();
    let store_reachable = match service.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed: store unreachable");
            false
        }
    };

    let (status, label) = if store_reachable {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status,
        Json(Readiness {
            status: label,
            store_reachable,
            cache: service.cache().stats(),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use orderflow_runtime::{OrderCache, OrderService};
    use orderflow_testing::InMemoryOrderStore;
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn state(store: &InMemoryOrderStore) -> AppState {
        let cache = Arc::new(OrderCache::new(NonZeroUsize::new(30).unwrap()));
        AppState::new(OrderService::new(Arc::new(store.clone()), cache))
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn ready_when_store_answers() {
        let store = InMemoryOrderStore::new();

        let (status, Json(body)) = readiness_check(State(state(&store))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ready");
        assert_eq!(body.cache.capacity, 30);
        assert_eq!(store.calls().ping, 1);
    }

    #[tokio::test]
    async fn unavailable_when_ping_fails() {
        let store = InMemoryOrderStore::new();
        store.fail_ping(true);

        let (status, Json(body)) = readiness_check(State(state(&store))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.store_reachable);
    }
}
