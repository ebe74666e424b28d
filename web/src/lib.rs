//! Axum HTTP surface for Orderflow.
//!
//! # Routes
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | `GET` | `/order/:order_uid` | [`handlers::get_order`] |
//! | `GET` | `/health` | [`handlers::health_check`] |
//! | `GET` | `/health/ready` | [`handlers::readiness_check`] |
//!
//! Handlers are thin: they call the read service in [`AppState`] and map
//! its errors through [`AppError`].
//!
//! # Example
//!
//! ```ignore
//! use orderflow_web::{AppState, router};
//!
//! let app = router(AppState::new(service));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{Router, routing::get};

pub use error::AppError;
pub use middleware::REQUEST_ID_HEADER;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/order/:order_uid", get(handlers::get_order))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .with_state(state);

    middleware::with_request_tracing(routes)
}
