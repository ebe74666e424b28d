//! Application state for Axum handlers.

use orderflow_runtime::OrderService;

/// Shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    service: OrderService,
}

impl AppState {
    /// Wrap the read service.
    #[must_use]
    pub const fn new(service: OrderService) -> Self {
        Self { service }
    }

    /// The read service.
    #[must_use]
    pub const fn service(&self) -> &OrderService {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_clone_send_sync() {
        fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
        assert_bounds::<AppState>();
    }
}
