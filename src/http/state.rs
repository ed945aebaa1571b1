use std::sync::Arc;

use crate::tenant::TenantManager;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
}

impl AppState {
    pub fn new(tenants: Arc<TenantManager>) -> Self {
        Self { tenants }
    }
}
