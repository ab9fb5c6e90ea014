use std::sync::Arc;

use coindash::refresh::RefreshService;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RefreshService>,
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<RefreshService>) -> Self {
        Self {
            service,
            api_token: None,
        }
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }
}
