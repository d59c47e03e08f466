//! Shared state for the HTTP API.

use crate::service::CopilotService;

use std::sync::Arc;
use std::time::Instant;

/// State shared across all API handlers.
pub struct ApiState {
    pub service: Arc<CopilotService>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(service: Arc<CopilotService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }
}
