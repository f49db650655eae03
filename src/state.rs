/*
 * Responsibility
 * - Shared context bound to the Router (AppState)
 * - Cheap to clone (everything inside is behind Arc)
 */
use std::sync::Arc;

use crate::services::orchestrator::MiddlewareOrchestrator;
use crate::tools::ToolDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MiddlewareOrchestrator>,
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AppState {
    pub fn new(orchestrator: Arc<MiddlewareOrchestrator>, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            orchestrator,
            dispatcher,
        }
    }
}
