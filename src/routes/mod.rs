pub mod api_routes;
pub mod ws_routes;

use std::time::Duration;

use crate::service::agent_service::AgentService;

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    pub agents: AgentService,
    pub connect_timeout: Duration,
}
