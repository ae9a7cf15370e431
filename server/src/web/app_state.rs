use std::sync::Arc;

use crate::auth::config::AuthConfig;
use crate::engine::chat_engine::ChatEngine;

/// Shared state handed to every HTTP and WebSocket handler.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub auth_config: AuthConfig,
    /// Origin the client is served from; drives the CORS policy.
    pub public_url: String,
    /// Outbound queue depth for each new WebSocket connection.
    pub outbound_queue: usize,
}
