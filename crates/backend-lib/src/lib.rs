// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core functionality for the room chat WebSocket server.

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod registry;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::gateway::ConnectionGateway;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Connection table and room registry
    pub gateway: Arc<ConnectionGateway>,
    /// Loaded settings
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state with an empty registry
    pub fn new(settings: Settings) -> Self {
        let gateway = Arc::new(ConnectionGateway::new(&settings));
        Self {
            gateway,
            settings: Arc::new(settings),
        }
    }
}
