//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::MatchManager;
use crate::platform::PlatformClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub platform: PlatformClient,
    pub manager: Arc<MatchManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let platform = PlatformClient::new(&config);
        let manager = Arc::new(MatchManager::new(config.game.clone()));
        let config = Arc::new(config);

        Self {
            config,
            platform,
            manager,
        }
    }
}
