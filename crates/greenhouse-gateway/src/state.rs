use std::sync::Arc;

use greenhouse_advisor::{AdviceStreamer, LlmProvider, StreamerConfig};
use greenhouse_common::Result;
use greenhouse_config::AppConfig;
use greenhouse_db::{ControlSource, ReadingSource, UserSource};

use crate::auth::TokenIssuer;

/// Shared gateway state, cloned cheaply into every handler.
pub struct AppState {
    pub config: AppConfig,
    pub readings: Arc<dyn ReadingSource>,
    pub controls: Arc<dyn ControlSource>,
    pub users: Arc<dyn UserSource>,
    pub tokens: TokenIssuer,
    pub streamer: Arc<AdviceStreamer>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        readings: Arc<dyn ReadingSource>,
        controls: Arc<dyn ControlSource>,
        users: Arc<dyn UserSource>,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let tokens = TokenIssuer::from_config(&config.auth)?;
        let streamer = AdviceStreamer::new(
            Arc::clone(&readings),
            provider,
            StreamerConfig::from(&config),
        );
        Ok(Self {
            config,
            readings,
            controls,
            users,
            tokens,
            streamer: Arc::new(streamer),
        })
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
