mod direct;
pub mod group;
pub mod hms;

use std::sync::Arc;

use axum::Router;
use tracing::warn;

use crate::{config::Config, AppError, AppResult, AppState};

pub use group::store::deactivate_user;
pub use hms::{HmsClient, VoiceProvider};

/// The voice provider, if one is configured. Without it every voice
/// endpoint that needs a room or a token answers 503.
#[derive(Clone, Default)]
pub struct Voice(Option<Arc<dyn VoiceProvider>>);

impl Voice {
    pub fn new(provider: Arc<dyn VoiceProvider>) -> Self {
        Self(Some(provider))
    }

    pub fn from_config(config: &Config) -> Self {
        match (&config.hms_access_key, &config.hms_secret) {
            (Some(access_key), Some(secret)) => Self::new(Arc::new(HmsClient::new(
                access_key.clone(),
                secret,
                config.hms_template_id.clone(),
            ))),
            _ => {
                warn!("100ms keys not set, voice is disabled");
                Self(None)
            }
        }
    }

    pub fn provider(&self) -> AppResult<&dyn VoiceProvider> {
        self.0
            .as_deref()
            .ok_or_else(|| AppError::Unavailable("Voice service is not configured".to_owned()))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(direct::router())
        .merge(group::router())
}
