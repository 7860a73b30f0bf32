use std::sync::Arc;

use voxbridge::providers::configs::UpstreamConfig;
use voxbridge::providers::UpstreamClient;

use crate::configuration::Settings;

/// Shared application state. Read-only after startup; sessions keep their
/// own mutable state.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<UpstreamClient>,
    pub system_prompt: Option<String>,
    pub auth_token: Option<String>,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let config = UpstreamConfig::new(
            settings.upstream.host.clone(),
            settings.upstream.api_key.clone(),
            settings.upstream.model.clone(),
        )
        .with_timeout(settings.upstream.timeout());

        Ok(AppState {
            client: Arc::new(UpstreamClient::new(config)?),
            system_prompt: settings.upstream.system_prompt.clone(),
            auth_token: settings.auth.token.clone(),
        })
    }
}
