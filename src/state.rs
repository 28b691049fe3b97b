//! Application state management

use std::sync::Arc;
use std::time::Duration;

use crate::auth::OAuthAuthenticator;
use crate::config::Config;
use crate::platform::{http_client, VideoPublisher, YouTubePublisher};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    publisher: Arc<dyn VideoPublisher>,
    authenticator: Arc<OAuthAuthenticator>,
}

impl AppState {
    pub fn new(
        config: Config,
        publisher: Arc<dyn VideoPublisher>,
        authenticator: Arc<OAuthAuthenticator>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                publisher,
                authenticator,
            }),
        }
    }

    /// Wire the OAuth authenticator and YouTube publisher from configuration
    pub async fn from_config(config: Config) -> Result<Self, StateError> {
        let http = http_client(Duration::from_secs(config.youtube.request_timeout_secs))?;

        let authenticator = Arc::new(OAuthAuthenticator::from_config(&config.oauth, http.clone()).await);
        let publisher = Arc::new(YouTubePublisher::new(&config, http, authenticator.clone()));

        Ok(Self::new(config, publisher, authenticator))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the video publisher
    pub fn publisher(&self) -> &dyn VideoPublisher {
        self.inner.publisher.as_ref()
    }

    /// Get the OAuth authenticator
    pub fn authenticator(&self) -> &OAuthAuthenticator {
        &self.inner.authenticator
    }
}
