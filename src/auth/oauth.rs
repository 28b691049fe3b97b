//! OAuth2 Authenticator
//!
//! Resolves credentials for a profile in this order:
//! 1. In-memory cache
//! 2. Credential file (refreshed when the access token has expired)
//! 3. Interactive consent: the consent URL is logged, the user approves in a
//!    browser, and the redirect to `/oauth2callback` completes the flow

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::store::{is_valid_profile, CredentialStore};
use super::types::{AuthError, AuthorizationRequest, ClientSecrets, Credentials, TokenResponse};
use crate::config::OAuthConfig;

/// Source of platform credentials
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn obtain_credentials(&self, profile: &str) -> Result<Credentials, AuthError>;
}

type FlowResult = Result<Credentials, String>;

struct PendingAuthorization {
    profile: String,
    created_at: DateTime<Utc>,
    /// Upload waiting on this consent, if any
    waiter: Option<oneshot::Sender<FlowResult>>,
}

pub struct OAuthAuthenticator {
    http: reqwest::Client,
    secrets: Option<ClientSecrets>,
    secrets_path: PathBuf,
    store: CredentialStore,
    scope: String,
    redirect_uri: String,
    flow_timeout: Duration,
    cache: Mutex<HashMap<String, Credentials>>,
    /// Held across a profile's whole lookup so it never runs two flows at once
    profile_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl OAuthAuthenticator {
    pub fn new(
        http: reqwest::Client,
        secrets: Option<ClientSecrets>,
        store: CredentialStore,
        config: &OAuthConfig,
    ) -> Self {
        Self {
            http,
            secrets,
            secrets_path: config.client_secrets_path.clone(),
            store,
            scope: config.scope.clone(),
            redirect_uri: config.redirect_uri.clone(),
            flow_timeout: Duration::from_secs(config.flow_timeout_secs),
            cache: Mutex::new(HashMap::new()),
            profile_locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Build from configuration, loading the client secrets file
    ///
    /// A missing secrets file is not fatal at startup: stored credentials
    /// keep working, and new consents fail with a configuration hint.
    pub async fn from_config(config: &OAuthConfig, http: reqwest::Client) -> Self {
        let secrets = match ClientSecrets::load(&config.client_secrets_path).await {
            Ok(secrets) => Some(secrets),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        };
        let store = CredentialStore::new(&config.credentials_dir, &config.identity);

        Self::new(http, secrets, store, config)
    }

    fn secrets(&self) -> Result<&ClientSecrets, AuthError> {
        self.secrets.as_ref().ok_or_else(|| AuthError::MissingClientSecrets {
            path: self.secrets_path.display().to_string(),
        })
    }

    /// Consent URL for the given state token
    pub fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
        let secrets = self.secrets()?;

        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            secrets.auth_uri,
            urlencoding::encode(&secrets.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scope),
            urlencoding::encode(state),
        ))
    }

    /// Start a consent for `profile` without waiting for it
    pub fn begin_authorization(&self, profile: &str) -> Result<AuthorizationRequest, AuthError> {
        self.register(profile, None)
    }

    fn register(
        &self,
        profile: &str,
        waiter: Option<oneshot::Sender<FlowResult>>,
    ) -> Result<AuthorizationRequest, AuthError> {
        if !is_valid_profile(profile) {
            return Err(AuthError::InvalidProfile(profile.to_string()));
        }

        let state = Uuid::new_v4().simple().to_string();
        let url = self.authorization_url(&state)?;

        let mut pending = self.pending.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(self.flow_timeout.as_secs() as i64);
        pending.retain(|_, entry| entry.created_at > cutoff);
        pending.insert(
            state.clone(),
            PendingAuthorization {
                profile: profile.to_string(),
                created_at: Utc::now(),
                waiter,
            },
        );

        Ok(AuthorizationRequest {
            profile: profile.to_string(),
            state,
            url,
        })
    }

    /// Finish a consent from the redirect's `state` and `code`
    ///
    /// Persists the new credentials and wakes the upload waiting on them.
    /// Returns the profile that was authorized.
    pub async fn complete_authorization(&self, state: &str, code: &str) -> Result<String, AuthError> {
        let entry = self
            .pending
            .lock()
            .remove(state)
            .ok_or(AuthError::UnknownState)?;

        let result = match self.exchange_code(code).await {
            Ok(credentials) => self
                .store
                .save(&entry.profile, &credentials)
                .await
                .map(|()| credentials),
            Err(e) => Err(e),
        };

        match result {
            Ok(credentials) => {
                tracing::info!(profile = %entry.profile, "Authorization completed");
                if let Some(waiter) = entry.waiter {
                    let _ = waiter.send(Ok(credentials));
                }
                Ok(entry.profile)
            }
            Err(e) => {
                tracing::error!(profile = %entry.profile, "Authorization failed: {}", e);
                if let Some(waiter) = entry.waiter {
                    let _ = waiter.send(Err(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Abandon a consent the provider reported as failed
    pub fn reject_authorization(&self, state: &str, reason: &str) -> Result<String, AuthError> {
        let entry = self
            .pending
            .lock()
            .remove(state)
            .ok_or(AuthError::UnknownState)?;

        tracing::warn!(profile = %entry.profile, reason, "Authorization rejected");
        if let Some(waiter) = entry.waiter {
            let _ = waiter.send(Err(reason.to_string()));
        }
        Ok(entry.profile)
    }

    async fn run_flow(&self, profile: &str) -> Result<Credentials, AuthError> {
        let (tx, rx) = oneshot::channel();
        let request = self.register(profile, Some(tx))?;

        tracing::warn!(
            profile,
            url = %request.url,
            "Authorization required. Open the URL in a browser to grant upload access"
        );

        match tokio::time::timeout(self.flow_timeout, rx).await {
            Ok(Ok(Ok(credentials))) => Ok(credentials),
            Ok(Ok(Err(reason))) => Err(AuthError::Denied(reason)),
            Ok(Err(_)) => Err(AuthError::Denied("authorization was abandoned".to_string())),
            Err(_) => {
                self.pending.lock().remove(&request.state);
                Err(AuthError::AuthorizationTimeout {
                    profile: profile.to_string(),
                    timeout_secs: self.flow_timeout.as_secs(),
                    url: request.url,
                })
            }
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<Credentials, AuthError> {
        let secrets = self.secrets()?;
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &secrets.client_id),
                ("client_secret", &secrets.client_secret),
                ("redirect_uri", &self.redirect_uri),
            ])
            .await?;

        Ok(Credentials::from_token_response(response, None, Utc::now()))
    }

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, AuthError> {
        let secrets = self.secrets()?;
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::TokenEndpoint("no refresh token stored".to_string()))?;

        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &secrets.client_id),
                ("client_secret", &secrets.client_secret),
            ])
            .await?;

        Ok(Credentials::from_token_response(
            response,
            credentials.refresh_token.clone(),
            Utc::now(),
        ))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let secrets = self.secrets()?;

        let response = self
            .http
            .post(&secrets.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::GrantRejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::TokenEndpoint(format!("Failed to parse response: {}", e)))
    }

    fn profile_lock(&self, profile: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.profile_locks
            .lock()
            .entry(profile.to_string())
            .or_default()
            .clone()
    }

    fn cached(&self, profile: &str) -> Option<Credentials> {
        self.cache
            .lock()
            .get(profile)
            .filter(|credentials| credentials.is_usable())
            .cloned()
    }

    #[cfg(test)]
    fn pending_state_for(&self, profile: &str) -> Option<String> {
        self.pending
            .lock()
            .iter()
            .find(|(_, entry)| entry.profile == profile)
            .map(|(state, _)| state.clone())
    }

    #[cfg(test)]
    fn pending_count(&self, profile: &str) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|entry| entry.profile == profile)
            .count()
    }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
    async fn obtain_credentials(&self, profile: &str) -> Result<Credentials, AuthError> {
        if !is_valid_profile(profile) {
            return Err(AuthError::InvalidProfile(profile.to_string()));
        }

        let profile_lock = self.profile_lock(profile);
        let _guard = profile_lock.lock().await;

        if let Some(credentials) = self.cached(profile) {
            return Ok(credentials);
        }

        if let Some(stored) = self.store.load(profile).await? {
            if stored.is_usable() {
                self.cache.lock().insert(profile.to_string(), stored.clone());
                return Ok(stored);
            }

            if stored.can_refresh() {
                match self.refresh(&stored).await {
                    Ok(refreshed) => {
                        self.store.save(profile, &refreshed).await?;
                        tracing::debug!(profile, "Refreshed access token");
                        self.cache.lock().insert(profile.to_string(), refreshed.clone());
                        return Ok(refreshed);
                    }
                    Err(AuthError::GrantRejected(reason)) => {
                        tracing::warn!(profile, "Refresh token rejected: {}", reason);
                        let invalid = Credentials {
                            invalid: true,
                            ..stored
                        };
                        if let Err(e) = self.store.save(profile, &invalid).await {
                            tracing::warn!(profile, "Failed to mark credentials invalid: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!(profile, "Token refresh failed: {}", e);
                        return Err(e);
                    }
                }
            }
        }

        let credentials = self.run_flow(profile).await?;
        self.cache.lock().insert(profile.to_string(), credentials.clone());
        Ok(credentials)
    }
}

// ============================================================================
// Tests
// ============================================================================
