//! OAuth2 credential types

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are refreshed this long before they actually expire
const EXPIRY_MARGIN_SECS: i64 = 60;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Persisted OAuth2 credentials for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Set once a refresh has been rejected; only a new consent fixes it
    #[serde(default)]
    pub invalid: bool,
}

impl Credentials {
    /// Build credentials from a token endpoint response
    ///
    /// Refresh responses usually omit the refresh token, so the previous one
    /// is carried over.
    pub fn from_token_response(
        response: TokenResponse,
        previous_refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh_token),
            token_expiry: response.expires_in.map(|secs| now + Duration::seconds(secs)),
            scopes: response
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            invalid: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.token_expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }

    /// Whether the access token can be used as-is
    pub fn is_usable(&self) -> bool {
        !self.invalid && !self.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        !self.invalid && self.refresh_token.is_some()
    }
}

/// Token endpoint response body
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OAuth client registration from a Google `client_secrets.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    /// Parse either the `installed` or the `web` client section
    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let file: ClientSecretsFile = serde_json::from_str(raw)
            .map_err(|e| AuthError::InvalidClientSecrets(e.to_string()))?;

        file.installed.or(file.web).ok_or_else(|| {
            AuthError::InvalidClientSecrets(
                "expected an \"installed\" or \"web\" client section".to_string(),
            )
        })
    }

    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AuthError::MissingClientSecrets {
                    path: path.display().to_string(),
                }
            } else {
                AuthError::InvalidClientSecrets(format!("{}: {}", path.display(), e))
            }
        })?;

        Self::from_json(&raw)
    }
}

/// Consent URL handed to the user for one pending authorization
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub profile: String,
    pub state: String,
    pub url: String,
}

/// Credential acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(
        "Please configure OAuth 2.0: populate the client secrets file at {path} \
         with information from the API Console (https://console.cloud.google.com/)"
    )]
    MissingClientSecrets { path: String },

    #[error("Invalid client secrets: {0}")]
    InvalidClientSecrets(String),

    #[error("Invalid credential profile name: {0:?}")]
    InvalidProfile(String),

    #[error("Credential store error: {0}")]
    Store(String),

    /// Endpoint unreachable or failing; stored credentials stay as they are
    #[error("Token request failed: {0}")]
    TokenEndpoint(String),

    /// Endpoint refused the code or refresh token (e.g. `invalid_grant`)
    #[error("Token grant rejected: {0}")]
    GrantRejected(String),

    #[error("Authorization was denied: {0}")]
    Denied(String),

    #[error("Unknown or expired authorization state")]
    UnknownState,

    #[error(
        "Authorization for profile '{profile}' was not completed within {timeout_secs} seconds. \
         Open {url} to grant access, then retry the upload"
    )]
    AuthorizationTimeout {
        profile: String,
        timeout_secs: u64,
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_secrets() {
        let raw = r#"{
            "installed": {
                "client_id": "1234.apps.googleusercontent.com",
                "client_secret": "s3cret",
                "redirect_uris": ["http://localhost"]
            }
        }"#;

        let secrets = ClientSecrets::from_json(raw).unwrap();

        assert_eq!(secrets.client_id, "1234.apps.googleusercontent.com");
        assert_eq!(secrets.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(secrets.auth_uri, DEFAULT_AUTH_URI);
    }

    #[test]
    fn test_parse_web_secrets() {
        let raw = r#"{"web": {"client_id": "web-id", "client_secret": "x", "token_uri": "http://token"}}"#;
        let secrets = ClientSecrets::from_json(raw).unwrap();
        assert_eq!(secrets.client_id, "web-id");
        assert_eq!(secrets.token_uri, "http://token");
    }

    #[test]
    fn test_parse_secrets_without_section() {
        let result = ClientSecrets::from_json(r#"{"other": {}}"#);
        assert!(matches!(result, Err(AuthError::InvalidClientSecrets(_))));
    }

    #[tokio::test]
    async fn test_load_missing_secrets() {
        let result = ClientSecrets::load(Path::new("/nonexistent/client_secrets.json")).await;
        assert!(matches!(result, Err(AuthError::MissingClientSecrets { .. })));
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "ya29.token".to_string(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: Some("scope-a scope-b".to_string()),
            token_type: Some("Bearer".to_string()),
        };

        let credentials =
            Credentials::from_token_response(response, Some("1//refresh".to_string()), now);

        assert_eq!(credentials.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(credentials.scopes, vec!["scope-a", "scope-b"]);
        assert!(!credentials.is_expired_at(now));
        assert!(credentials.is_expired_at(now + Duration::seconds(3550)));
    }

    #[test]
    fn test_invalid_credentials_not_usable() {
        let credentials = Credentials {
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_expiry: None,
            scopes: vec![],
            invalid: true,
        };

        assert!(!credentials.is_usable());
        assert!(!credentials.can_refresh());
    }
}
