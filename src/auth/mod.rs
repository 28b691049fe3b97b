//! OAuth2 credential acquisition and caching
//!
//! Credentials are kept per profile (one platform channel per profile) and
//! persisted to disk so consent is only needed once.

pub mod oauth;
pub mod store;
pub mod types;

pub use oauth::{Authenticator, OAuthAuthenticator};
pub use store::{is_valid_profile, CredentialStore, DEFAULT_PROFILE};
pub use types::{AuthError, AuthorizationRequest, ClientSecrets, Credentials, TokenResponse};
