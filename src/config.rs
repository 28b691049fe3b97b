//! Configuration management for VidRelay Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::upload::{RetryPolicy, DEFAULT_CHUNK_SIZE, MAX_RETRIES, RETRIABLE_STATUS_CODES};

pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const YOUTUBE_UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub youtube: YouTubeConfig,
    pub oauth: OAuthConfig,
    pub retry: RetryPolicy,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; any origin when unset
    pub cors_origin: Option<String>,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    /// Resumable upload endpoint for `videos.insert`
    pub upload_url: String,
    /// Bytes per chunk; 0 sends the whole file in one request
    pub chunk_size: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_secrets_path: PathBuf,
    /// Directory holding the persisted credential files
    pub credentials_dir: PathBuf,
    /// Prefix of the credential file names
    pub identity: String,
    pub scope: String,
    pub redirect_uri: String,
    /// How long an upload waits for the browser consent to complete
    pub flow_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root under which per-request working directories are created
    pub work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let port = 5000;
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
                cors_origin: None,
                max_upload_bytes: 4 * 1024 * 1024 * 1024,
            },
            youtube: YouTubeConfig {
                upload_url: DEFAULT_UPLOAD_URL.to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                request_timeout_secs: 300,
            },
            oauth: OAuthConfig {
                client_secrets_path: PathBuf::from("client_secrets.json"),
                credentials_dir: PathBuf::from("."),
                identity: process_identity(),
                scope: YOUTUBE_UPLOAD_SCOPE.to_string(),
                redirect_uri: default_redirect_uri(port),
                flow_timeout_secs: 300,
            },
            retry: RetryPolicy::default(),
            storage: StorageConfig {
                work_dir: env::temp_dir().join("vidrelay-uploads"),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let port = parse_var("SERVER_PORT", defaults.server.port)?;

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port,
                cors_origin: env::var("CORS_ALLOWED_ORIGIN").ok().filter(|o| !o.is_empty()),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.server.max_upload_bytes)?,
            },
            youtube: YouTubeConfig {
                upload_url: env::var("YOUTUBE_UPLOAD_URL").unwrap_or(defaults.youtube.upload_url),
                chunk_size: parse_var("UPLOAD_CHUNK_SIZE", defaults.youtube.chunk_size)?,
                request_timeout_secs: parse_var(
                    "UPLOAD_REQUEST_TIMEOUT_SECS",
                    defaults.youtube.request_timeout_secs,
                )?,
            },
            oauth: OAuthConfig {
                client_secrets_path: env::var("OAUTH_CLIENT_SECRETS")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.oauth.client_secrets_path),
                credentials_dir: env::var("OAUTH_CREDENTIALS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.oauth.credentials_dir),
                identity: env::var("OAUTH_IDENTITY").unwrap_or(defaults.oauth.identity),
                scope: env::var("OAUTH_SCOPE").unwrap_or(defaults.oauth.scope),
                redirect_uri: env::var("OAUTH_REDIRECT_URI")
                    .unwrap_or_else(|_| default_redirect_uri(port)),
                flow_timeout_secs: parse_var(
                    "OAUTH_FLOW_TIMEOUT_SECS",
                    defaults.oauth.flow_timeout_secs,
                )?,
            },
            retry: RetryPolicy {
                max_retries: parse_var("UPLOAD_MAX_RETRIES", MAX_RETRIES)?,
                retriable_status_codes: match env::var("UPLOAD_RETRIABLE_STATUS_CODES") {
                    Ok(raw) => parse_status_codes(&raw)?,
                    Err(_) => RETRIABLE_STATUS_CODES.to_vec(),
                },
            },
            storage: StorageConfig {
                work_dir: env::var("UPLOAD_WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.work_dir),
            },
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

fn parse_status_codes(raw: &str) -> Result<Vec<u16>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            code.parse::<u16>()
                .ok()
                .filter(|status| (100..600).contains(status))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "UPLOAD_RETRIABLE_STATUS_CODES",
                    value: raw.to_string(),
                })
        })
        .collect()
}

fn default_redirect_uri(port: u16) -> String {
    format!("http://localhost:{}/oauth2callback", port)
}

/// Name of the running executable, used to key credential files
fn process_identity() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
