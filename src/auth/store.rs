//! Credential Store
//!
//! One JSON file per credential profile, named after the running process:
//! `{identity}-oauth2.json` for the default profile and
//! `{identity}-{profile}-oauth2.json` for the others.

use std::path::{Path, PathBuf};

use super::types::{AuthError, Credentials};

pub const DEFAULT_PROFILE: &str = "default";

const MAX_PROFILE_LEN: usize = 64;

/// Profile names end up in file names, so keep them to a safe alphabet
pub fn is_valid_profile(profile: &str) -> bool {
    !profile.is_empty()
        && profile.len() <= MAX_PROFILE_LEN
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    identity: String,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>, identity: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            identity: identity.into(),
        }
    }

    pub fn path_for(&self, profile: &str) -> PathBuf {
        let file_name = if profile == DEFAULT_PROFILE {
            format!("{}-oauth2.json", self.identity)
        } else {
            format!("{}-{}-oauth2.json", self.identity, profile)
        };
        self.dir.join(file_name)
    }

    /// Read a profile's credentials
    ///
    /// A missing or unreadable file yields `None`, which sends the caller
    /// through the authorization flow again.
    pub async fn load(&self, profile: &str) -> Result<Option<Credentials>, AuthError> {
        let path = self.path_for(profile);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Store(format!("{}: {}", path.display(), e))),
        };

        match serde_json::from_str(&raw) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable credential file"
                );
                Ok(None)
            }
        }
    }

    pub async fn save(&self, profile: &str, credentials: &Credentials) -> Result<(), AuthError> {
        let path = self.path_for(profile);
        let json = serde_json::to_vec_pretty(credentials)
            .map_err(|e| AuthError::Store(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;

        // Write then rename so a crash never leaves a truncated file behind
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| store_error(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| store_error(&path, e))?;

        tracing::info!(profile, path = %path.display(), "Stored OAuth2 credentials");
        Ok(())
    }
}

fn store_error(path: &Path, e: std::io::Error) -> AuthError {
    AuthError::Store(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_credentials() -> Credentials {
        Credentials {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_expiry: None,
            scopes: vec!["https://www.googleapis.com/auth/youtube.upload".to_string()],
            invalid: false,
        }
    }

    #[test]
    fn test_profile_file_names() {
        let store = CredentialStore::new("/var/lib/vidrelay", "vidrelay-server");

        assert_eq!(
            store.path_for(DEFAULT_PROFILE),
            PathBuf::from("/var/lib/vidrelay/vidrelay-server-oauth2.json")
        );
        assert_eq!(
            store.path_for("podcast-clips"),
            PathBuf::from("/var/lib/vidrelay/vidrelay-server-podcast-clips-oauth2.json")
        );
    }

    #[test]
    fn test_profile_validation() {
        assert!(is_valid_profile("default"));
        assert!(is_valid_profile("random_meme-dump2"));
        assert!(!is_valid_profile(""));
        assert!(!is_valid_profile("../etc/passwd"));
        assert!(!is_valid_profile("with space"));
        assert!(!is_valid_profile(&"a".repeat(65)));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = CredentialStore::new(temp_dir.path().join("creds"), "test");
        let credentials = sample_credentials();

        assert!(store.load(DEFAULT_PROFILE).await.unwrap().is_none());

        store.save(DEFAULT_PROFILE, &credentials).await.unwrap();

        let loaded = store.load(DEFAULT_PROFILE).await.unwrap();
        assert_eq!(loaded, Some(credentials));
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = CredentialStore::new(temp_dir.path(), "test");

        std::fs::write(store.path_for(DEFAULT_PROFILE), b"{not json").unwrap();

        assert!(store.load(DEFAULT_PROFILE).await.unwrap().is_none());
    }
}
