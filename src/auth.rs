//! Credential storage and the authentication flows.
//!
//! The remote API authenticates with a bearer token obtained from
//! `POST /login`. The token lives in `state.kdl`; a 401 from any data
//! endpoint clears it so the next command asks the user to log in again.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::config::schema::{self, TaskSyncState};
use crate::config::{TOKEN_ENV, state_kdl_path};
use crate::{Error, Result};

/// Source and sink of the API bearer token.
pub trait CredentialStore: Send + Sync {
    /// The current token, if any.
    fn token(&self) -> Option<String>;

    /// Persist a freshly issued token.
    fn save(&self, token: &str, user: Option<&str>) -> Result<()>;

    /// Forget the stored token.
    fn clear(&self) -> Result<()>;
}

/// Credentials kept in `state.kdl`, with an optional `TSK_TOKEN` override.
pub struct StateFileCredentials {
    path: PathBuf,
    env_token: Option<String>,
}

impl StateFileCredentials {
    /// Credentials for the data directory `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: state_kdl_path(data_dir),
            env_token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full state file contents.
    pub fn state(&self) -> Result<TaskSyncState> {
        schema::read_state(&self.path)
    }
}

impl CredentialStore for StateFileCredentials {
    fn token(&self) -> Option<String> {
        if let Some(ref token) = self.env_token {
            return Some(token.clone());
        }
        match schema::read_state(&self.path) {
            Ok(state) => state.auth_token,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "unreadable state file");
                None
            }
        }
    }

    fn save(&self, token: &str, user: Option<&str>) -> Result<()> {
        let mut state = schema::read_state(&self.path).unwrap_or_default();
        state.auth_token = Some(token.to_string());
        state.token_saved_at = Some(Utc::now());
        if let Some(user) = user {
            state.last_user = Some(user.to_string());
        }
        schema::write_state(&self.path, &state)
    }

    fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut state = schema::read_state(&self.path).unwrap_or_default();
        state.auth_token = None;
        state.token_saved_at = None;
        schema::write_state(&self.path, &state)
    }
}

/// In-memory credentials for embedding the library without a state file.
#[derive(Default)]
pub struct MemoryCredentials {
    token: Mutex<Option<String>>,
}

impl MemoryCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn save(&self, token: &str, _user: Option<&str>) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| Error::Other("credential lock poisoned".to_string()))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| Error::Other("credential lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// Minimal validation of login and registration input.
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(Error::InvalidInput(format!("not an email address: {}", email))),
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < 6 {
        return Err(Error::InvalidInput(
            "password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_state_file_credentials_save_and_clear() {
        unsafe { std::env::remove_var(TOKEN_ENV) };
        let dir = TempDir::new().unwrap();
        let creds = StateFileCredentials::new(dir.path());
        assert_eq!(creds.token(), None);

        creds.save("tok-123", Some("ana@example.com")).unwrap();
        assert_eq!(creds.token().as_deref(), Some("tok-123"));

        creds.clear().unwrap();
        assert_eq!(creds.token(), None);
        let state = creds.state().unwrap();
        assert_eq!(state.last_user.as_deref(), Some("ana@example.com"));
        assert!(state.token_saved_at.is_none());
    }

    #[test]
    fn test_clear_without_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let creds = StateFileCredentials::new(dir.path());
        creds.clear().unwrap();
        assert!(!creds.path().exists());
    }

    #[test]
    fn test_memory_credentials() {
        let creds = MemoryCredentials::new(Some("a".to_string()));
        assert_eq!(creds.token().as_deref(), Some("a"));
        creds.clear().unwrap();
        assert_eq!(creds.token(), None);
        creds.save("b", None).unwrap();
        assert_eq!(creds.token().as_deref(), Some("b"));
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ana@example.com").is_ok());
        assert!(validate_email("ana").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ana@localhost").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("hunter22").is_ok());
        assert!(validate_password("abc").is_err());
    }
}
