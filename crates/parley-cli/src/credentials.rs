//! Stored bearer credential
//!
//! Kept in ~/.config/parley/credentials.json with restricted permissions (0o600)

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// A saved bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    /// When it was saved, unix milliseconds
    pub saved_at: i64,
}

/// Where a token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Flag,
    Env,
    Stored,
    Config,
}

impl TokenSource {
    /// Tokens handed in explicitly are remembered for next time
    pub fn should_persist(&self) -> bool {
        matches!(self, TokenSource::Flag | TokenSource::Env)
    }
}

/// File-backed credential storage
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location
    pub fn open_default() -> Self {
        Self::new(crate::config::Config::config_dir().join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<StoredCredential> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str::<StoredCredential>(&content)
            .ok()
            .filter(|c| !c.token.trim().is_empty())
    }

    pub fn save(&self, token: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                #[cfg(unix)]
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
            }
        }

        let credential = StoredCredential {
            token: token.to_string(),
            saved_at: chrono::Utc::now().timestamp_millis(),
        };
        let content = serde_json::to_string_pretty(&credential)?;
        fs::write(&self.path, content)?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Forget the stored token. Missing file is fine.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Pick the first non-blank token in priority order
pub fn pick_token(
    flag: Option<String>,
    env: Option<String>,
    stored: Option<String>,
    config: Option<String>,
) -> Option<(String, TokenSource)> {
    [
        (flag, TokenSource::Flag),
        (env, TokenSource::Env),
        (stored, TokenSource::Stored),
        (config, TokenSource::Config),
    ]
    .into_iter()
    .find_map(|(token, source)| {
        token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| (t, source))
    })
}
