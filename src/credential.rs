// Access credential and its on-disk store.
//
// The credential file holds a single JSON record:
//
// ```json
// {"access_token": "...", "token_type": "Bearer", "expiry": "2024-01-01T12:00:00Z"}
// ```
//
// A file that is missing, unreadable, malformed or expired loads as `None`;
// callers fall back to the acquisition flow.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::OpenResult;

pub const TOKEN_TYPE: &str = "Bearer";

/// Lifetime given to tokens received from the browser redirect. The provider's
/// real `expires_in` is not consulted.
pub const TOKEN_LIFETIME_SECS: i64 = 3599;

/// Tokens count as expired this long before their recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

impl Credential {
    /// A bearer credential expiring [`TOKEN_LIFETIME_SECS`] from now.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self::bearer_at(access_token, Utc::now())
    }

    pub fn bearer_at(access_token: impl Into<String>, issued: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: TOKEN_TYPE.to_string(),
            expiry: issued + Duration::seconds(TOKEN_LIFETIME_SECS),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && !self.token_type.is_empty()
            && self.expiry - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// File-backed credential storage.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential if it exists and is still valid.
    pub fn load(&self) -> Option<Credential> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = ?self.path, error = %e, "No stored credential");
                return None;
            }
        };

        let credential: Credential = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Ignoring unreadable credential file");
                return None;
            }
        };

        if !credential.is_valid() {
            debug!(expiry = %credential.expiry, "Stored credential expired");
            return None;
        }
        Some(credential)
    }

    /// Replace the stored credential. The file is readable by the owner only.
    pub fn save(&self, credential: &Credential) -> OpenResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        // `mode` only applies on creation; tighten a pre-existing file too.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        serde_json::to_writer(&mut file, credential)?;
        file.write_all(b"\n")?;

        debug!(path = ?self.path, "Saved credential");
        Ok(())
    }
}
