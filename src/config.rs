// Runtime configuration. Every value has a built-in default and can be
// overridden through a `GDOCS_OPEN_*` environment variable, mostly useful for
// pointing the tool at a test server.

use std::path::{Path, PathBuf};

use tracing::debug;

/// OAuth client registered for the desktop helper.
pub const DEFAULT_CLIENT_ID: &str =
    "839856140400-of8r47k6ieg5bsrup0e23oaa9mel2kef.apps.googleusercontent.com";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v2/files";
pub const DEFAULT_EDITOR_URL: &str = "https://docs.google.com";
pub const DEFAULT_CALLBACK_PORT: u16 = 3333;
pub const CALLBACK_PATH: &str = "/update_token";

pub const TOKEN_FILE: &str = "token.json";
pub const CACHE_FILE: &str = "filelist";

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub scope: String,
    pub auth_url: String,
    pub upload_url: String,
    pub editor_url: String,
    pub callback_port: u16,
    /// Directory holding the token and cache files.
    pub data_dir: PathBuf,
}

impl Config {
    /// Build a configuration from the environment, falling back to the
    /// built-in defaults for anything unset.
    pub fn from_env() -> Self {
        let callback_port = std::env::var("GDOCS_OPEN_CALLBACK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_CALLBACK_PORT);
        let data_dir = std::env::var_os("GDOCS_OPEN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let config = Config {
            client_id: env_or("GDOCS_OPEN_CLIENT_ID", DEFAULT_CLIENT_ID),
            scope: DEFAULT_SCOPE.to_string(),
            auth_url: env_or("GDOCS_OPEN_AUTH_URL", DEFAULT_AUTH_URL),
            upload_url: env_or("GDOCS_OPEN_UPLOAD_URL", DEFAULT_UPLOAD_URL),
            editor_url: env_or("GDOCS_OPEN_EDITOR_URL", DEFAULT_EDITOR_URL),
            callback_port,
            data_dir,
        };
        debug!(data_dir = ?config.data_dir, port = config.callback_port, "Loaded configuration");
        config
    }

    /// Defaults with state kept under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            editor_url: DEFAULT_EDITOR_URL.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
            data_dir: data_dir.into(),
        }
    }

    /// Redirect URI registered with the provider.
    pub fn redirect_url(&self) -> String {
        format!("http://localhost:{}{}", self.callback_port, CALLBACK_PATH)
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

/// State lives next to the executable so a copied install carries its cache.
fn default_data_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .or_else(|| dirs::data_local_dir().map(|d| d.join("gdocs-open")))
        .unwrap_or_else(|| PathBuf::from("."))
}
