// Error types shared by the library modules. The binary wraps these in
// `anyhow` at the top level.

use thiserror::Error;

/// Errors that can occur while opening, uploading or registering documents.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The file extension does not map to a supported editor.
    #[error("Can't determine filetype of '{0}'")]
    UnrecognizedType(String),

    /// Failed to read or write a local file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A configured URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A cache record failed validation.
    #[error("Invalid cache entry: {0}")]
    InvalidEntry(String),

    /// The browser authorization did not yield a usable token.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The storage service rejected the upload.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Setup needs administrator rights.
    #[error("Run as admin to run setup!")]
    NotElevated,

    /// File association could not be registered.
    #[error("Setup failed: {0}")]
    Setup(String),
}

/// Result type for library operations.
pub type OpenResult<T> = Result<T, OpenError>;
