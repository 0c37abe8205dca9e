//! Error types for osxpve

use thiserror::Error;

/// Result type alias using the osxpve Error
pub type Result<T> = std::result::Result<T, Error>;

/// osxpve error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("Invalid configuration:\n{}", .issues.join("\n"))]
    Validation { issues: Vec<String> },

    #[error("Missing asset: {name} ({hint})")]
    AssetMissing { name: String, hint: String },

    #[error("Download failed: {message} ({hint})")]
    Download { message: String, hint: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command failed (rc={returncode}): {command}")]
    Subprocess {
        command: String,
        returncode: i32,
        output: String,
    },

    #[error("Unsupported macOS release: {0}")]
    UnsupportedRelease(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a download failure with a remediation hint.
    pub fn download(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Download {
            message: message.into(),
            hint: hint.into(),
        }
    }
}
