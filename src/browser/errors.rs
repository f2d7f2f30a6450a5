//! Driver error types

use thiserror::Error;

/// Browser-driver errors
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to connect to profile endpoint: {0}")]
    ConnectFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript error: {0}")]
    JavaScriptError(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("File upload failed: {0}")]
    UploadFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<DriverError> for String {
    fn from(err: DriverError) -> String {
        err.to_string()
    }
}
