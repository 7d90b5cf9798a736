//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading settings or the bad-word list.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read or write a file.
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse or produce JSON.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The bad-word list could not be loaded.
    #[error("failed to load word list {path}: {reason}")]
    WordList { path: String, reason: String },
    /// A settings value was invalid.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err = SettingsError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn word_list_display() {
        let err = SettingsError::WordList {
            path: "badtext.json".into(),
            reason: "not found".into(),
        };
        assert_eq!(err.to_string(), "failed to load word list badtext.json: not found");
    }
}
