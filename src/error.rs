use std::collections::BTreeMap;

use thiserror::Error;

/// Field name -> messages, as returned by the API on a rejected write.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsoleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Validation failed ({status}): {}", summarize(.errors))]
    Validation { status: u16, errors: FieldErrors },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Another write is already in flight")]
    Busy,

    #[error("No document loaded yet")]
    NotLoaded,

    #[error("View has been unmounted")]
    Unmounted,

    #[error("No rows selected")]
    EmptySelection,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsoleError {
    /// Transport-level failures, as opposed to the server refusing the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Cancelled)
    }

    /// Field errors carried by a validation failure, if any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

fn summarize(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConsoleError::Timeout
        } else if err.is_decode() {
            ConsoleError::Decode(err.to_string())
        } else {
            ConsoleError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        ConsoleError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
