//! Error handling for linkprobe

use thiserror::Error;

/// Main error type for linkprobe
#[derive(Error, Debug, Clone)]
pub enum ProbeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        status_code: Option<u16>,
        url: Option<String>,
    },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Parse error: {message}")]
    Parse {
        message: String,
        content: Option<String>,
    },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        path: Option<String>,
    },

    #[error("Pool fatal error: {message}")]
    Fatal { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProbeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(
        message: impl Into<String>,
        status_code: Option<u16>,
        url: Option<String>,
    ) -> Self {
        Self::Network {
            message: message.into(),
            status_code,
            url,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>, content: Option<String>) -> Self {
        Self::Parse {
            message: message.into(),
            content,
        }
    }

    /// Create a persistence error (ledger or stats store)
    pub fn persistence(message: impl Into<String>, path: Option<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            path,
        }
    }

    /// Create a pool-level fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the supervisor should restart the pool after this error.
    ///
    /// Configuration and validation problems will not fix themselves on a
    /// restart, so they end the process instead.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::Validation { .. })
    }

    /// Whether this error is a transport-level fault that probing treats as a miss
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { status_code, .. } => {
                matches!(status_code, None | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}

/// Convert from common error types
impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let url = err.url().map(|u| u.to_string());

        if err.is_timeout() {
            Self::timeout("HTTP request", 0)
        } else if err.is_connect() {
            Self::network("Connection failed", status_code, url)
        } else if err.is_request() {
            Self::network("Request failed", status_code, url)
        } else {
            Self::network(err.to_string(), status_code, url)
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string(), None)
    }
}

/// All file I/O here is ledger or stats storage
impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string(), None)
    }
}

impl From<regex::Error> for ProbeError {
    fn from(err: regex::Error) -> Self {
        Self::config(format!("Invalid pattern: {}", err))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Helper macros for common error patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::ProbeError::config($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::ProbeError::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::internal(format!($fmt, $($arg)*))
    };
}
