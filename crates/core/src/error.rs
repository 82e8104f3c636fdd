use thiserror::Error;

/// Dialer errors
#[derive(Error, Debug)]
pub enum DialerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telephony backend errors (registration, origination, hangup)
    #[error("Telephony error: {0}")]
    Telephony(String),

    /// Persistence gateway errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    /// SQL errors from the SQLite gateway
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Manual dialing refused because every line is in use
    #[error("All {limit} lines are in use")]
    LineLimitReached { limit: usize },

    /// Contact has no dialable phone number
    #[error("No phone number available for contact {0}")]
    NoPhoneNumber(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DialerError {
    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Telephony error
    pub fn telephony<S: Into<String>>(msg: S) -> Self {
        Self::Telephony(msg.into())
    }

    /// Create a new InvalidState error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DialerError::Telephony(_)
                | DialerError::Persistence(_)
                | DialerError::Database(_)
                | DialerError::Timeout(_)
        )
    }

    /// Short category name used in structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            DialerError::Config(_) => "config",
            DialerError::Telephony(_) => "telephony",
            DialerError::Persistence(_) | DialerError::Database(_) => "persistence",
            DialerError::Serialization(_) => "serialization",
            DialerError::InvalidState(_) => "state",
            DialerError::NotFound(_) => "not_found",
            DialerError::LineLimitReached { .. } => "line_limit",
            DialerError::NoPhoneNumber(_) => "contact",
            DialerError::Timeout(_) => "timeout",
            DialerError::Internal(_) => "internal",
        }
    }
}

/// Result type for dialer operations
pub type Result<T> = std::result::Result<T, DialerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(DialerError::telephony("socket closed").is_recoverable());
        assert!(DialerError::Timeout("register".into()).is_recoverable());
        assert!(!DialerError::config("empty number pool").is_recoverable());
        assert!(!DialerError::LineLimitReached { limit: 3 }.is_recoverable());
    }

    #[test]
    fn test_line_limit_message() {
        let err = DialerError::LineLimitReached { limit: 3 };
        assert_eq!(err.to_string(), "All 3 lines are in use");
        assert_eq!(err.category(), "line_limit");
    }
}
