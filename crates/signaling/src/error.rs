//! Error types for the signaling client

/// Result type alias using the signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credentials were rejected by the signaling server
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Transport could not be opened or was lost while opening
    #[error("Connection failed: {0}")]
    Connect(String),

    /// No join response within the configured window
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Inbound bytes are not a valid signaling message
    #[error("Decode error: {0}")]
    Decode(String),

    /// Outbound message could not be serialized
    #[error("Encode error: {0}")]
    Encode(String),

    /// Negotiation message belongs to a superseded negotiation epoch
    #[error("Stale negotiation: epoch {received} (current {current})")]
    StaleNegotiation {
        /// Epoch carried by the late message or completion
        received: u64,
        /// Epoch currently in force
        current: u64,
    },

    /// Operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Peer connection capability reported a failure
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Server answered with an error message
    #[error("Server rejected request ({code}): {message}")]
    ServerRejected {
        /// Server error code
        code: u32,
        /// Human-readable reason
        message: String,
    },

    /// Session is not joined (e.g. while reconnecting)
    #[error("Not connected")]
    NotConnected,

    /// Session has been closed
    #[error("Session closed")]
    Closed,

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retried under the reconnect policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connect(_) | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Auth("invalid token".to_string());
        assert_eq!(err.to_string(), "Authentication rejected: invalid token");

        let err = Error::StaleNegotiation {
            received: 1,
            current: 3,
        };
        assert_eq!(err.to_string(), "Stale negotiation: epoch 1 (current 3)");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Connect("refused".to_string()).is_retryable());
        assert!(Error::Timeout("join".to_string()).is_retryable());
        assert!(!Error::Auth("denied".to_string()).is_retryable());
        assert!(!Error::Decode("garbage".to_string()).is_retryable());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err = Error::from(anyhow::anyhow!("peer gone"));
        assert!(matches!(err, Error::Other(_)));
        assert!(!err.is_retryable());
    }
}
