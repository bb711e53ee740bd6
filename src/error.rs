use thiserror::Error;

/// Errors that can occur while relaying messages between watch and companion
#[derive(Error, Debug)]
pub enum RelayError {
    /// The host messaging capability is absent or not connected
    #[error("{transport} unavailable")]
    TransportUnavailable {
        /// Human readable transport label ("BLE" or "messaging")
        transport: &'static str,
    },

    /// Payload could not be converted to or from JSON
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer answered with `success: false`
    #[error("{0}")]
    Remote(String),

    /// No response arrived in time
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// A message handler was already registered on this transport
    #[error("message handler already registered")]
    HandlerAlreadyRegistered,

    /// The peer end of the channel went away
    #[error("peer disconnected")]
    Disconnected,

    /// HTTP request to the remote service failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured service URL is not usable
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Invalid request parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Inbound data could not be parsed
    #[error("failed to parse message: {0}")]
    ParseError(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bluetooth Low Energy related errors
    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Check if this error comes from the host transport rather than the peer
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        #[cfg(feature = "ble")]
        if matches!(self, Self::Ble(_)) {
            return true;
        }
        matches!(
            self,
            Self::TransportUnavailable { .. } | Self::Disconnected | Self::HandlerAlreadyRegistered
        )
    }

    /// Check if repeating the same user action could succeed
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::TransportUnavailable { .. } | Self::Http(_) | Self::Remote(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unavailable = RelayError::TransportUnavailable { transport: "BLE" };
        assert!(unavailable.is_transport_error());
        assert!(unavailable.is_recoverable());

        let timeout = RelayError::Timeout { timeout_ms: 5000 };
        assert!(!timeout.is_transport_error());
        assert!(timeout.is_recoverable());

        let invalid = RelayError::InvalidUrl("ftp://x".to_string());
        assert!(!invalid.is_transport_error());
        assert!(!invalid.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let ble = RelayError::TransportUnavailable { transport: "BLE" };
        assert_eq!(ble.to_string(), "BLE unavailable");

        let socket = RelayError::TransportUnavailable {
            transport: "messaging",
        };
        assert_eq!(socket.to_string(), "messaging unavailable");

        let remote = RelayError::Remote("bad url".to_string());
        assert_eq!(remote.to_string(), "bad url");
    }
}
