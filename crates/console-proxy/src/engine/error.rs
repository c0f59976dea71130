//! Exec engine error types.

use std::io;

use thiserror::Error;

use crate::transport::TransportError;

/// Result type for exec engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by an exec engine.
///
/// Display strings carry the engine's own message so callers can surface it
/// to clients unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the request.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The container or exec instance does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The engine could not be reached or the connection failed.
    #[error("engine connection failed: {0}")]
    Transport(String),

    /// The engine's response could not be decoded.
    #[error("failed to decode engine response: {0}")]
    Decode(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stream I/O failed while the exec was running.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Whether the error is the client side of the session going away.
    pub fn is_transport_closed(&self) -> bool {
        matches!(self, EngineError::Io(err) if TransportError::is_closed(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display_is_verbatim() {
        let err = EngineError::Api {
            status: 409,
            message: "container abc is not running".to_string(),
        };
        assert_eq!(err.to_string(), "container abc is not running");

        let err = EngineError::NotFound("No such exec instance: 42".to_string());
        assert_eq!(err.to_string(), "No such exec instance: 42");
    }

    #[test]
    fn test_transport_closed_detection() {
        let closed = EngineError::Io(TransportError::Closed.into());
        assert!(closed.is_transport_closed());

        let broken = EngineError::Io(io::Error::other("broken pipe"));
        assert!(!broken.is_transport_closed());
        assert!(!EngineError::NotFound("x".to_string()).is_transport_closed());
    }
}
