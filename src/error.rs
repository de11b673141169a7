//! Error types for dgramlink
//!
//! We use `thiserror` for structured error types that callers can match on.
//! A pipeline run that fails carries the failing stage's error *unchanged* —
//! nothing in the dispatch path re-wraps it.

use thiserror::Error;

/// Result type alias for dgramlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a session or a pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying UDP socket failed during bind, connect, or send.
    #[error("transport error during {op}: {source}")]
    Transport {
        /// Socket operation that failed ("bind", "connect", "send").
        op: &'static str,
        /// Underlying I/O error from the OS.
        source: std::io::Error,
    },

    /// An inbound datagram was not valid base64.
    #[error("malformed payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// I/O error raised by a processing stage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A processing stage failed.
    #[error("stage error: {0}")]
    Stage(String),

    /// A stage invoked its continuation more than once.
    ///
    /// This is a programmer error in the registered stage: the continuation
    /// advances the dispatch cursor exactly once, and a second invocation
    /// would corrupt the run.
    #[error("stage {stage} invoked its continuation more than once")]
    ContinuationReused {
        /// Registration index of the offending stage.
        stage: usize,
    },

    /// The session has been closed; no socket is available.
    #[error("session is closed")]
    SessionClosed,
}

impl Error {
    /// Create a stage error with a domain message.
    pub fn stage(msg: impl Into<String>) -> Self {
        Error::Stage(msg.into())
    }

    pub(crate) fn transport(op: &'static str, source: std::io::Error) -> Self {
        Error::Transport { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transport(
            "bind",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(err.to_string().contains("bind"));

        let err = Error::ContinuationReused { stage: 2 };
        assert!(err.to_string().contains("stage 2"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
