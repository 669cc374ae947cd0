//! Error types for the sphinx dialogue engine.

/// Top-level error type for a guided conversation session.
#[derive(Debug, thiserror::Error)]
pub enum SphinxError {
    /// Free-form input could not be mapped to an expected value.
    #[error("recognition mismatch: {0}")]
    RecognitionMismatch(String),

    /// An external emotion / STT / LLM / sink service was unreachable or errored.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal state was read before it was ready (e.g. fused emotions
    /// before fusion ran).
    #[error("state invariant violated: {0}")]
    StateInvariant(String),

    /// Cooperative cancellation of the session.
    #[error("session terminated")]
    SessionTerminated,

    /// Flow wiring error (unknown intent, malformed handler arguments).
    #[error("flow error: {0}")]
    Flow(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl SphinxError {
    /// Whether this error is an expected failure mode that the session
    /// absorbs (retry, skip, degrade) instead of ending.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RecognitionMismatch(_) | Self::Transport(_) | Self::StateInvariant(_)
        )
    }

    /// Whether this error is the cooperative cancellation signal.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::SessionTerminated)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SphinxError>;
