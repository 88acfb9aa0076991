//! Optimizer errors.

use thiserror::Error;

/// Why the vectorizer gave up on a loop. The trace is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotVectorizable {
    #[error("trace is not a loop")]
    NotALoop,
    #[error("vectorization is disabled")]
    Disabled,
    #[error("target has no vector registers")]
    NoSimdSupport,
    #[error("loop has no sized array access")]
    NoArrayAccess,
    #[error("unroll count {0} exceeds the configured maximum")]
    UnrollTooLarge(usize),
    #[error("no packs could be formed")]
    NoPacks,
    #[error("packs form a dependency cycle")]
    CyclicPacks,
    #[error("a guard resuming at the loop header depends on an impure operation")]
    ImpureGuard,
}

/// Error raised while optimizing a trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptError {
    /// The trace contradicts itself (a guard provably always fails).
    /// The caller should discard the trace.
    #[error("invalid loop: {0}")]
    InvalidLoop(String),

    /// Vectorization was rejected; recoverable.
    #[error("not vectorizable: {0}")]
    NotVectorizable(#[from] NotVectorizable),
}

impl OptError {
    pub fn invalid_loop(msg: impl Into<String>) -> Self {
        OptError::InvalidLoop(msg.into())
    }

    pub fn is_invalid_loop(&self) -> bool {
        matches!(self, OptError::InvalidLoop(_))
    }
}

pub type OptResult<T> = Result<T, OptError>;
