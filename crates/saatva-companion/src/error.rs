//! Companion error types.

/// Errors raised while building the companion.
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    /// The keyword automaton could not be compiled.
    #[error("keyword matcher build error: {0}")]
    MatcherBuild(#[from] aho_corasick::BuildError),

    /// The configured delay range is empty or inverted.
    #[error("invalid thinking delay: min {min_ms}ms > max {max_ms}ms")]
    InvalidDelay { min_ms: u64, max_ms: u64 },
}

/// Convenience alias used throughout the companion crate.
pub type Result<T> = std::result::Result<T, CompanionError>;
