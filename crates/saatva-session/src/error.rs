//! Error types for the saatva-session crate.

use saatva_store::ValidationError;
use thiserror::Error;

/// Alias for `Result<T, SessionError>`.
pub type SessionResult<T> = Result<T, SessionError>;

/// Form validation failures. The messages are shown to the user as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("Username and password are required.")]
    CredentialsRequired,

    #[error("Email is required for sign up.")]
    EmailRequired,

    #[error("Passwords do not match.")]
    PasswordMismatch,
}

/// Why a login attempt was refused. The session is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The submitted form failed client-side validation.
    #[error(transparent)]
    Form(#[from] FormError),

    /// A login call was given an empty username or token.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
