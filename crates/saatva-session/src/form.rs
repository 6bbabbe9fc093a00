//! Login and signup form handling.
//!
//! There is no account backend: a valid login form always succeeds and
//! signs in with a fixed placeholder token, and a valid signup form only
//! tells the user to proceed to login.

use tracing::info;

use crate::error::{FormError, SessionResult};
use crate::state::SessionState;

/// Token recorded for every successful login until a real account service
/// issues one.
pub const PLACEHOLDER_TOKEN: &str = "MOCK_FRONTEND_TOKEN";

/// Which form the user is filling in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    Login,
    Signup,
}

impl AuthMode {
    /// The other form.
    pub fn toggled(self) -> Self {
        match self {
            Self::Login => Self::Signup,
            Self::Signup => Self::Login,
        }
    }
}

/// Raw field values from the login/signup form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl AuthForm {
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Check the fields required by `mode`.
    pub fn validate(&self, mode: AuthMode) -> Result<(), FormError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(FormError::CredentialsRequired);
        }
        if mode == AuthMode::Signup {
            if self.email.is_empty() {
                return Err(FormError::EmailRequired);
            }
            if self.password != self.confirm_password {
                return Err(FormError::PasswordMismatch);
            }
        }
        Ok(())
    }
}

/// Result of a successful form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    LoggedIn { username: String, persistent: bool },
    SignedUp { username: String },
}

impl AuthOutcome {
    /// Confirmation text for the user.
    pub fn message(&self) -> String {
        match self {
            Self::LoggedIn { username, .. } => format!("Login successful for user: {username}!"),
            Self::SignedUp { .. } => "Signup successful! Please proceed to Log In.".to_string(),
        }
    }
}

impl SessionState {
    /// Validate `form` for `mode` and, for a login, sign in. `remember`
    /// selects a durable login over an ephemeral one.
    pub fn submit(
        &self,
        form: &AuthForm,
        mode: AuthMode,
        remember: bool,
    ) -> SessionResult<AuthOutcome> {
        form.validate(mode)?;

        let username = form.username.clone();
        match mode {
            AuthMode::Login => {
                if remember {
                    self.login_durable(&username, PLACEHOLDER_TOKEN)?;
                } else {
                    self.login_ephemeral(&username)?;
                }
                Ok(AuthOutcome::LoggedIn {
                    username,
                    persistent: remember,
                })
            }
            AuthMode::Signup => {
                info!(username = %username, "signup accepted");
                Ok(AuthOutcome::SignedUp { username })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
