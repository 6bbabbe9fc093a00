//! # saatva-session
//!
//! Authentication state for Saatva.
//!
//! [`SessionState`] combines a durable session (the `token` and `username`
//! keys in a shared [`PersistentStore`](saatva_store::PersistentStore))
//! with an in-process ephemeral override, and notifies listeners once per
//! state change. [`AuthForm`] holds the login/signup validation rules.

pub mod error;
pub mod form;
pub mod state;

pub use error::{FormError, SessionError, SessionResult};
pub use form::{AuthForm, AuthMode, AuthOutcome, PLACEHOLDER_TOKEN};
pub use state::{AuthState, ListenerHandle, SessionRecord, SessionState, TOKEN_KEY, USERNAME_KEY};
