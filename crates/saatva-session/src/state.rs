//! Authentication state derived from durable and ephemeral sessions.
//!
//! A durable login writes `token` and `username` through the shared
//! [`PersistentStore`] and survives restart. An ephemeral login lives only
//! in this process. On construction, and whenever another process changes
//! either durable key, the state is recomputed from durable storage alone.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use saatva_store::{PersistentStore, Subscription, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SessionResult;

/// Durable key holding the opaque session token.
pub const TOKEN_KEY: &str = "token";

/// Durable key holding the account name.
pub const USERNAME_KEY: &str = "username";

/// The live login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub username: String,
    /// Whether this login is mirrored into durable storage.
    pub persistent: bool,
}

/// Current authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated(SessionRecord),
}

impl AuthState {
    fn authenticated(username: impl Into<String>, persistent: bool) -> Self {
        Self::Authenticated(SessionRecord {
            username: username.into(),
            persistent,
        })
    }

    /// The logged-in record, if any.
    pub fn record(&self) -> Option<&SessionRecord> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated(record) => Some(record),
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("not logged in"),
            Self::Authenticated(r) if r.persistent => write!(f, "{} (remembered)", r.username),
            Self::Authenticated(r) => write!(f, "{} (this session only)", r.username),
        }
    }
}

type Listener = dyn Fn(&AuthState) + Send + Sync;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_id: BTreeMap<u64, Arc<Listener>>,
}

/// Current state plus the changes not yet delivered to listeners.
#[derive(Default)]
struct Machine {
    current: AuthState,
    undelivered: VecDeque<AuthState>,
    delivering: bool,
}

struct Inner {
    store: Arc<PersistentStore>,
    machine: Mutex<Machine>,
    listeners: Mutex<Listeners>,
}

impl Inner {
    fn durable_state(&self) -> AuthState {
        let token: Option<String> = self.store.read(TOKEN_KEY, None);
        let username: Option<String> = self.store.read(USERNAME_KEY, None);
        match (token, username) {
            (Some(_), Some(username)) if !username.trim().is_empty() => {
                AuthState::authenticated(username, true)
            }
            _ => AuthState::Unauthenticated,
        }
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in `next` and notify listeners if it differs from the current
    /// state.
    ///
    /// Changes are delivered in the order they were applied, by one thread
    /// at a time. A transition made while another thread (or a listener
    /// further up this stack) is delivering is queued and delivered by it.
    fn transition(&self, next: AuthState) {
        {
            let mut machine = self.machine();
            if machine.current == next {
                debug!(state = %next, "session unchanged");
                return;
            }
            machine.current = next.clone();
            info!(state = %next, "session changed");
            machine.undelivered.push_back(next);
            if machine.delivering {
                return;
            }
            machine.delivering = true;
        }

        loop {
            let state = {
                let mut machine = self.machine();
                match machine.undelivered.pop_front() {
                    Some(state) => state,
                    None => {
                        machine.delivering = false;
                        return;
                    }
                }
            };

            let listeners: Vec<Arc<Listener>> = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .by_id
                .values()
                .cloned()
                .collect();
            for listener in listeners {
                listener(&state);
            }
        }
    }

    fn reconcile(&self) {
        debug!("durable session changed externally, re-deriving state");
        self.transition(self.durable_state());
    }
}

/// Registration handle returned by [`SessionState::subscribe`]. Dropping
/// it unregisters the listener.
#[must_use = "dropping a ListenerHandle unregisters its listener"]
pub struct ListenerHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .by_id
                .remove(&self.id);
        }
    }
}

/// Authentication state machine over a shared [`PersistentStore`].
pub struct SessionState {
    inner: Arc<Inner>,
    _store_subscriptions: [Subscription; 2],
}

impl SessionState {
    /// Derive the initial state from durable storage and start listening
    /// for external changes to the durable session keys.
    pub fn new(store: Arc<PersistentStore>) -> Self {
        let inner = Arc::new(Inner {
            store: Arc::clone(&store),
            machine: Mutex::new(Machine::default()),
            listeners: Mutex::new(Listeners::default()),
        });
        let initial = inner.durable_state();
        debug!(state = %initial, "session initialized from durable storage");
        inner.machine().current = initial;

        let watch = |key: &str| {
            let weak = Arc::downgrade(&inner);
            store.subscribe(key, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.reconcile();
                }
            })
        };
        let subscriptions = [watch(TOKEN_KEY), watch(USERNAME_KEY)];

        Self {
            inner,
            _store_subscriptions: subscriptions,
        }
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> AuthState {
        self.inner.machine().current.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.current(), AuthState::Authenticated(_))
    }

    /// Name of the logged-in user, if any.
    pub fn username(&self) -> Option<String> {
        self.current().record().map(|r| r.username.clone())
    }

    /// Log in and remember the session across restarts.
    pub fn login_durable(&self, username: &str, token: &str) -> SessionResult<()> {
        require("username", username)?;
        require("token", token)?;

        self.inner.store.write(TOKEN_KEY, token.to_string());
        self.inner.store.write(USERNAME_KEY, username.to_string());
        self.inner
            .transition(AuthState::authenticated(username, true));
        Ok(())
    }

    /// Log in for the lifetime of this process only. Durable storage is
    /// not touched.
    pub fn login_ephemeral(&self, username: &str) -> SessionResult<()> {
        require("username", username)?;
        self.inner
            .transition(AuthState::authenticated(username, false));
        Ok(())
    }

    /// Clear the durable session (if any) and return to
    /// [`AuthState::Unauthenticated`].
    pub fn logout(&self) {
        self.inner.store.remove(TOKEN_KEY);
        self.inner.store.remove(USERNAME_KEY);
        self.inner.transition(AuthState::Unauthenticated);
    }

    /// Register `listener` to be called synchronously, in registration
    /// order, after each state change.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.by_id.insert(id, Arc::new(listener));

        ListenerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("state", &self.current())
            .finish()
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError { field });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use saatva_store::{MemoryBackend, StorageBackend};

    fn setup() -> (MemoryBackend, Arc<PersistentStore>) {
        let backend = MemoryBackend::new();
        let store = Arc::new(PersistentStore::new(Arc::new(backend.clone())));
        (backend, store)
    }

    fn recorder(session: &SessionState) -> (Arc<Mutex<Vec<AuthState>>>, ListenerHandle) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = session.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
        (seen, handle)
    }

    #[test]
    fn starts_unauthenticated_on_empty_storage() {
        let (_backend, store) = setup();
        assert_eq!(SessionState::new(store).current(), AuthState::Unauthenticated);
    }

    #[test]
    fn durable_record_wins_at_init() {
        let (backend, _) = setup();
        backend.insert_raw(TOKEN_KEY, "\"t\"").unwrap();
        backend.insert_raw(USERNAME_KEY, "\"alice\"").unwrap();

        let store = Arc::new(PersistentStore::new(Arc::new(backend)));
        let session = SessionState::new(store);
        assert_eq!(session.current(), AuthState::authenticated("alice", true));
    }

    #[test]
    fn token_without_username_is_not_a_session() {
        let (backend, _) = setup();
        backend.insert_raw(TOKEN_KEY, "\"t\"").unwrap();
        let session = SessionState::new(Arc::new(PersistentStore::new(Arc::new(backend))));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn malformed_durable_record_is_unauthenticated() {
        let (backend, _) = setup();
        backend.insert_raw(TOKEN_KEY, "not json").unwrap();
        backend.insert_raw(USERNAME_KEY, "\"alice\"").unwrap();
        let session = SessionState::new(Arc::new(PersistentStore::new(Arc::new(backend))));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn durable_login_writes_both_keys() {
        let (backend, store) = setup();
        let session = SessionState::new(store);
        session.login_durable("alice", "t").unwrap();

        assert_eq!(session.current(), AuthState::authenticated("alice", true));
        assert_eq!(backend.load(TOKEN_KEY).unwrap().as_deref(), Some("\"t\""));
        assert_eq!(backend.load(USERNAME_KEY).unwrap().as_deref(), Some("\"alice\""));
    }

    #[test]
    fn ephemeral_login_does_not_persist() {
        let (backend, store) = setup();
        let session = SessionState::new(store);
        session.login_ephemeral("bob").unwrap();
        assert_eq!(session.current(), AuthState::authenticated("bob", false));
        assert!(backend.load(USERNAME_KEY).unwrap().is_none());

        // A fresh process sees nothing.
        let restarted = SessionState::new(Arc::new(PersistentStore::new(Arc::new(backend))));
        assert_eq!(restarted.current(), AuthState::Unauthenticated);
    }

    #[test]
    fn logout_is_idempotent() {
        let (backend, store) = setup();
        let session = SessionState::new(store);
        session.login_durable("alice", "t").unwrap();

        for _ in 0..2 {
            session.logout();
            assert_eq!(session.current(), AuthState::Unauthenticated);
            assert!(backend.load(TOKEN_KEY).unwrap().is_none());
            assert!(backend.load(USERNAME_KEY).unwrap().is_none());
        }
    }

    #[test]
    fn logout_ends_ephemeral_session() {
        let (_backend, store) = setup();
        let session = SessionState::new(store);
        session.login_ephemeral("bob").unwrap();
        session.logout();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn empty_username_is_rejected() {
        let (backend, store) = setup();
        let session = SessionState::new(store);

        let err = session.login_durable("  ", "t").unwrap_err();
        assert_eq!(
            err,
            SessionError::Validation(ValidationError { field: "username" })
        );
        assert!(session.login_ephemeral("").is_err());
        assert!(session.login_durable("alice", "").is_err());

        assert!(!session.is_authenticated());
        assert!(backend.load(TOKEN_KEY).unwrap().is_none());
    }

    #[test]
    fn listeners_notified_once_per_change_in_order() {
        let (_backend, store) = setup();
        let session = SessionState::new(store);

        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<ListenerHandle> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                session.subscribe(move |_| order.lock().unwrap().push(i))
            })
            .collect();

        session.login_durable("alice", "t").unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        // Same state again is not a change.
        session.login_durable("alice", "t").unwrap();
        assert_eq!(order.lock().unwrap().len(), 3);
        drop(handles);
    }

    #[test]
    fn listener_observes_store_already_updated() {
        let (_backend, store) = setup();
        let session = SessionState::new(Arc::clone(&store));

        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let reader = Arc::clone(&store);
        let _handle = session.subscribe(move |_| {
            let name: Option<String> = reader.read(USERNAME_KEY, None);
            *sink.lock().unwrap() = Some(name);
        });

        session.login_durable("alice", "t").unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(Some("alice".to_string())));

        session.logout();
        assert_eq!(*observed.lock().unwrap(), Some(None));
    }

    #[test]
    fn dropped_listener_is_not_called() {
        let (_backend, store) = setup();
        let session = SessionState::new(store);
        let (seen, handle) = recorder(&session);
        assert_eq!(session.listener_count(), 1);

        drop(handle);
        assert_eq!(session.listener_count(), 0);
        session.login_ephemeral("bob").unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn external_login_and_logout_are_reconciled() {
        let backend = MemoryBackend::new();
        let store_a = Arc::new(PersistentStore::new(Arc::new(backend.clone())));
        let store_b = Arc::new(PersistentStore::new(Arc::new(backend)));
        let tab_a = SessionState::new(Arc::clone(&store_a));
        let tab_b = SessionState::new(store_b);
        let (seen, _handle) = recorder(&tab_a);

        tab_b.login_durable("carol", "t").unwrap();
        assert_eq!(store_a.poll_external(), 2);
        assert_eq!(tab_a.current(), AuthState::authenticated("carol", true));

        tab_b.logout();
        store_a.poll_external();
        assert_eq!(tab_a.current(), AuthState::Unauthenticated);

        // One notification per logical change, not per key.
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AuthState::authenticated("carol", true),
                AuthState::Unauthenticated
            ]
        );
    }

    #[test]
    fn external_logout_clears_ephemeral_session() {
        let backend = MemoryBackend::new();
        let tab_b = SessionState::new(Arc::new(PersistentStore::new(Arc::new(backend.clone()))));
        tab_b.login_durable("dave", "t").unwrap();

        let store_a = Arc::new(PersistentStore::new(Arc::new(backend)));
        let tab_a = SessionState::new(Arc::clone(&store_a));
        tab_a.login_ephemeral("erin").unwrap();
        assert_eq!(tab_a.current(), AuthState::authenticated("erin", false));

        tab_b.logout();
        store_a.poll_external();
        assert_eq!(tab_a.current(), AuthState::Unauthenticated);
    }

    #[test]
    fn external_durable_login_replaces_ephemeral_session() {
        let backend = MemoryBackend::new();
        let store_a = Arc::new(PersistentStore::new(Arc::new(backend.clone())));
        let tab_a = SessionState::new(Arc::clone(&store_a));
        let tab_b = SessionState::new(Arc::new(PersistentStore::new(Arc::new(backend))));

        tab_a.login_ephemeral("erin").unwrap();
        tab_b.login_durable("dave", "t").unwrap();
        store_a.poll_external();
        assert_eq!(tab_a.current(), AuthState::authenticated("dave", true));
    }

    #[test]
    fn listener_may_transition_without_deadlock() {
        let (_backend, store) = setup();
        let session = Arc::new(SessionState::new(store));
        let (seen, _handle) = recorder(&session);

        let weak = Arc::downgrade(&session);
        let _kick = session.subscribe(move |state| {
            if state.record().is_some_and(|r| !r.persistent) {
                if let Some(session) = weak.upgrade() {
                    session.logout();
                }
            }
        });

        session.login_ephemeral("bob").unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AuthState::authenticated("bob", false),
                AuthState::Unauthenticated
            ]
        );
        assert_eq!(session.current(), AuthState::Unauthenticated);
    }

    #[test]
    fn concurrent_transitions_deliver_final_state_last() {
        let (_backend, store) = setup();
        let session = Arc::new(SessionState::new(store));
        let (seen, _handle) = recorder(&session);

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        if (i + n) % 3 == 0 {
                            session.logout();
                        } else {
                            session.login_ephemeral(&format!("user{i}")).unwrap();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&session.current()));
        assert!(seen.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn display_describes_persistence() {
        assert_eq!(AuthState::Unauthenticated.to_string(), "not logged in");
        assert_eq!(
            AuthState::authenticated("alice", true).to_string(),
            "alice (remembered)"
        );
        assert_eq!(
            AuthState::authenticated("bob", false).to_string(),
            "bob (this session only)"
        );
    }
}
