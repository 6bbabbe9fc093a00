//! Typed key-value store with a synchronous in-memory mirror.
//!
//! [`PersistentStore`] sits in front of a [`StorageBackend`]. Values are
//! serialized to JSON on write and the decoded value is kept in the mirror,
//! so a read right after a write on the same key never re-deserializes.
//!
//! Nothing here returns an error to the caller:
//!
//! - a value that fails to deserialize reads as the caller's default and is
//!   reported once per key;
//! - a backend that refuses a write flips the store into degraded mode
//!   (reported once), after which writes only update the mirror.
//!
//! Writes made by *other* store instances on the same backend are picked up
//! by [`PersistentStore::poll_external`], which refreshes the mirror and
//! calls the key's subscribers. A store never notifies for its own writes.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::backend::{Change, StorageBackend};
use crate::db::SqliteBackend;
use crate::error::StoreResult;
use crate::memory::MemoryBackend;

/// Callback invoked when another process changes a subscribed key.
pub type StorageCallback = dyn Fn(&StorageEvent) + Send + Sync;

/// An externally-originated change to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// The key that changed.
    pub key: String,
    /// New serialized value, or `None` if the key was removed.
    pub new_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct MirrorEntry {
    raw: Option<String>,
    decoded: Option<Arc<dyn Any + Send + Sync>>,
}

impl MirrorEntry {
    fn raw(raw: Option<String>) -> Self {
        Self { raw, decoded: None }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    next_id: u64,
    // BTreeMap keeps callbacks in registration order.
    callbacks: BTreeMap<u64, (String, Arc<StorageCallback>)>,
}

/// Registration handle returned by [`PersistentStore::subscribe`].
///
/// The callback stays registered until this handle is dropped or
/// [`unsubscribe`](Subscription::unsubscribe) is called.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Unregister the callback now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.callbacks.remove(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Handle to the background task started by
/// [`PersistentStore::spawn_watcher`]. Dropping it stops the task.
#[derive(Debug)]
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Whether the watcher task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Durable key-value store with an in-memory mirror and change
/// notifications for writes made by other processes.
pub struct PersistentStore {
    origin: Uuid,
    backend: Arc<dyn StorageBackend>,
    mirror: DashMap<String, MirrorEntry>,
    registry: Arc<Mutex<Registry>>,
    // Held while a backend mutation and its mirror update happen together,
    // and while a poll applies external changes, so neither can land in
    // the middle of the other.
    apply_lock: Mutex<()>,
    last_seen: AtomicU64,
    degraded: AtomicBool,
    reported_corrupt: Mutex<HashSet<String>>,
}

impl PersistentStore {
    /// Create a store over `backend`.
    ///
    /// Changes already in the backend are treated as history; only writes
    /// made after construction are reported by
    /// [`poll_external`](Self::poll_external).
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let origin = Uuid::now_v7();
        let last_seen = backend.latest_revision().unwrap_or_else(|err| {
            warn!(%err, "could not read backend revision, starting from zero");
            0
        });
        debug!(%origin, last_seen, "persistent store created");

        Self {
            origin,
            backend,
            mirror: DashMap::new(),
            registry: Arc::new(Mutex::new(Registry::default())),
            apply_lock: Mutex::new(()),
            last_seen: AtomicU64::new(last_seen),
            degraded: AtomicBool::new(false),
            reported_corrupt: Mutex::new(HashSet::new()),
        }
    }

    /// Open a store backed by a SQLite file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let backend = SqliteBackend::open(path)?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Create a store over a fresh, private [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Identity recorded with every write this store makes.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Whether a backend failure has switched this store to mirror-only
    /// writes.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Read the value under `key`, or `default` if it is absent or does not
    /// deserialize as `T`.
    #[instrument(skip(self, default))]
    pub fn read<T>(&self, key: &str, default: T) -> T
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let entry = match self.mirror.get(key) {
            Some(entry) => entry.value().clone(),
            None => {
                let raw = self.backend.load(key).unwrap_or_else(|err| {
                    warn!(key, %err, "backend load failed, treating as absent");
                    None
                });
                // A poll may have filled the slot while the backend was
                // read; its value is newer than ours.
                self.mirror
                    .entry(key.to_string())
                    .or_insert_with(|| MirrorEntry::raw(raw))
                    .value()
                    .clone()
            }
        };

        if let Some(value) = entry
            .decoded
            .as_ref()
            .and_then(|decoded| decoded.downcast_ref::<T>())
        {
            return value.clone();
        }

        let Some(raw) = entry.raw else {
            return default;
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                if let Some(mut slot) = self.mirror.get_mut(key) {
                    if slot.raw.as_deref() == Some(raw.as_str()) {
                        slot.decoded = Some(Arc::new(value.clone()));
                    }
                }
                value
            }
            Err(err) => {
                self.report_corrupt(key, &err);
                default
            }
        }
    }

    /// Persist `value` under `key` and update the mirror.
    #[instrument(skip(self, value))]
    pub fn write<T>(&self, key: &str, value: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let raw = match serde_json::to_string(&value) {
            Ok(raw) => raw,
            Err(err) => {
                error!(key, %err, "value could not be serialized, write dropped");
                return;
            }
        };

        let _applying = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_degraded() {
            if let Err(err) = self.backend.save(key, &raw, self.origin) {
                self.enter_degraded(&err);
            }
        }

        self.mirror.insert(
            key.to_string(),
            MirrorEntry {
                raw: Some(raw),
                decoded: Some(Arc::new(value)),
            },
        );
        debug!(key, "value written");
    }

    /// Delete the value under `key`; later reads return the default.
    #[instrument(skip(self))]
    pub fn remove(&self, key: &str) {
        let _applying = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_degraded() {
            if let Err(err) = self.backend.delete(key, self.origin) {
                self.enter_degraded(&err);
            }
        }
        // Keep a tombstone so a degraded store does not fall back to the
        // stale backend value.
        self.mirror.insert(key.to_string(), MirrorEntry::raw(None));
        debug!(key, "value removed");
    }

    /// Register `callback` for changes to `key` made by other processes.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .callbacks
            .insert(id, (key.to_string(), Arc::new(callback)));
        debug!(key, id, "subscriber registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of live subscriptions across all keys.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    /// Pull changes made by other store instances since the last poll,
    /// refresh the mirror and notify subscribers.
    ///
    /// Returns the number of keys whose visible value changed.
    pub fn poll_external(&self) -> usize {
        let events = {
            let _applying = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.apply_external()
        };

        for event in &events {
            debug!(key = %event.key, "external change detected");
            self.notify(event);
        }
        events.len()
    }

    /// Poll for external changes every `every` on the tokio runtime.
    ///
    /// The task only holds a weak reference and exits once the store is
    /// dropped.
    pub fn spawn_watcher(self: &Arc<Self>, every: Duration) -> WatcherHandle {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    debug!("store dropped, watcher exiting");
                    break;
                };
                if let Err(err) = tokio::task::spawn_blocking(move || store.poll_external()).await
                {
                    warn!(%err, "change poll task failed");
                }
            }
        });
        WatcherHandle { task }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Fold pending backend changes into the mirror. Caller holds
    /// `apply_lock`.
    fn apply_external(&self) -> Vec<StorageEvent> {
        let since = self.last_seen.load(Ordering::SeqCst);
        let changes = match self.backend.changes_since(since) {
            Ok(changes) => changes,
            Err(err) => {
                debug!(%err, "change poll failed");
                return Vec::new();
            }
        };

        // Only the newest change per key matters. If that one is ours the
        // mirror already holds it.
        let mut newest = since;
        let mut latest: BTreeMap<String, Change> = BTreeMap::new();
        for change in changes {
            newest = newest.max(change.revision);
            match latest.get(&change.key) {
                Some(seen) if seen.revision >= change.revision => {}
                _ => {
                    latest.insert(change.key.clone(), change);
                }
            }
        }
        let mut ordered: Vec<Change> = latest.into_values().collect();
        ordered.sort_by_key(|c| c.revision);

        let mut events = Vec::new();
        for change in ordered {
            if change.origin == self.origin {
                continue;
            }

            let unchanged = self
                .mirror
                .get(&change.key)
                .is_some_and(|entry| entry.raw == change.value);
            if unchanged {
                continue;
            }

            self.mirror
                .insert(change.key.clone(), MirrorEntry::raw(change.value.clone()));
            self.reported_corrupt
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&change.key);
            events.push(StorageEvent {
                key: change.key,
                new_value: change.value,
            });
        }
        self.last_seen.fetch_max(newest, Ordering::SeqCst);
        events
    }

    fn notify(&self, event: &StorageEvent) {
        // Clone callbacks out so they run without the registry lock held.
        let callbacks: Vec<Arc<StorageCallback>> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .callbacks
                .values()
                .filter(|(key, _)| *key == event.key)
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    fn enter_degraded(&self, err: &crate::error::StoreError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                %err,
                "durable storage unavailable, changes will not survive restart"
            );
        }
    }

    fn report_corrupt(&self, key: &str, err: &serde_json::Error) {
        let first = self
            .reported_corrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        if first {
            warn!(key, %err, "stored value does not deserialize, using default");
        }
    }
}

impl fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("origin", &self.origin)
            .field("mirrored_keys", &self.mirror.len())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    use tracing::Level;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Backend that parks the first `load` or `save` of one key until the
    /// test releases it.
    struct Gated {
        inner: MemoryBackend,
        key: &'static str,
        on_save: bool,
        armed: AtomicBool,
        reached: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Gated {
        fn new(
            inner: MemoryBackend,
            key: &'static str,
            on_save: bool,
        ) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (reached_tx, reached_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let gated = Self {
                inner,
                key,
                on_save,
                armed: AtomicBool::new(true),
                reached: Mutex::new(reached_tx),
                release: Mutex::new(release_rx),
            };
            (gated, reached_rx, release_tx)
        }

        fn park(&self, key: &str, is_save: bool) {
            if key == self.key
                && is_save == self.on_save
                && self.armed.swap(false, Ordering::SeqCst)
            {
                self.reached.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
        }
    }

    impl StorageBackend for Gated {
        fn load(&self, key: &str) -> StoreResult<Option<String>> {
            let value = self.inner.load(key);
            self.park(key, false);
            value
        }

        fn save(&self, key: &str, value: &str, origin: Uuid) -> StoreResult<()> {
            let saved = self.inner.save(key, value, origin);
            self.park(key, true);
            saved
        }

        fn delete(&self, key: &str, origin: Uuid) -> StoreResult<()> {
            self.inner.delete(key, origin)
        }

        fn changes_since(&self, revision: u64) -> StoreResult<Vec<Change>> {
            self.inner.changes_since(revision)
        }

        fn latest_revision(&self) -> StoreResult<u64> {
            self.inner.latest_revision()
        }
    }

    /// Counts WARN events seen by the subscriber it is installed in.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber =
            tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));
        tracing::subscriber::with_default(subscriber, f);
        warnings.load(Ordering::SeqCst)
    }

    fn shared_pair() -> (MemoryBackend, PersistentStore, PersistentStore) {
        let backend = MemoryBackend::new();
        let a = PersistentStore::new(Arc::new(backend.clone()));
        let b = PersistentStore::new(Arc::new(backend.clone()));
        (backend, a, b)
    }

    #[test]
    fn read_absent_returns_default() {
        let store = PersistentStore::in_memory();
        assert_eq!(store.read("missing", 7_u32), 7);
    }

    #[test]
    fn write_then_read() {
        let store = PersistentStore::in_memory();
        store.write("numbers", vec![1, 2, 3]);
        assert_eq!(store.read("numbers", Vec::<i32>::new()), vec![1, 2, 3]);
    }

    #[test]
    fn write_reaches_backend() {
        let backend = MemoryBackend::new();
        let store = PersistentStore::new(Arc::new(backend.clone()));
        store.write("username", "alice".to_string());
        assert_eq!(backend.load("username").unwrap().as_deref(), Some("\"alice\""));
    }

    #[test]
    fn read_with_other_type_falls_back_to_json() {
        let store = PersistentStore::in_memory();
        store.write("n", 5_u8);
        assert_eq!(store.read("n", 0_u64), 5);
    }

    #[test]
    fn remove_then_read_returns_default() {
        let store = PersistentStore::in_memory();
        store.write("k", "v".to_string());
        store.remove("k");
        assert_eq!(store.read("k", String::from("none")), "none");
        store.remove("k");
    }

    #[test]
    fn corrupt_value_reads_as_default() {
        let backend = MemoryBackend::new();
        backend.insert_raw("entries", "{not json").unwrap();
        let store = PersistentStore::new(Arc::new(backend));

        assert_eq!(store.read("entries", Vec::<String>::new()), Vec::<String>::new());
        // Second read hits the mirror and still yields the default.
        assert_eq!(store.read("entries", vec!["d".to_string()]), vec!["d".to_string()]);
    }

    #[test]
    fn unavailable_backend_degrades_to_mirror() {
        let backend = MemoryBackend::new();
        backend.set_read_only(true);
        let store = PersistentStore::new(Arc::new(backend.clone()));

        store.write("k", 1_i32);
        assert!(store.is_degraded());
        assert_eq!(store.read("k", 0), 1);
        assert!(backend.load("k").unwrap().is_none());

        // Degraded mode sticks even once the backend recovers.
        backend.set_read_only(false);
        store.write("k", 2_i32);
        assert_eq!(store.read("k", 0), 2);
        assert!(backend.load("k").unwrap().is_none());
    }

    #[test]
    fn degradation_is_reported_once() {
        let backend = MemoryBackend::new();
        backend.set_read_only(true);
        let store = PersistentStore::new(Arc::new(backend));

        let warnings = count_warnings(|| {
            store.write("a", 1_i32);
            store.write("b", 2_i32);
            store.remove("a");
            store.write("a", 3_i32);
        });
        assert_eq!(warnings, 1);
    }

    #[test]
    fn corrupt_value_is_reported_once_per_key() {
        let backend = MemoryBackend::new();
        backend.insert_raw("x", "{oops").unwrap();
        backend.insert_raw("y", "[1,").unwrap();
        let store = PersistentStore::new(Arc::new(backend));

        let warnings = count_warnings(|| {
            for _ in 0..3 {
                store.read("x", 0_i32);
                store.read("y", 0_i32);
            }
        });
        assert_eq!(warnings, 2);
    }

    #[test]
    fn poll_during_cold_read_is_not_overwritten() {
        let backend = MemoryBackend::new();
        let writer = PersistentStore::new(Arc::new(backend.clone()));
        writer.write("k", 1_i32);

        let (gated, reached, release) = Gated::new(backend, "k", false);
        let reader = Arc::new(PersistentStore::new(Arc::new(gated)));

        let cold = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read("k", 0_i32))
        };
        reached.recv().unwrap();

        // The cold read already loaded 1; a newer value arrives meanwhile.
        writer.write("k", 2_i32);
        assert_eq!(reader.poll_external(), 1);
        release.send(()).unwrap();

        assert_eq!(cold.join().unwrap(), 2);
        assert_eq!(reader.read("k", 0_i32), 2);
    }

    #[test]
    fn poll_during_write_is_applied_after_it() {
        let backend = MemoryBackend::new();
        let (gated, reached, release) = Gated::new(backend.clone(), "k", true);
        let local = Arc::new(PersistentStore::new(Arc::new(gated)));
        let remote = PersistentStore::new(Arc::new(backend));

        let write = {
            let local = Arc::clone(&local);
            thread::spawn(move || local.write("k", 1_i32))
        };
        reached.recv().unwrap();

        // Saved 1 but not yet mirrored; the remote write lands after it.
        remote.write("k", 2_i32);
        let poll = {
            let local = Arc::clone(&local);
            thread::spawn(move || local.poll_external())
        };
        thread::sleep(Duration::from_millis(20));
        release.send(()).unwrap();

        write.join().unwrap();
        poll.join().unwrap();
        local.poll_external();
        assert_eq!(local.read("k", 0_i32), 2);
    }

    #[test]
    fn older_external_change_does_not_shadow_own_newer_write() {
        let (_backend, a, b) = shared_pair();
        b.write("k", 1_i32);
        a.write("k", 2_i32);
        a.poll_external();
        assert_eq!(a.read("k", 0_i32), 2);
    }

    #[test]
    fn degraded_remove_hides_backend_value() {
        let backend = MemoryBackend::new();
        backend.insert_raw("k", "1").unwrap();
        backend.set_read_only(true);
        let store = PersistentStore::new(Arc::new(backend));

        store.remove("k");
        assert!(store.is_degraded());
        assert_eq!(store.read("k", 0_i32), 0);
    }

    #[test]
    fn own_writes_do_not_notify() {
        let store = PersistentStore::in_memory();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = store.subscribe("k", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.write("k", 1_i32);
        store.remove("k");
        assert_eq!(store.poll_external(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn external_write_refreshes_mirror_and_notifies() {
        let (_backend, a, b) = shared_pair();
        assert_eq!(a.read("k", 0_i32), 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = a.subscribe("k", move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        b.write("k", 42_i32);
        assert_eq!(a.poll_external(), 1);
        assert_eq!(a.read("k", 0_i32), 42);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![StorageEvent {
                key: "k".into(),
                new_value: Some("42".into()),
            }]
        );
    }

    #[test]
    fn external_remove_notifies_with_none() {
        let (_backend, a, b) = shared_pair();
        b.write("k", 1_i32);
        a.poll_external();

        let removed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&removed);
        let _sub = a.subscribe("k", move |event| {
            flag.store(event.new_value.is_none(), Ordering::SeqCst);
        });

        b.remove("k");
        assert_eq!(a.poll_external(), 1);
        assert!(removed.load(Ordering::SeqCst));
        assert_eq!(a.read("k", 9_i32), 9);
    }

    #[test]
    fn subscribers_only_see_their_key() {
        let (_backend, a, b) = shared_pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = a.subscribe("watched", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        b.write("other", 1_i32);
        a.poll_external();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let (_backend, a, b) = shared_pair();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                a.subscribe("k", move |_| order.lock().unwrap().push(i))
            })
            .collect();

        b.write("k", true);
        a.poll_external();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let (_backend, a, b) = shared_pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = a.subscribe("k", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(a.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(a.subscriber_count(), 0);

        b.write("k", 1_i32);
        a.poll_external();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn identical_external_value_is_not_a_change() {
        let (_backend, a, b) = shared_pair();
        a.write("k", 1_i32);
        b.write("k", 1_i32);
        assert_eq!(a.poll_external(), 0);
    }

    #[test]
    fn callback_may_read_store() {
        let (_backend, a, b) = shared_pair();
        let a = Arc::new(a);
        let seen = Arc::new(AtomicUsize::new(0));
        let weak = Arc::downgrade(&a);
        let sink = Arc::clone(&seen);
        let _sub = a.subscribe("k", move |_| {
            if let Some(store) = weak.upgrade() {
                sink.store(store.read("k", 0_usize), Ordering::SeqCst);
            }
        });

        b.write("k", 5_usize);
        a.poll_external();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn history_before_construction_is_not_replayed() {
        let backend = MemoryBackend::new();
        backend.insert_raw("k", "1").unwrap();
        let store = PersistentStore::new(Arc::new(backend));
        assert_eq!(store.poll_external(), 0);
        assert_eq!(store.read("k", 0_i32), 1);
    }

    #[tokio::test]
    async fn watcher_polls_in_background() {
        let backend = MemoryBackend::new();
        let a = Arc::new(PersistentStore::new(Arc::new(backend.clone())));
        let b = PersistentStore::new(Arc::new(backend));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = a.subscribe("k", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _watcher = a.spawn_watcher(Duration::from_millis(10));

        b.write("k", 1_i32);
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watcher_exits_when_store_dropped() {
        let store = Arc::new(PersistentStore::in_memory());
        let watcher = store.spawn_watcher(Duration::from_millis(5));
        drop(store);

        for _ in 0..100 {
            if watcher.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(watcher.is_finished());
    }
}
