// src/system/listener.rs

//! Callback registries for native event sources (theme changes, notifier clicks).
//!
//! Each registration returns a [`Subscription`]. Disposing it removes the callback
//! and runs the native-side release exactly once. Delivery and removal are
//! serialized: once [`Subscription::dispose`] returns, the callback is not running
//! and will never run again.
//!
//! Callbacks run while delivery holds the registry. A callback must not call
//! `dispose`, `add_listener` or `add_listener_with_release` on its own registry;
//! each would wait for the delivery it is part of and deadlock. Registration from
//! other threads waits until the current delivery finishes.

use log::{debug, trace};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;
type NativeRelease = Box<dyn FnOnce() + Send>;

struct Entry<E> {
    id: u64,
    callback: Callback<E>,
}

struct Registry<E> {
    name: &'static str,
    entries: RwLock<Vec<Entry<E>>>,
    next_id: AtomicU64,
}

impl<E> Registry<E> {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry<E>>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry<E>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Type-erased removal, so a [`Subscription`] does not carry the event type.
trait Unregister: Send + Sync {
    fn unregister(&self, id: u64) -> bool;
}

impl<E> Unregister for Registry<E> {
    fn unregister(&self, id: u64) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            trace!("Removed listener {} from '{}'", id, self.name);
        }
        removed
    }
}

/// Listeners for one kind of native event `E`.
pub struct ListenerRegistry<E> {
    inner: Arc<Registry<E>>,
}

impl<E: 'static> ListenerRegistry<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Registry {
                name,
                entries: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), None)
    }

    /// Like [`ListenerRegistry::add_listener`], with a hook that undoes the native
    /// registration. The hook runs exactly once, after the callback is removed.
    pub fn add_listener_with_release<F, R>(&self, callback: F, native_release: R) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
        R: FnOnce() + Send + 'static,
    {
        self.register(Arc::new(callback), Some(Box::new(native_release)))
    }

    fn register(&self, callback: Callback<E>, native_release: Option<NativeRelease>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.write().push(Entry { id, callback });
        debug!("Registered listener {} on '{}'", id, self.inner.name);

        let registry: Arc<dyn Unregister> = self.inner.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&registry),
            native_release: Mutex::new(native_release),
            disposed: AtomicBool::new(false),
        }
    }

    /// Delivers `event` to every live listener, in registration order. Returns how
    /// many were called. Callbacks must not register or dispose on this registry.
    pub fn dispatch(&self, event: &E) -> usize {
        let entries = self.inner.read();
        for entry in entries.iter() {
            (entry.callback)(event);
        }
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("name", &self.inner.name)
            .field("listeners", &self.inner.read().len())
            .finish()
    }
}

/// A live registration. Disposal is idempotent; dropping disposes as a backstop.
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unregister>,
    native_release: Mutex<Option<NativeRelease>>,
    disposed: AtomicBool,
}

impl Subscription {
    /// Stops delivery and releases the native registration. Blocks while a delivery
    /// to this registry is in flight.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        // Every caller goes through the registry lock, so none returns while the
        // callback may still be running.
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }

        let release = self
            .native_release
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
