//! Explicit observer lists.
//!
//! A [`Slot`] is a list of listeners that a component publishes to. Every
//! subscription hands back a [`Disposable`]; disposing it removes the
//! listener. Disposal is explicit (dropping a `Disposable` does nothing) and
//! idempotent.
//!
//! Listeners are always invoked after the slot's internal lock is released,
//! so a listener may subscribe, dispose or emit on the same slot.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SlotInner<T> {
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl<T> SlotInner<T> {
    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }
}

/// A publish/subscribe point carrying values of type `T`.
pub struct Slot<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("listeners", &self.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T> Slot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Returns true once [`Slot::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Removes every listener. Subsequent subscriptions are ignored and
    /// subsequent emits are no-ops.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        self.inner.listeners.lock().clear();
    }
}

impl<T: 'static> Slot<T> {
    /// Registers a listener.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Disposable {
        self.push(Arc::new(listener))
    }

    /// Registers a listener that runs at most once.
    pub fn once(&self, listener: impl FnOnce(&T) + Send + 'static) -> Disposable {
        let cell = Mutex::new(Some(listener));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<SlotInner<T>> = Arc::downgrade(&self.inner);
        self.push_with_id(
            id,
            Arc::new(move |value: &T| {
                let taken = cell.lock().take();
                if let Some(f) = taken {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove(id);
                    }
                    f(value);
                }
            }),
        )
    }

    /// Invokes every listener registered at the time of the call.
    pub fn emit(&self, value: &T) {
        if self.is_disposed() {
            return;
        }
        let snapshot: Vec<Listener<T>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    fn push(&self, listener: Listener<T>) -> Disposable {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.push_with_id(id, listener)
    }

    fn push_with_id(&self, id: u64, listener: Listener<T>) -> Disposable {
        if self.is_disposed() {
            return Disposable::noop();
        }
        self.inner.listeners.lock().push((id, listener));
        let weak = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
        })
    }
}

/// Handle to a subscription or any other releasable resource.
///
/// `dispose` runs the release action at most once.
pub struct Disposable {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposable {
    /// Wraps a release action.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// A handle with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Releases the resource. Safe to call more than once.
    pub fn dispose(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Returns true once the release action has run (or if there was none).
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Sink for failures of fire-and-forget work.
///
/// Failures are published to subscribers; while nobody is subscribed they are
/// logged with `tracing` so they are never silently lost. Subscribing is how a
/// caller overrides the default log sink.
pub struct ErrorChannel<E> {
    origin: &'static str,
    slot: Slot<Arc<E>>,
}

impl<E> Clone for ErrorChannel<E> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin,
            slot: self.slot.clone(),
        }
    }
}

impl<E> fmt::Debug for ErrorChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("origin", &self.origin)
            .field("subscribers", &self.slot.listener_count())
            .finish()
    }
}

impl<E: fmt::Display + Send + Sync + 'static> ErrorChannel<E> {
    /// Creates a channel; `origin` names the component in log output.
    #[must_use]
    pub fn new(origin: &'static str) -> Self {
        Self {
            origin,
            slot: Slot::new(),
        }
    }

    /// Registers a subscriber. While at least one subscriber exists the
    /// default log sink is bypassed.
    pub fn subscribe(&self, listener: impl Fn(&Arc<E>) + Send + Sync + 'static) -> Disposable {
        self.slot.subscribe(listener)
    }

    /// Reports a failure.
    pub fn report(&self, error: E) {
        if self.slot.listener_count() == 0 {
            tracing::error!(origin = self.origin, "{error}");
            return;
        }
        self.slot.emit(&Arc::new(error));
    }
}
