//! External state source abstraction and an in-memory store.
//!
//! The [`StateSource`] trait is everything the engine needs from the
//! collaborator holding observed data: a synchronous snapshot read and a
//! change subscription. [`Store`] is a single-threaded implementation used by
//! the CLI replay and by tests; handlers mutate it and its listeners fire
//! synchronously.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::debug;

/// Change listener. Fires with no payload; listeners re-read state.
pub type Listener = Rc<dyn Fn()>;

/// Source of the external state the engine reacts to.
pub trait StateSource<S> {
    /// Snapshot of the current state.
    fn state(&self) -> S;

    /// Register `listener` until the returned subscription is dropped or
    /// unsubscribed.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Registration handle returned by [`StateSource::subscribe`].
///
/// Unsubscribes on drop.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new<F>(unsubscribe: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

struct StoreInner<S> {
    state: RefCell<S>,
    listeners: RefCell<Vec<(u64, Listener)>>,
    next_id: Cell<u64>,
}

/// Cloneable handle to shared in-memory state.
pub struct Store<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Clone> Store<S> {
    pub fn new(state: S) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(state),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn get(&self) -> S {
        self.inner.state.borrow().clone()
    }

    /// Replace the state and notify listeners.
    pub fn set(&self, state: S) {
        *self.inner.state.borrow_mut() = state;
        self.notify();
    }

    /// Mutate the state in place and notify listeners.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut S),
    {
        f(&mut self.inner.state.borrow_mut());
        self.notify();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Call every listener registered at the time of the call, in
    /// registration order. No borrow is held while a listener runs.
    pub fn notify(&self) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        debug!(listeners = listeners.len(), "notifying store listeners");
        for listener in listeners {
            listener();
        }
    }
}

impl<S: Clone + 'static> StateSource<S> for Store<S> {
    fn state(&self) -> S {
        self.get()
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.listeners.borrow_mut().push((id, listener));

        let weak: Weak<StoreInner<S>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().retain(|(other, _)| *other != id);
            }
        })
    }
}
