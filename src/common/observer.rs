//! Single-subscriber event observer
//!
//! Page close, browser disconnect and file change each have exactly one
//! consumer, so an observer holds at most one handler. Subscribing replaces
//! the previous handler; the returned [`Subscription`] removes it again.

use std::sync::{Arc, Mutex, Weak};

use super::sync::lock;

type Repeating<T> = Arc<dyn Fn(T) + Send + Sync>;
type Once<T> = Box<dyn FnOnce(T) + Send>;

enum Handler<T> {
    Repeating(Repeating<T>),
    Once(Once<T>),
}

struct Slot<T> {
    next_id: u64,
    current: Option<(u64, Handler<T>)>,
}

/// An event source with at most one subscriber
pub struct Observer<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: 'static> Default for Observer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observer<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                next_id: 1,
                current: None,
            })),
        }
    }

    /// Install a handler that runs on every emission
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.install(Handler::Repeating(Arc::new(handler)))
    }

    /// Install a handler that runs on the next emission only
    pub fn subscribe_once<F>(&self, handler: F) -> Subscription
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.install(Handler::Once(Box::new(handler)))
    }

    fn install(&self, handler: Handler<T>) -> Subscription {
        let id = {
            let mut slot = lock(&self.slot);
            let id = slot.next_id;
            slot.next_id += 1;
            slot.current = Some((id, handler));
            id
        };

        let weak: Weak<Mutex<Slot<T>>> = Arc::downgrade(&self.slot);
        Subscription::new(move || {
            if let Some(slot) = weak.upgrade() {
                let mut slot = lock(&slot);
                if matches!(slot.current, Some((current, _)) if current == id) {
                    slot.current = None;
                }
            }
        })
    }

    /// Deliver an event to the current handler, if any.
    ///
    /// The handler runs outside the lock so it may subscribe or dispose.
    pub fn emit(&self, value: T) {
        let handler = {
            let mut slot = lock(&self.slot);
            match slot.current.take() {
                Some((id, Handler::Repeating(f))) => {
                    slot.current = Some((id, Handler::Repeating(Arc::clone(&f))));
                    Some(Handler::Repeating(f))
                }
                Some((_, Handler::Once(f))) => Some(Handler::Once(f)),
                None => None,
            }
        };

        match handler {
            Some(Handler::Repeating(f)) => f(value),
            Some(Handler::Once(f)) => f(value),
            None => {}
        }
    }

    pub fn has_subscriber(&self) -> bool {
        lock(&self.slot).current.is_some()
    }
}

/// Disposer for a subscription. Disposing twice is a no-op.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<F: FnOnce() + Send + Sync + 'static>(dispose: F) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A subscription with nothing to undo
    pub fn empty() -> Self {
        Self { dispose: None }
    }

    pub fn dispose(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.dispose.is_none()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
