//! Single-threaded observer registry used for mode and view broadcasts.
//!
//! Callbacks are stored behind `Rc` and notified in registration order. A
//! notification pass works on a snapshot of the registry, so a callback may
//! subscribe, unsubscribe, or trigger another notification without tripping a
//! `RefCell` borrow. A callback removed mid-pass is skipped for the rest of it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type Callback<T> = Rc<dyn Fn(&T)>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

impl<T> Registry<T> {
    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }
}

/// Ordered list of callbacks interested in values of type `T`.
pub struct Listeners<T: 'static> {
    registry: Rc<RefCell<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register `callback`; it stays registered until the returned guard is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut registry = self.registry.borrow_mut();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Rc::new(callback)));
            id
        };
        let weak: Weak<RefCell<Registry<T>>> = Rc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry
                    .borrow_mut()
                    .entries
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every registered callback.
    pub fn notify(&self, value: &T) {
        self.notify_while(value, || true);
    }

    /// Deliver `value` in order, stopping as soon as `keep_going` returns false.
    ///
    /// Used when a callback may publish a newer value re-entrantly: the outer
    /// pass must not hand the older value to anyone after that point.
    pub fn notify_while(&self, value: &T, keep_going: impl Fn() -> bool) {
        let snapshot: Vec<(u64, Callback<T>)> = self.registry.borrow().entries.clone();
        for (id, callback) in snapshot {
            if !keep_going() {
                break;
            }
            if !self.registry.borrow().contains(id) {
                continue;
            }
            callback(value);
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

/// RAII guard for a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the callback now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn notifies_in_registration_order() {
        let listeners = Listeners::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let a = {
            let seen = Rc::clone(&seen);
            listeners.subscribe(move |v| seen.borrow_mut().push(("a", *v)))
        };
        let b = {
            let seen = Rc::clone(&seen);
            listeners.subscribe(move |v| seen.borrow_mut().push(("b", *v)))
        };
        listeners.notify(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
        drop((a, b));
        assert!(listeners.is_empty());
    }

    #[test]
    fn unsubscribe_during_notification_skips_removed_callback() {
        let listeners = Listeners::<()>::new();
        let second_calls = Rc::new(Cell::new(0));
        let second_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let _first = {
            let slot = Rc::clone(&second_slot);
            listeners.subscribe(move |_| {
                if let Some(sub) = slot.borrow_mut().take() {
                    sub.unsubscribe();
                }
            })
        };
        let second = {
            let calls = Rc::clone(&second_calls);
            listeners.subscribe(move |_| calls.set(calls.get() + 1))
        };
        *second_slot.borrow_mut() = Some(second);

        listeners.notify(&());
        assert_eq!(second_calls.get(), 0);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn notify_while_stops_when_condition_flips() {
        let listeners = Listeners::<u8>::new();
        let stop = Rc::new(Cell::new(false));
        let calls = Rc::new(Cell::new(0));
        let _subs: Vec<Subscription> = (0..3)
            .map(|_| {
                let stop = Rc::clone(&stop);
                let calls = Rc::clone(&calls);
                listeners.subscribe(move |_| {
                    calls.set(calls.get() + 1);
                    stop.set(true);
                })
            })
            .collect();
        listeners.notify_while(&1, || !stop.get());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn guard_outliving_registry_is_harmless() {
        let listeners = Listeners::<u8>::new();
        let sub = listeners.subscribe(|_| {});
        drop(listeners);
        sub.unsubscribe();
    }
}
