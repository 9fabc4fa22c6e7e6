//! Observable cells
//!
//! A cell is a mutable container for a value that notifies listeners when the
//! value changes. The engine only needs the capability described by
//! [`ObservableValue`]; [`Property`] is the concrete single-threaded cell used
//! by controls and tests.
//!
//! # Invariants
//!
//! 1. Listeners are notified synchronously, in registration order, with the
//!    `(old, new)` pair.
//! 2. Writing a value equal to the current one (per [`Syncable::same_value`])
//!    is a no-op: no notification.
//! 3. A listener whose [`Subscription`] is dropped during a notification
//!    round is not called for the rest of that round.
//! 4. While the registry reports the cell as bound, [`Property::set`] is
//!    rejected unless the registry is inside an ignore-binding scope for it.
//!    Listeners run with that scope sealed, so a listener on a bound cell
//!    cannot write it even while a binding is writing it.

use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BindingError, Result};
use crate::kind::Syncable;
use crate::registry::{BindingRegistry, RegistryInner};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn next() -> Self {
        CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Rebuild an id from [`CellId::to_raw`]
    pub fn from_raw(raw: u64) -> Self {
        CellId(raw)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Anything that identifies a cell
pub trait AsCellId {
    fn cell_id(&self) -> CellId;
}

impl AsCellId for CellId {
    fn cell_id(&self) -> CellId {
        *self
    }
}

impl<C: AsCellId + ?Sized> AsCellId for Rc<C> {
    fn cell_id(&self) -> CellId {
        (**self).cell_id()
    }
}

/// Change listener: receives `(old, new)`, may fail
pub type Listener<T> = Rc<dyn Fn(&T, &T) -> Result<()>>;

/// The capability the engine needs from a cell
pub trait ObservableValue<T>: AsCellId + 'static {
    /// Current value
    fn value(&self) -> T;

    /// Register a listener, removed when the returned subscription drops
    fn add_listener(&self, listener: Listener<T>) -> Subscription;

    /// Whether the engine may write into this cell
    fn is_writable(&self) -> bool;

    /// Write on behalf of a binding, bypassing the bound-value check
    fn write_from_binding(&self, value: T) -> Result<()>;
}

/// Type-erased change notification, used for invalidating cells
pub trait AnyObservable: AsCellId + 'static {
    fn watch(&self, on_change: Rc<dyn Fn() -> Result<()>>) -> Subscription;
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// RAII guard for a registered listener
///
/// Dropping the subscription removes the listener.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    active: Rc<Cell<bool>>,
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(active: Rc<Cell<bool>>, detach: impl FnOnce() + 'static) -> Self {
        Self {
            active,
            detach: Some(Box::new(detach)),
        }
    }

    /// Whether the listener is still registered
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Remove the listener now
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.set(false);
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.active.get())
            .finish()
    }
}

// =============================================================================
// PROPERTY
// =============================================================================

struct ListenerEntry<T> {
    id: u64,
    active: Rc<Cell<bool>>,
    callback: Listener<T>,
}

impl<T> Clone for ListenerEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Rc::clone(&self.active),
            callback: Rc::clone(&self.callback),
        }
    }
}

struct PropertyInner<T> {
    id: CellId,
    name: Option<String>,
    value: RefCell<T>,
    listeners: RefCell<SmallVec<[ListenerEntry<T>; 4]>>,
    next_listener: Cell<u64>,
    registry: Weak<RegistryInner>,
}

/// A writable observable cell
///
/// Cloning a `Property` creates a new handle to the same cell.
pub struct Property<T> {
    inner: Rc<PropertyInner<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Syncable> Property<T> {
    /// Create a cell that consults `registry` before direct writes
    pub fn new(registry: &BindingRegistry, initial: T) -> Self {
        Self::build(registry, None, initial)
    }

    /// Create a named cell (the name shows up in logs and `Debug`)
    pub fn named(registry: &BindingRegistry, name: impl Into<String>, initial: T) -> Self {
        Self::build(registry, Some(name.into()), initial)
    }

    fn build(registry: &BindingRegistry, name: Option<String>, initial: T) -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                id: CellId::next(),
                name,
                value: RefCell::new(initial),
                listeners: RefCell::new(SmallVec::new()),
                next_listener: Cell::new(0),
                registry: registry.downgrade(),
            }),
        }
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Current value
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Set a new value, notifying listeners if it changed
    ///
    /// Fails with [`BindingError::BoundValue`] while a binding drives this
    /// cell. Errors raised by listeners (e.g. a failed mapping further down a
    /// binding) are returned here.
    pub fn set(&self, value: T) -> Result<()> {
        if let Some(registry) = self.inner.registry.upgrade() {
            if registry.is_bound(self.inner.id) && !registry.is_ignore_binding(self.inner.id) {
                return Err(BindingError::BoundValue(self.inner.id));
            }
        }
        self.replace(value)
    }

    /// Set the value computed from the current one
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = self.with(f);
        self.set(next)
    }

    /// Whether a unidirectional binding currently drives this cell
    pub fn is_bound(&self) -> bool {
        self.inner
            .registry
            .upgrade()
            .is_some_and(|registry| registry.is_bound(self.inner.id))
    }

    /// Subscribe with an infallible callback
    pub fn subscribe(&self, callback: impl Fn(&T, &T) + 'static) -> Subscription {
        self.add_listener(Rc::new(move |old: &T, new: &T| {
            callback(old, new);
            Ok(())
        }))
    }

    /// Subscribe with a fallible listener
    pub fn add_listener(&self, listener: Listener<T>) -> Subscription {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);

        let active = Rc::new(Cell::new(true));
        self.inner.listeners.borrow_mut().push(ListenerEntry {
            id,
            active: Rc::clone(&active),
            callback: listener,
        });

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(active, move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().retain(|entry| entry.id != id);
            }
        })
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// A non-writable view of this cell
    pub fn read_only(&self) -> ReadOnlyProperty<T> {
        ReadOnlyProperty {
            property: self.clone(),
        }
    }

    /// Store `value`, returning the previous one if it changed
    fn swap(&self, value: T) -> Option<T> {
        let mut current = self.inner.value.borrow_mut();
        if current.same_value(&value) {
            return None;
        }
        Some(std::mem::replace(&mut *current, value))
    }

    fn replace(&self, value: T) -> Result<()> {
        let Some(old) = self.swap(value) else {
            return Ok(());
        };
        let new = self.get();
        match self.inner.registry.upgrade() {
            Some(registry) => registry.sealed(self.inner.id, || self.notify(&old, &new)),
            None => self.notify(&old, &new),
        }
    }

    fn notify(&self, old: &T, new: &T) -> Result<()> {
        let snapshot: SmallVec<[ListenerEntry<T>; 4]> = self.inner.listeners.borrow().clone();
        for entry in snapshot {
            if entry.active.get() {
                (entry.callback)(old, new)?;
            }
        }
        Ok(())
    }
}

impl<T> AsCellId for Property<T> {
    fn cell_id(&self) -> CellId {
        self.inner.id
    }
}

impl<T: Syncable> ObservableValue<T> for Property<T> {
    fn value(&self) -> T {
        self.get()
    }

    fn add_listener(&self, listener: Listener<T>) -> Subscription {
        Property::add_listener(self, listener)
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn write_from_binding(&self, value: T) -> Result<()> {
        self.replace(value)
    }
}

impl<T: Syncable> AnyObservable for Property<T> {
    fn watch(&self, on_change: Rc<dyn Fn() -> Result<()>>) -> Subscription {
        self.add_listener(Rc::new(move |_: &T, _: &T| on_change()))
    }
}

impl<T: fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.borrow())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

// =============================================================================
// READ-ONLY PROPERTY
// =============================================================================

/// Read-only view of a [`Property`]
///
/// Observable like the property it wraps, but bindings cannot write into it.
pub struct ReadOnlyProperty<T> {
    property: Property<T>,
}

impl<T> Clone for ReadOnlyProperty<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
        }
    }
}

impl<T: Syncable> ReadOnlyProperty<T> {
    pub fn get(&self) -> T {
        self.property.get()
    }

    pub fn subscribe(&self, callback: impl Fn(&T, &T) + 'static) -> Subscription {
        self.property.subscribe(callback)
    }
}

impl<T> AsCellId for ReadOnlyProperty<T> {
    fn cell_id(&self) -> CellId {
        self.property.cell_id()
    }
}

impl<T: Syncable> ObservableValue<T> for ReadOnlyProperty<T> {
    fn value(&self) -> T {
        self.property.get()
    }

    fn add_listener(&self, listener: Listener<T>) -> Subscription {
        self.property.add_listener(listener)
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn write_from_binding(&self, _value: T) -> Result<()> {
        Err(BindingError::Unsupported(format!(
            "{} is read-only",
            self.property.cell_id()
        )))
    }
}

impl<T: Syncable> AnyObservable for ReadOnlyProperty<T> {
    fn watch(&self, on_change: Rc<dyn Fn() -> Result<()>>) -> Subscription {
        self.property.watch(on_change)
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnlyProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnlyProperty")
            .field(&self.property)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_get_set() {
        let registry = BindingRegistry::new();
        let count = registry.property(0i32);
        assert_eq!(count.get(), 0);

        count.set(42).unwrap();
        assert_eq!(count.get(), 42);

        count.update(|v| v + 1).unwrap();
        assert_eq!(count.get(), 43);
    }

    #[test]
    fn test_listeners_receive_old_and_new() {
        let registry = BindingRegistry::new();
        let count = registry.property(1i32);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = Rc::clone(&seen);
        let _sub = count.subscribe(move |old, new| seen_clone.borrow_mut().push((*old, *new)));

        count.set(2).unwrap();
        count.set(5).unwrap();
        assert_eq!(*seen.borrow(), vec![(1, 2), (2, 5)]);
    }

    #[test]
    fn test_equal_write_is_noop() {
        let registry = BindingRegistry::new();
        let name = registry.property(String::from("a"));
        let hits = Rc::new(Cell::new(0));

        let hits_clone = Rc::clone(&hits);
        let _sub = name.subscribe(move |_, _| hits_clone.set(hits_clone.get() + 1));

        name.set("a".into()).unwrap();
        assert_eq!(hits.get(), 0);
        name.set("b".into()).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_drop_subscription_removes_listener() {
        let registry = BindingRegistry::new();
        let count = registry.property(0u32);
        let hits = Rc::new(Cell::new(0));

        let hits_clone = Rc::clone(&hits);
        let sub = count.subscribe(move |_, _| hits_clone.set(hits_clone.get() + 1));
        assert_eq!(count.listener_count(), 1);

        count.set(1).unwrap();
        drop(sub);
        assert_eq!(count.listener_count(), 0);

        count.set(2).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_unsubscribe_during_notification() {
        let registry = BindingRegistry::new();
        let count = registry.property(0i32);
        let second_hits = Rc::new(Cell::new(0));
        let second: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let second_slot = Rc::clone(&second);
        let _first = count.subscribe(move |_, _| {
            second_slot.borrow_mut().take();
        });
        let hits = Rc::clone(&second_hits);
        *second.borrow_mut() = Some(count.subscribe(move |_, _| hits.set(hits.get() + 1)));

        count.set(1).unwrap();
        assert_eq!(second_hits.get(), 0);
        assert_eq!(count.listener_count(), 1);
    }

    #[test]
    fn test_listener_error_propagates_to_writer() {
        let registry = BindingRegistry::new();
        let count = registry.property(0i32);
        let _sub = count.add_listener(Rc::new(|_: &i32, new: &i32| {
            if *new < 0 {
                Err(BindingError::Mapping("negative".into()))
            } else {
                Ok(())
            }
        }));

        assert!(count.set(3).is_ok());
        assert_eq!(
            count.set(-1),
            Err(BindingError::Mapping("negative".into()))
        );
    }

    #[test]
    fn test_read_only_view_rejects_binding_writes() {
        let registry = BindingRegistry::new();
        let width = registry.property(10.0f64);
        let view = width.read_only();

        assert!(!view.is_writable());
        assert_eq!(view.cell_id(), width.cell_id());
        assert!(matches!(
            view.write_from_binding(3.0),
            Err(BindingError::Unsupported(_))
        ));

        width.set(20.0).unwrap();
        assert_eq!(view.get(), 20.0);
    }

    #[test]
    fn test_cell_ids_are_unique() {
        let registry = BindingRegistry::new();
        let a = registry.property(0);
        let b = registry.property(0);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
