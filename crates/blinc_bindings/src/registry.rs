//! Binding registry
//!
//! The registry is the single authority over active bindings. It tracks every
//! [`Binding`] and [`BidirectionalBinding`] by the identity of its target,
//! enforces at most one active unidirectional binding per target, and is the
//! only place bindings are torn down in bulk.
//!
//! A registry is an explicit instance, typically owned by the application's
//! root context and handed to the controls that create cells. Tests create
//! their own isolated registries.
//!
//! # Example
//!
//! ```
//! use blinc_bindings::{BindingRegistry, Source};
//!
//! let registry = BindingRegistry::new();
//! let source = registry.property(1i32);
//! let target = registry.property(0i32);
//!
//! let binding = registry.bind(&target).source(Source::of(source.clone())).get().unwrap();
//!
//! // Lazy: nothing is copied until the source changes
//! assert_eq!(target.get(), 0);
//! source.set(5).unwrap();
//! assert_eq!(target.get(), 5);
//!
//! // Bound targets reject direct writes
//! assert!(target.set(3).is_err());
//!
//! binding.unbind();
//! assert!(target.set(3).is_ok());
//! ```
//!
//! [`Binding`]: crate::Binding
//! [`BidirectionalBinding`]: crate::BidirectionalBinding

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::bidirectional::{BidirectionalBuilder, BidirectionalInner};
use crate::binding::{BindingBuilder, BindingState};
use crate::cell::{AsCellId, CellId, ObservableValue, Property};
use crate::config::RegistryConfig;
use crate::error::{BindingError, Result};
use crate::kind::Syncable;

/// Lifecycle surface shared by both binding flavours, type-erased
pub(crate) trait ManagedBinding {
    fn target_id(&self) -> CellId;
    fn state(&self) -> BindingState;
    fn unbind(&self);
    fn dispose(&self);
    /// Whether `cell` is the target or one of the sources
    fn involves(&self, cell: CellId) -> bool;
    fn remove_participant(&self, _cell: CellId) -> bool {
        false
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

fn entry_ptr(binding: &Rc<dyn ManagedBinding>) -> *const () {
    Rc::as_ptr(binding) as *const ()
}

type BindingMap = RefCell<FxHashMap<CellId, Rc<dyn ManagedBinding>>>;

/// One entry of the ignore-binding stack
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    /// A binding is writing the cell; direct writes are let through
    Open(CellId),
    /// The cell is notifying its listeners; direct writes are checked again
    Sealed(CellId),
}

impl Scope {
    fn cell(self) -> CellId {
        match self {
            Scope::Open(id) | Scope::Sealed(id) => id,
        }
    }
}

pub(crate) struct RegistryInner {
    bindings: BindingMap,
    bidirectional: BindingMap,
    /// Scopes currently open, innermost last
    ignored: RefCell<SmallVec<[Scope; 8]>>,
    config: RegistryConfig,
}

/// Pops one scope entry on drop
struct ScopeGuard<'a> {
    stack: &'a RefCell<SmallVec<[Scope; 8]>>,
    scope: Scope,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let mut stack = self.stack.borrow_mut();
        if let Some(pos) = stack.iter().rposition(|scope| *scope == self.scope) {
            stack.remove(pos);
        }
    }
}

impl RegistryInner {
    pub(crate) fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub(crate) fn is_bound(&self, id: CellId) -> bool {
        self.bindings
            .borrow()
            .get(&id)
            .is_some_and(|binding| binding.state() == BindingState::Bound)
    }

    /// Whether the innermost scope for `id` is open
    pub(crate) fn is_ignore_binding(&self, id: CellId) -> bool {
        self.ignored
            .borrow()
            .iter()
            .rev()
            .find(|scope| scope.cell() == id)
            .is_some_and(|scope| matches!(scope, Scope::Open(_)))
    }

    /// Whether `id` is being written or notified by a propagation
    pub(crate) fn is_propagating(&self, id: CellId) -> bool {
        self.ignored.borrow().iter().any(|scope| scope.cell() == id)
    }

    /// Run `f` with bound-value checks lifted for `id`
    pub(crate) fn ignoring<R>(&self, id: CellId, f: impl FnOnce() -> R) -> R {
        self.scoped(Scope::Open(id), f)
    }

    /// Run `f` with bound-value checks restored for `id`
    ///
    /// Wraps listener notification, so listeners of a cell never inherit the
    /// window a binding opened to write it.
    pub(crate) fn sealed<R>(&self, id: CellId, f: impl FnOnce() -> R) -> R {
        self.scoped(Scope::Sealed(id), f)
    }

    fn scoped<R>(&self, scope: Scope, f: impl FnOnce() -> R) -> R {
        self.ignored.borrow_mut().push(scope);
        let _guard = ScopeGuard {
            stack: &self.ignored,
            scope,
        };
        f()
    }

    /// Register `binding` for `id`, disposing whatever was there before
    ///
    /// The old entry is taken out of the map and disposed before the new one
    /// goes in, so no listener of the old binding survives the override.
    pub(crate) fn install_binding(&self, id: CellId, binding: Rc<dyn ManagedBinding>) -> Result<()> {
        Self::install(&self.bindings, self.is_propagating(id), id, binding)
    }

    pub(crate) fn install_bidirectional(
        &self,
        id: CellId,
        binding: Rc<dyn ManagedBinding>,
    ) -> Result<()> {
        Self::install(&self.bidirectional, self.is_propagating(id), id, binding)
    }

    fn install(
        map: &BindingMap,
        propagating: bool,
        id: CellId,
        binding: Rc<dyn ManagedBinding>,
    ) -> Result<()> {
        if propagating {
            return Err(BindingError::IllegalArgument(format!(
                "{id} is being written by a propagation and cannot be bound now"
            )));
        }

        let previous = map.borrow_mut().remove(&id);
        if let Some(previous) = previous {
            if entry_ptr(&previous) != entry_ptr(&binding) {
                tracing::debug!(target = %id, "overriding existing binding");
                previous.dispose();
            }
        }
        map.borrow_mut().insert(id, binding);
        Ok(())
    }

    /// Remove the entry for `id` if it is the binding at `ptr`
    pub(crate) fn remove_binding(&self, id: CellId, ptr: *const ()) {
        Self::remove(&self.bindings, id, ptr);
    }

    pub(crate) fn remove_bidirectional(&self, id: CellId, ptr: *const ()) {
        Self::remove(&self.bidirectional, id, ptr);
    }

    fn remove(map: &BindingMap, id: CellId, ptr: *const ()) {
        let mut map = map.borrow_mut();
        if map.get(&id).is_some_and(|entry| entry_ptr(entry) == ptr) {
            map.remove(&id);
        }
    }

    pub(crate) fn bidirectional_for<T: Syncable>(
        &self,
        id: CellId,
    ) -> Option<Rc<BidirectionalInner<T>>> {
        let entry = self.bidirectional.borrow().get(&id).cloned()?;
        if entry.state() == BindingState::Disposed {
            return None;
        }
        entry.into_any().downcast::<BidirectionalInner<T>>().ok()
    }
}

/// Tracks and tears down bindings
///
/// Cloning the registry creates a new handle to the same registry.
#[derive(Clone)]
pub struct BindingRegistry {
    inner: Rc<RegistryInner>,
}

impl BindingRegistry {
    /// Create a registry with [`RegistryConfig::standard`]
    pub fn new() -> Self {
        Self::from_config(RegistryConfig::standard())
    }

    /// Create a registry with a custom configuration
    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: RegistryConfig) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                bindings: RefCell::new(FxHashMap::default()),
                bidirectional: RefCell::new(FxHashMap::default()),
                ignored: RefCell::new(SmallVec::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn inner(&self) -> &Rc<RegistryInner> {
        &self.inner
    }

    // =========================================================================
    // CELLS
    // =========================================================================

    /// Create a cell that consults this registry before direct writes
    pub fn property<T: Syncable>(&self, initial: T) -> Property<T> {
        Property::new(self, initial)
    }

    pub fn named_property<T: Syncable>(&self, name: impl Into<String>, initial: T) -> Property<T> {
        Property::named(self, name, initial)
    }

    // =========================================================================
    // BINDING
    // =========================================================================

    /// Start a unidirectional binding driving `target`
    pub fn bind<T, C>(&self, target: &C) -> BindingBuilder<T>
    where
        T: Syncable,
        C: ObservableValue<T> + Clone,
    {
        BindingBuilder::new(self.clone(), Rc::new(target.clone()))
    }

    /// Start (or extend) a bidirectional binding anchored at `target`
    pub fn bind_bidirectional<T, C>(&self, target: &C) -> BidirectionalBuilder<T>
    where
        T: Syncable,
        C: ObservableValue<T> + Clone,
    {
        BidirectionalBuilder::new(self.clone(), Rc::new(target.clone()))
    }

    /// Deactivate the binding driving `target`; no-op if there is none
    pub fn unbind(&self, target: &impl AsCellId) {
        let id = target.cell_id();
        let binding = self.inner.bindings.borrow().get(&id).cloned();
        if let Some(binding) = binding {
            binding.unbind();
        }
    }

    /// Deactivate the bidirectional binding anchored at `target`
    pub fn unbind_bidirectional(&self, target: &impl AsCellId) {
        let id = target.cell_id();
        let binding = self.inner.bidirectional.borrow().get(&id).cloned();
        if let Some(binding) = binding {
            binding.unbind();
        }
    }

    /// Stop synchronizing `a` and `b`
    ///
    /// Removes `b` from the binding anchored at `a`, or `a` from the one
    /// anchored at `b`. Returns whether a participant was removed.
    pub fn unbind_bidirectional_pair(&self, a: &impl AsCellId, b: &impl AsCellId) -> bool {
        let (a, b) = (a.cell_id(), b.cell_id());
        for (anchor, participant) in [(a, b), (b, a)] {
            let binding = self.inner.bidirectional.borrow().get(&anchor).cloned();
            if let Some(binding) = binding {
                if binding.remove_participant(participant) {
                    return true;
                }
            }
        }
        false
    }

    /// Dispose every binding and clear the registry
    pub fn dispose(&self) {
        let bindings: Vec<_> = self
            .inner
            .bindings
            .borrow_mut()
            .drain()
            .map(|(_, binding)| binding)
            .collect();
        let bidirectional: Vec<_> = self
            .inner
            .bidirectional
            .borrow_mut()
            .drain()
            .map(|(_, binding)| binding)
            .collect();

        tracing::debug!(
            bindings = bindings.len(),
            bidirectional = bidirectional.len(),
            "disposing registry"
        );
        for binding in bindings.iter().chain(bidirectional.iter()) {
            binding.dispose();
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Whether a unidirectional binding is registered for `cell` and bound
    pub fn is_bound(&self, cell: &impl AsCellId) -> bool {
        self.inner.is_bound(cell.cell_id())
    }

    /// Whether `cell` is the anchor or a participant of a bound bidirectional binding
    pub fn is_bound_bidirectional(&self, cell: &impl AsCellId) -> bool {
        let id = cell.cell_id();
        let bindings: Vec<_> = self.inner.bidirectional.borrow().values().cloned().collect();
        bindings
            .iter()
            .any(|binding| binding.state() == BindingState::Bound && binding.involves(id))
    }

    /// Whether writes to `cell` currently bypass the bound-value check
    pub fn is_ignore_binding(&self, cell: &impl AsCellId) -> bool {
        self.inner.is_ignore_binding(cell.cell_id())
    }

    /// Run `f` with the bound-value check lifted for `cell`
    ///
    /// The window covers exactly the call to `f`.
    pub fn ignoring<R>(&self, cell: &impl AsCellId, f: impl FnOnce() -> R) -> R {
        self.inner.ignoring(cell.cell_id(), f)
    }

    /// State of the unidirectional binding registered for `cell`
    pub fn binding_state(&self, cell: &impl AsCellId) -> Option<BindingState> {
        let id = cell.cell_id();
        self.inner.bindings.borrow().get(&id).map(|b| b.state())
    }

    /// State of the bidirectional binding anchored at `cell`
    pub fn bidirectional_state(&self, cell: &impl AsCellId) -> Option<BindingState> {
        let id = cell.cell_id();
        self.inner.bidirectional.borrow().get(&id).map(|b| b.state())
    }

    /// Number of registered unidirectional bindings
    pub fn size(&self) -> usize {
        self.inner.bindings.borrow().len()
    }

    /// Number of registered bidirectional bindings
    pub fn bi_size(&self) -> usize {
        self.inner.bidirectional.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bindings.borrow().is_empty()
    }

    pub fn bi_is_empty(&self) -> bool {
        self.inner.bidirectional.borrow().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let bindings = self.inner.bindings.borrow();
        RegistryStats {
            bindings: bindings.len(),
            bidirectional: self.inner.bidirectional.borrow().len(),
            bound: bindings
                .values()
                .filter(|b| b.state() == BindingState::Bound)
                .count(),
            ignored_scopes: self
                .inner
                .ignored
                .borrow()
                .iter()
                .filter(|scope| matches!(scope, Scope::Open(_)))
                .count(),
        }
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("stats", &self.stats())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Statistics about the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered unidirectional bindings, in any state
    pub bindings: usize,
    /// Registered bidirectional bindings, in any state
    pub bidirectional: usize,
    /// Unidirectional bindings currently in the `Bound` state
    pub bound: usize,
    /// Ignore-binding scopes open right now
    pub ignored_scopes: usize,
}
