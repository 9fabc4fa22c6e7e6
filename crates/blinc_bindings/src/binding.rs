//! Unidirectional bindings
//!
//! A [`Binding`] keeps one target cell in sync with one or more sources. The
//! target is overwritten whenever any source changes and rejects direct writes
//! while the binding is bound.
//!
//! # Lifecycle
//!
//! ```text
//! Null --get()--> Bound --unbind()--> Unbound --get()--> Bound
//!                   |                    |
//!                   +-----dispose()------+--> Disposed (terminal)
//! ```
//!
//! Activation is lazy: `get()` attaches listeners but does not touch the
//! target until a source changes. Call [`Binding::invalidate`] (or build with
//! `eager(true)`) to seed the target immediately.
//!
//! When several sources change independently, each listener fires in the
//! order the source cell delivers it and the target ends up with the value
//! computed by whichever fired last. Callers that need a defined order should
//! combine the inputs into a single source.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::{CellId, ObservableValue, Subscription};
use crate::error::{BindingError, Result};
use crate::kind::Syncable;
use crate::registry::{BindingRegistry, ManagedBinding, RegistryInner};
use crate::source::{EdgeContext, Source, SourceLink};
use crate::target::Target;

/// Lifecycle state shared by [`Binding`] and
/// [`BidirectionalBinding`](crate::BidirectionalBinding)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingState {
    /// Constructed, never activated
    Null,
    /// Listening to its sources
    Bound,
    /// Listeners detached; can be reactivated with `get()`
    Unbound,
    /// Terminal
    Disposed,
}

pub(crate) struct BindingInner<T> {
    target_id: CellId,
    target: RefCell<Option<Target<T>>>,
    sources: RefCell<Vec<Rc<dyn SourceLink<T>>>>,
    subscriptions: RefCell<Vec<Subscription>>,
    state: Cell<BindingState>,
    eager: bool,
    registry: Weak<RegistryInner>,
}

impl<T: Syncable> BindingInner<T> {
    fn edge(&self) -> EdgeContext {
        EdgeContext {
            registry: self.registry.clone(),
            target: self.target_id,
            guard: None,
            trace: self
                .registry
                .upgrade()
                .is_some_and(|registry| registry.config().trace_propagation),
        }
    }

    fn connect(&self) {
        let sources = self.sources.borrow().clone();
        let edge = self.edge();
        let subscriptions: Vec<Subscription> = sources
            .iter()
            .flat_map(|source| source.connect(&edge))
            .collect();
        self.subscriptions.borrow_mut().extend(subscriptions);
    }

    fn disconnect(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
    }
}

impl<T: Syncable> ManagedBinding for BindingInner<T> {
    fn target_id(&self) -> CellId {
        self.target_id
    }

    fn state(&self) -> BindingState {
        self.state.get()
    }

    fn unbind(&self) {
        if self.state.get() == BindingState::Disposed {
            return;
        }
        self.disconnect();
        self.state.set(BindingState::Unbound);
        tracing::debug!(target = %self.target_id, "binding unbound");
    }

    fn dispose(&self) {
        if self.state.get() == BindingState::Disposed {
            return;
        }
        self.state.set(BindingState::Disposed);
        self.disconnect();

        let sources = std::mem::take(&mut *self.sources.borrow_mut());
        drop(sources);
        let target = self.target.borrow_mut().take();
        drop(target);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_binding(self.target_id, self as *const Self as *const ());
        }
        tracing::debug!(target = %self.target_id, "binding disposed");
    }

    fn involves(&self, cell: CellId) -> bool {
        cell == self.target_id || self.sources.borrow().iter().any(|s| s.cell_id() == cell)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn std::any::Any> {
        self
    }
}

/// A unidirectional binding
///
/// Cloning a `Binding` creates a new handle to the same binding.
pub struct Binding<T> {
    inner: Rc<BindingInner<T>>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Syncable> Binding<T> {
    fn new(
        registry: &BindingRegistry,
        target: Target<T>,
        sources: Vec<Rc<dyn SourceLink<T>>>,
        eager: bool,
    ) -> Self {
        Self {
            inner: Rc::new(BindingInner {
                target_id: target.id(),
                target: RefCell::new(Some(target)),
                sources: RefCell::new(sources),
                subscriptions: RefCell::new(Vec::new()),
                state: Cell::new(BindingState::Null),
                eager,
                registry: registry.downgrade(),
            }),
        }
    }

    /// Activate the binding
    ///
    /// Registers it for its target, disposing any binding previously
    /// registered there, then attaches listeners to every source. Calling
    /// `get()` on a bound binding does nothing.
    pub fn get(&self) -> Result<Self> {
        match self.inner.state.get() {
            BindingState::Disposed => return Err(BindingError::disposed("Binding")),
            BindingState::Bound => return Ok(self.clone()),
            BindingState::Null | BindingState::Unbound => {}
        }

        let registry = self
            .inner
            .registry
            .upgrade()
            .ok_or_else(|| BindingError::IllegalState("registry has been dropped".into()))?;
        let managed: Rc<dyn ManagedBinding> = self.inner.clone();
        registry.install_binding(self.inner.target_id, managed)?;

        self.inner.connect();
        self.inner.state.set(BindingState::Bound);
        tracing::debug!(
            target = %self.inner.target_id,
            sources = self.source_count(),
            eager = self.inner.eager,
            "binding activated"
        );

        if self.inner.eager {
            self.invalidate()?;
        }
        Ok(self.clone())
    }

    /// Run every source's target-updater now, with its current value
    ///
    /// Seeds the target right after `get()`, or refreshes it after a source
    /// changed in a way the binding could not observe. Sources run in order,
    /// so the last one wins.
    pub fn invalidate(&self) -> Result<()> {
        if self.inner.state.get() == BindingState::Disposed {
            return Err(BindingError::disposed("Binding"));
        }
        let sources = self.inner.sources.borrow().clone();
        let edge = self.inner.edge();
        for source in sources {
            source.push(&edge)?;
        }
        Ok(())
    }

    /// Push the target's value back into the sources
    ///
    /// A unidirectional binding has no source-updaters, so this always fails
    /// with [`BindingError::Unsupported`]. Only
    /// [`BidirectionalBinding::invalidate_source`](crate::BidirectionalBinding::invalidate_source)
    /// does anything.
    pub fn invalidate_source(&self) -> Result<()> {
        if self.inner.state.get() == BindingState::Disposed {
            return Err(BindingError::disposed("Binding"));
        }
        Err(BindingError::Unsupported(
            "unidirectional bindings have no source-updater".into(),
        ))
    }

    /// Add another source; wired immediately if the binding is bound
    pub fn add_source<S: Syncable>(&self, source: Source<S, T>) -> Result<()> {
        if self.inner.state.get() == BindingState::Disposed {
            return Err(BindingError::disposed("Binding"));
        }
        let link = {
            let target = self.inner.target.borrow();
            let target = target
                .as_ref()
                .ok_or_else(|| BindingError::disposed("Binding"))?;
            source.resolve(target, false)?
        };

        if self.inner.state.get() == BindingState::Bound {
            let subscriptions = link.connect(&self.inner.edge());
            self.inner.subscriptions.borrow_mut().extend(subscriptions);
        }
        self.inner.sources.borrow_mut().push(link);
        Ok(())
    }

    /// Detach listeners and free the target for direct writes
    ///
    /// The binding stays registered and can be reactivated with `get()`.
    pub fn unbind(&self) {
        self.inner.unbind();
    }

    /// Detach listeners, drop target and sources, leave the registry
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn state(&self) -> BindingState {
        self.inner.state.get()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.state.get() == BindingState::Bound
    }

    pub fn is_eager(&self) -> bool {
        self.inner.eager
    }

    pub fn target_id(&self) -> CellId {
        self.inner.target_id
    }

    pub fn source_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }
}

impl<T> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("target", &self.inner.target_id)
            .field("state", &self.inner.state.get())
            .field("sources", &self.inner.sources.borrow().len())
            .finish()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

type PendingSource<T> = Box<dyn FnOnce(&Target<T>) -> Result<Rc<dyn SourceLink<T>>>>;

/// Accumulates sources for a [`Binding`], returned by
/// [`BindingRegistry::bind`]
#[must_use = "call get() to activate the binding"]
pub struct BindingBuilder<T> {
    registry: BindingRegistry,
    target: Target<T>,
    sources: Vec<PendingSource<T>>,
    eager: bool,
}

impl<T: Syncable> BindingBuilder<T> {
    pub(crate) fn new(registry: BindingRegistry, cell: Rc<dyn ObservableValue<T>>) -> Self {
        let eager = registry.config().eager_by_default;
        Self {
            registry,
            target: Target::from_shared(cell),
            sources: Vec::new(),
            eager,
        }
    }

    pub fn source<S: Syncable>(mut self, source: Source<S, T>) -> Self {
        self.sources
            .push(Box::new(move |target: &Target<T>| source.resolve(target, false)));
        self
    }

    pub fn sources(self, sources: impl IntoIterator<Item = Source<T, T>>) -> Self {
        sources.into_iter().fold(self, |builder, source| builder.source(source))
    }

    /// Seed the target as soon as the binding is activated
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Build the binding without activating it
    ///
    /// Every source is resolved against the target here, so a self-binding or
    /// a read-only target fails before the registry is touched.
    pub fn build(self) -> Result<Binding<T>> {
        if self.sources.is_empty() {
            return Err(BindingError::IllegalArgument(format!(
                "binding for {} needs at least one source",
                self.target.id()
            )));
        }

        let links = self
            .sources
            .into_iter()
            .map(|resolve| resolve(&self.target))
            .collect::<Result<Vec<_>>>()?;
        Ok(Binding::new(&self.registry, self.target, links, self.eager))
    }

    /// Build and activate the binding
    pub fn get(self) -> Result<Binding<T>> {
        self.build()?.get()
    }
}
