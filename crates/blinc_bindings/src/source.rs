//! Binding sources
//!
//! A [`Source`] wraps one cell plus the updaters that move its changes toward
//! a target (and, for bidirectional use, back). Updaters that write straight
//! into a cell are resolved against the concrete target when the binding is
//! built, so a read-only target is rejected before anything gets registered.
//!
//! Sources may also carry *invalidating* cells: cells whose change re-runs the
//! target-updater with the source's current value, without their own value
//! being copied anywhere (a scale factor used inside a map function, say).

use smallvec::SmallVec;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::{AnyObservable, AsCellId, CellId, ObservableValue, Subscription};
use crate::error::{BindingError, Result};
use crate::kind::Syncable;
use crate::mapper::Mapper;
use crate::registry::RegistryInner;
use crate::target::Target;
use crate::updater::{MappedUpdater, Updater};

type TargetUpdaterFactory<S, T> = Rc<dyn Fn(&Target<T>) -> Result<Updater<S>>>;
type SourceUpdaterFactory<T> = Rc<dyn Fn() -> Result<Updater<T>>>;

/// A source cell and its updaters
pub struct Source<S, T> {
    cell: Rc<dyn ObservableValue<S>>,
    target_updater: TargetUpdaterFactory<S, T>,
    source_updater: Option<SourceUpdaterFactory<T>>,
    invalidating: Vec<Rc<dyn AnyObservable>>,
}

impl<T: Syncable> Source<T, T> {
    /// Same-type source: writes go straight into the target, and back
    pub fn of<C: ObservableValue<T>>(cell: C) -> Self {
        let cell: Rc<dyn ObservableValue<T>> = Rc::new(cell);
        let back = Rc::clone(&cell);
        Self {
            cell,
            target_updater: Rc::new(|target: &Target<T>| target.implicit_updater()),
            source_updater: Some(Rc::new(move || Updater::implicit_shared(Rc::clone(&back)))),
            invalidating: Vec::new(),
        }
    }
}

impl<S: Syncable, T: Syncable> Source<S, T> {
    /// Start building a source whose cell type differs from the target's
    pub fn mapping<C: ObservableValue<S>>(cell: C) -> MappingSource<S, T> {
        MappingSource {
            cell: Rc::new(cell),
            target_updater: None,
            source_updater: None,
            invalidating: Vec::new(),
        }
    }

    /// Re-run the target-updater whenever `cell` changes
    pub fn with_invalidating<C: AnyObservable>(mut self, cell: C) -> Self {
        self.invalidating.push(Rc::new(cell));
        self
    }

    pub fn cell_id(&self) -> CellId {
        self.cell.cell_id()
    }

    /// Whether this source can take part in a bidirectional binding
    pub fn has_source_updater(&self) -> bool {
        self.source_updater.is_some()
    }

    pub fn invalidating_count(&self) -> usize {
        self.invalidating.len()
    }

    /// Resolve the updaters against `target`
    pub(crate) fn resolve(
        self,
        target: &Target<T>,
        bidirectional: bool,
    ) -> Result<Rc<dyn SourceLink<T>>> {
        let id = self.cell.cell_id();
        if id == target.id() {
            return Err(BindingError::IllegalArgument(format!(
                "cannot bind {id} to itself"
            )));
        }

        let to_target = (self.target_updater)(target)?;
        let to_source = if bidirectional {
            match &self.source_updater {
                Some(factory) => Some(factory()?),
                None => {
                    return Err(BindingError::IllegalArgument(format!(
                        "{id} has no source-updater and cannot be bound bidirectionally"
                    )))
                }
            }
        } else {
            None
        };

        Ok(Rc::new(ResolvedSource {
            cell: self.cell,
            to_target,
            to_source,
            invalidating: self.invalidating,
        }))
    }
}

impl<S, T> fmt::Debug for Source<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("cell", &self.cell.cell_id())
            .field("source_updater", &self.source_updater.is_some())
            .field("invalidating", &self.invalidating.len())
            .finish()
    }
}

// =============================================================================
// MAPPING SOURCE
// =============================================================================

/// Builder for a [`Source`] with separate target- and source-updaters
///
/// ```
/// use blinc_bindings::{BindingRegistry, Mapper, Source};
///
/// let registry = BindingRegistry::new();
/// let text = registry.property(String::from("1.5"));
///
/// let source = Source::<String, f64>::mapping(text)
///     .map_to_target(Mapper::try_of(|s: &String| s.parse::<f64>()))
///     .map_to_source(Mapper::of(|n: &f64| format!("{n:?}")))
///     .build()
///     .unwrap();
/// assert!(source.has_source_updater());
/// ```
pub struct MappingSource<S, T> {
    cell: Rc<dyn ObservableValue<S>>,
    target_updater: Option<TargetUpdaterFactory<S, T>>,
    source_updater: Option<SourceUpdaterFactory<T>>,
    invalidating: Vec<Rc<dyn AnyObservable>>,
}

impl<S: Syncable, T: Syncable> MappingSource<S, T> {
    /// Custom updater applied when the source changes
    pub fn target_updater(mut self, updater: Updater<S>) -> Self {
        self.target_updater = Some(Rc::new(move |_: &Target<T>| -> Result<Updater<S>> {
            Ok(updater.clone())
        }));
        self
    }

    /// Map source values and write them into the target
    pub fn map_to_target(mut self, mapper: Mapper<S, T>) -> Self {
        self.target_updater = Some(Rc::new(move |target: &Target<T>| -> Result<Updater<S>> {
            Ok(MappedUpdater::new(mapper.clone(), target.implicit_updater()?).into())
        }));
        self
    }

    /// Custom updater applied when the target changes
    pub fn source_updater(mut self, updater: Updater<T>) -> Self {
        self.source_updater = Some(Rc::new(move || -> Result<Updater<T>> { Ok(updater.clone()) }));
        self
    }

    /// Map target values and write them into the source
    pub fn map_to_source(mut self, mapper: Mapper<T, S>) -> Self {
        let back = Rc::clone(&self.cell);
        self.source_updater = Some(Rc::new(move || -> Result<Updater<T>> {
            let write_back = Updater::implicit_shared(Rc::clone(&back))?;
            Ok(MappedUpdater::new(mapper.clone(), write_back).into())
        }));
        self
    }

    /// Re-run the target-updater whenever `cell` changes
    pub fn invalidating<C: AnyObservable>(mut self, cell: C) -> Self {
        self.invalidating.push(Rc::new(cell));
        self
    }

    pub fn build(self) -> Result<Source<S, T>> {
        let target_updater = self.target_updater.ok_or_else(|| {
            BindingError::IllegalArgument(format!(
                "source {} has no target-updater",
                self.cell.cell_id()
            ))
        })?;
        Ok(Source {
            cell: self.cell,
            target_updater,
            source_updater: self.source_updater,
            invalidating: self.invalidating,
        })
    }
}

// =============================================================================
// RESOLVED LINKS
// =============================================================================

/// Marks an edge as propagating until dropped
pub(crate) struct Propagating(Rc<Cell<bool>>);

impl Propagating {
    pub(crate) fn enter(flag: &Rc<Cell<bool>>) -> Self {
        flag.set(true);
        Self(Rc::clone(flag))
    }
}

impl Drop for Propagating {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Where a source's changes go, and how they are guarded
#[derive(Clone)]
pub(crate) struct EdgeContext {
    pub registry: Weak<RegistryInner>,
    pub target: CellId,
    /// Shared by both directions of a bidirectional edge
    pub guard: Option<Rc<Cell<bool>>>,
    pub trace: bool,
}

impl EdgeContext {
    /// Run a write toward the target, unless this edge is already propagating
    fn run(&self, source: CellId, write: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.guard.as_ref().is_some_and(|guard| guard.get()) {
            return Ok(());
        }
        let _edge = self.guard.as_ref().map(Propagating::enter);
        if self.trace {
            tracing::trace!(source = %source, target = %self.target, "propagate");
        }
        match self.registry.upgrade() {
            Some(registry) => registry.ignoring(self.target, write),
            None => write(),
        }
    }
}

/// A source with its updaters resolved, type-erased over the source type
pub(crate) trait SourceLink<T> {
    fn cell_id(&self) -> CellId;

    /// Attach listeners on the source cell and its invalidating cells
    fn connect(&self, ctx: &EdgeContext) -> SmallVec<[Subscription; 2]>;

    /// Run the target-updater with the current source value as old and new
    fn push(&self, ctx: &EdgeContext) -> Result<()>;

    /// Run the source-updater with a target change
    fn pull(&self, old: &T, new: &T) -> Result<()>;
}

struct ResolvedSource<S, T> {
    cell: Rc<dyn ObservableValue<S>>,
    to_target: Updater<S>,
    to_source: Option<Updater<T>>,
    invalidating: Vec<Rc<dyn AnyObservable>>,
}

impl<S: Syncable, T: Syncable> SourceLink<T> for ResolvedSource<S, T> {
    fn cell_id(&self) -> CellId {
        self.cell.cell_id()
    }

    fn connect(&self, ctx: &EdgeContext) -> SmallVec<[Subscription; 2]> {
        let id = self.cell.cell_id();
        let mut subscriptions = SmallVec::new();

        let edge = ctx.clone();
        let to_target = self.to_target.clone();
        subscriptions.push(self.cell.add_listener(Rc::new(move |old: &S, new: &S| {
            edge.run(id, || to_target.update(old, new))
        })));

        for invalidating in &self.invalidating {
            let edge = ctx.clone();
            let to_target = self.to_target.clone();
            let cell = Rc::clone(&self.cell);
            subscriptions.push(invalidating.watch(Rc::new(move || {
                let current = cell.value();
                edge.run(id, || to_target.update(&current, &current))
            })));
        }

        subscriptions
    }

    fn push(&self, ctx: &EdgeContext) -> Result<()> {
        let current = self.cell.value();
        ctx.run(self.cell.cell_id(), || {
            self.to_target.update(&current, &current)
        })
    }

    fn pull(&self, old: &T, new: &T) -> Result<()> {
        match &self.to_source {
            Some(updater) => updater.update(old, new),
            None => Err(BindingError::Unsupported(format!(
                "{} has no source-updater",
                self.cell.cell_id()
            ))),
        }
    }
}
