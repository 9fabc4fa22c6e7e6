//! Bidirectional bindings
//!
//! A [`BidirectionalBinding`] keeps an anchor cell and any number of
//! participant cells mutually in sync: a change to any of them reaches all
//! the others. Participants are stored in an arena keyed by `ParticipantId`
//! and fanned out in insertion order.
//!
//! Each participant owns one propagation flag shared by both of its edges
//! (participant to anchor, anchor to participant). While a change travels
//! over one edge, the flag suppresses the echo over the other, which is what
//! stops `a -> b -> a` loops without comparing values.
//!
//! Unlike a unidirectional target, the anchor stays writable: every member of
//! a bidirectional set may be set directly.

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::binding::BindingState;
use crate::cell::{AsCellId, CellId, ObservableValue, Subscription};
use crate::error::{BindingError, Result};
use crate::kind::Syncable;
use crate::registry::{BindingRegistry, ManagedBinding, RegistryInner};
use crate::source::{EdgeContext, Propagating, Source, SourceLink};
use crate::target::Target;

new_key_type! {
    /// Handle to a participant of a bidirectional binding
    pub(crate) struct ParticipantId;
}

struct Participant<T> {
    link: Rc<dyn SourceLink<T>>,
    guard: Rc<Cell<bool>>,
    subscriptions: SmallVec<[Subscription; 2]>,
}

/// Decrements the fan-out depth on drop
struct DepthGuard<'a>(&'a Cell<usize>);

impl DepthGuard<'_> {
    fn enter(depth: &Cell<usize>) -> DepthGuard<'_> {
        depth.set(depth.get() + 1);
        DepthGuard(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

type Edge<T> = (ParticipantId, Rc<dyn SourceLink<T>>, Rc<Cell<bool>>);

pub(crate) struct BidirectionalInner<T> {
    anchor_id: CellId,
    target: RefCell<Option<Target<T>>>,
    participants: RefCell<SlotMap<ParticipantId, Participant<T>>>,
    order: RefCell<Vec<ParticipantId>>,
    anchor_subscription: RefCell<Option<Subscription>>,
    state: Cell<BindingState>,
    depth: Cell<usize>,
    max_depth: usize,
    trace: bool,
    eager: bool,
    registry: Weak<RegistryInner>,
}

impl<T: Syncable> BidirectionalInner<T> {
    fn edge(&self, guard: &Rc<Cell<bool>>) -> EdgeContext {
        EdgeContext {
            registry: self.registry.clone(),
            target: self.anchor_id,
            guard: Some(Rc::clone(guard)),
            trace: self.trace,
        }
    }

    fn anchor_value(&self) -> Result<T> {
        self.target
            .borrow()
            .as_ref()
            .map(Target::value)
            .ok_or_else(|| BindingError::disposed("BidirectionalBinding"))
    }

    /// Snapshot of the participants' edges in insertion order
    fn edges(&self, skip: Option<ParticipantId>) -> SmallVec<[Edge<T>; 4]> {
        let participants = self.participants.borrow();
        self.order
            .borrow()
            .iter()
            .filter(|id| Some(**id) != skip)
            .filter_map(|id| {
                participants
                    .get(*id)
                    .map(|p| (*id, Rc::clone(&p.link), Rc::clone(&p.guard)))
            })
            .collect()
    }

    /// Push an anchor change to every participant except `skip`
    ///
    /// Participants whose edge is already propagating, or that were removed
    /// by an earlier listener in this pass, are skipped.
    fn fan_out(&self, old: &T, new: &T, skip: Option<ParticipantId>) -> Result<()> {
        if self.depth.get() >= self.max_depth {
            tracing::warn!(
                anchor = %self.anchor_id,
                depth = self.depth.get(),
                "bidirectional propagation too deep"
            );
            return Err(BindingError::IllegalState(format!(
                "propagation from {} exceeded depth {}",
                self.anchor_id, self.max_depth
            )));
        }
        let _depth = DepthGuard::enter(&self.depth);

        for (id, link, guard) in self.edges(skip) {
            if guard.get() || !self.participants.borrow().contains_key(id) {
                continue;
            }
            let _edge = Propagating::enter(&guard);
            if self.trace {
                tracing::trace!(anchor = %self.anchor_id, participant = %link.cell_id(), "fan out");
            }
            link.pull(old, new)?;
        }
        Ok(())
    }

    fn connect(this: &Rc<Self>) -> Result<()> {
        let weak = Rc::downgrade(this);
        let subscription = {
            let target = this.target.borrow();
            let target = target
                .as_ref()
                .ok_or_else(|| BindingError::disposed("BidirectionalBinding"))?;
            target.cell().add_listener(Rc::new(move |old: &T, new: &T| {
                match weak.upgrade() {
                    Some(inner) => inner.fan_out(old, new, None),
                    None => Ok(()),
                }
            }))
        };
        *this.anchor_subscription.borrow_mut() = Some(subscription);

        let mut participants = this.participants.borrow_mut();
        for participant in participants.values_mut() {
            participant.subscriptions = participant.link.connect(&this.edge(&participant.guard));
        }
        Ok(())
    }

    fn disconnect(&self) {
        let anchor = self.anchor_subscription.borrow_mut().take();
        drop(anchor);

        let subscriptions: Vec<_> = self
            .participants
            .borrow_mut()
            .values_mut()
            .map(|p| std::mem::take(&mut p.subscriptions))
            .collect();
        drop(subscriptions);
    }

    fn with_target<R>(&self, f: impl FnOnce(&Target<T>) -> Result<R>) -> Result<R> {
        let target = self.target.borrow();
        let target = target
            .as_ref()
            .ok_or_else(|| BindingError::disposed("BidirectionalBinding"))?;
        f(target)
    }

    /// Store a resolved participant, wiring it if the binding is bound
    fn insert(&self, link: Rc<dyn SourceLink<T>>) {
        let cell = link.cell_id();
        if self.position(cell).is_some() {
            tracing::trace!(anchor = %self.anchor_id, participant = %cell, "already participating");
            return;
        }

        let guard = Rc::new(Cell::new(false));
        let subscriptions = if self.state.get() == BindingState::Bound {
            link.connect(&self.edge(&guard))
        } else {
            SmallVec::new()
        };

        let id = self.participants.borrow_mut().insert(Participant {
            link,
            guard,
            subscriptions,
        });
        self.order.borrow_mut().push(id);
    }

    fn position(&self, cell: CellId) -> Option<ParticipantId> {
        let participants = self.participants.borrow();
        self.order
            .borrow()
            .iter()
            .copied()
            .find(|id| participants.get(*id).is_some_and(|p| p.link.cell_id() == cell))
    }
}

impl<T: Syncable> ManagedBinding for BidirectionalInner<T> {
    fn target_id(&self) -> CellId {
        self.anchor_id
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
        tracing::debug!(anchor = %self.anchor_id, "bidirectional binding unbound");
    }

    fn dispose(&self) {
        if self.state.get() == BindingState::Disposed {
            return;
        }
        self.state.set(BindingState::Disposed);
        self.disconnect();

        let participants = std::mem::take(&mut *self.participants.borrow_mut());
        self.order.borrow_mut().clear();
        drop(participants);
        let target = self.target.borrow_mut().take();
        drop(target);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_bidirectional(self.anchor_id, self as *const Self as *const ());
        }
        tracing::debug!(anchor = %self.anchor_id, "bidirectional binding disposed");
    }

    fn involves(&self, cell: CellId) -> bool {
        cell == self.anchor_id || self.position(cell).is_some()
    }

    /// Remove the participant for `cell`; disposes the binding once empty
    fn remove_participant(&self, cell: CellId) -> bool {
        let Some(id) = self.position(cell) else {
            return false;
        };
        let removed = self.participants.borrow_mut().remove(id);
        self.order.borrow_mut().retain(|other| *other != id);
        drop(removed);
        tracing::debug!(anchor = %self.anchor_id, participant = %cell, "participant removed");

        if self.participants.borrow().is_empty() {
            self.dispose();
        }
        true
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn std::any::Any> {
        self
    }
}

/// A set of mutually synchronized cells
///
/// Cloning a `BidirectionalBinding` creates a new handle to the same binding.
pub struct BidirectionalBinding<T> {
    inner: Rc<BidirectionalInner<T>>,
}

impl<T> Clone for BidirectionalBinding<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Syncable> BidirectionalBinding<T> {
    fn new(registry: &BindingRegistry, target: Target<T>, eager: bool) -> Self {
        let config = registry.config();
        Self {
            inner: Rc::new(BidirectionalInner {
                anchor_id: target.id(),
                target: RefCell::new(Some(target)),
                participants: RefCell::new(SlotMap::with_key()),
                order: RefCell::new(Vec::new()),
                anchor_subscription: RefCell::new(None),
                state: Cell::new(BindingState::Null),
                depth: Cell::new(0),
                max_depth: config.max_propagation_depth,
                trace: config.trace_propagation,
                eager,
                registry: registry.downgrade(),
            }),
        }
    }

    /// Activate the binding
    ///
    /// Registers it for its anchor, disposing any bidirectional binding
    /// previously registered there, and attaches listeners to the anchor and
    /// every participant.
    pub fn get(&self) -> Result<Self> {
        match self.inner.state.get() {
            BindingState::Disposed => return Err(BindingError::disposed("BidirectionalBinding")),
            BindingState::Bound => return Ok(self.clone()),
            BindingState::Null | BindingState::Unbound => {}
        }

        let registry = self
            .inner
            .registry
            .upgrade()
            .ok_or_else(|| BindingError::IllegalState("registry has been dropped".into()))?;
        let managed: Rc<dyn ManagedBinding> = self.inner.clone();
        registry.install_bidirectional(self.inner.anchor_id, managed)?;

        BidirectionalInner::connect(&self.inner)?;
        self.inner.state.set(BindingState::Bound);
        tracing::debug!(
            anchor = %self.inner.anchor_id,
            participants = self.participant_count(),
            eager = self.inner.eager,
            "bidirectional binding activated"
        );

        if self.inner.eager {
            self.invalidate()?;
        }
        Ok(self.clone())
    }

    /// Make every cell agree with the last participant
    ///
    /// The last participant's value is written into the anchor, then the
    /// anchor's value goes out to every other participant.
    pub fn invalidate(&self) -> Result<()> {
        if self.inner.state.get() == BindingState::Disposed {
            return Err(BindingError::disposed("BidirectionalBinding"));
        }
        let last = self.inner.edges(None).into_iter().last();
        let Some((id, link, guard)) = last else {
            return Ok(());
        };

        link.push(&self.inner.edge(&guard))?;
        let current = self.inner.anchor_value()?;
        self.inner.fan_out(&current, &current, Some(id))
    }

    /// Make every participant agree with the anchor
    pub fn invalidate_source(&self) -> Result<()> {
        if self.inner.state.get() == BindingState::Disposed {
            return Err(BindingError::disposed("BidirectionalBinding"));
        }
        let current = self.inner.anchor_value()?;
        self.inner.fan_out(&current, &current, None)
    }

    /// Add a participant; wired immediately if the binding is bound
    ///
    /// Adding a cell that already participates does nothing.
    pub fn add_source<S: Syncable>(&self, source: Source<S, T>) -> Result<()> {
        if self.inner.state.get() == BindingState::Disposed {
            return Err(BindingError::disposed("BidirectionalBinding"));
        }
        let cell = source.cell_id();
        if cell != self.inner.anchor_id && self.inner.position(cell).is_some() {
            tracing::trace!(anchor = %self.inner.anchor_id, participant = %cell, "already participating");
            return Ok(());
        }

        let link = self.inner.with_target(|target| source.resolve(target, true))?;
        self.inner.insert(link);
        Ok(())
    }

    /// Stop synchronizing `cell` with this binding
    ///
    /// Removing the last participant disposes the binding. Returns whether
    /// `cell` was a participant.
    pub fn remove_source(&self, cell: &impl AsCellId) -> bool {
        self.inner.remove_participant(cell.cell_id())
    }

    /// Remove every participant, which disposes the binding
    pub fn clear_sources(&self) {
        let cells: Vec<CellId> = self
            .inner
            .edges(None)
            .iter()
            .map(|(_, link, _)| link.cell_id())
            .collect();
        for cell in cells {
            self.inner.remove_participant(cell);
        }
    }

    /// Detach every listener; can be reactivated with `get()`
    pub fn unbind(&self) {
        self.inner.unbind();
    }

    /// Detach every listener and leave the registry
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

    pub fn anchor_id(&self) -> CellId {
        self.inner.anchor_id
    }

    pub fn participant_count(&self) -> usize {
        self.inner.participants.borrow().len()
    }

    /// Whether `cell` is the anchor or a participant
    pub fn involves(&self, cell: &impl AsCellId) -> bool {
        self.inner.involves(cell.cell_id())
    }
}

impl<T> fmt::Debug for BidirectionalBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidirectionalBinding")
            .field("anchor", &self.inner.anchor_id)
            .field("state", &self.inner.state.get())
            .field("participants", &self.inner.participants.borrow().len())
            .finish()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

type PendingParticipant<T> = Box<dyn FnOnce(&Target<T>) -> Result<Rc<dyn SourceLink<T>>>>;

/// Accumulates participants, returned by
/// [`BindingRegistry::bind_bidirectional`]
///
/// If a live bidirectional binding is already anchored at the same cell,
/// `get()` adds the new participants to it instead of replacing it. Either
/// every new participant is added or none is.
#[must_use = "call get() to activate the binding"]
pub struct BidirectionalBuilder<T> {
    registry: BindingRegistry,
    cell: Rc<dyn ObservableValue<T>>,
    sources: Vec<PendingParticipant<T>>,
    eager: bool,
}

impl<T: Syncable> BidirectionalBuilder<T> {
    pub(crate) fn new(registry: BindingRegistry, cell: Rc<dyn ObservableValue<T>>) -> Self {
        let eager = registry.config().eager_by_default;
        Self {
            registry,
            cell,
            sources: Vec::new(),
            eager,
        }
    }

    pub fn source<S: Syncable>(mut self, source: Source<S, T>) -> Self {
        self.sources
            .push(Box::new(move |target: &Target<T>| source.resolve(target, true)));
        self
    }

    pub fn sources(self, sources: impl IntoIterator<Item = Source<T, T>>) -> Self {
        sources.into_iter().fold(self, |builder, source| builder.source(source))
    }

    /// Reconcile all cells as soon as the binding is activated
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Create or extend the binding and activate it
    pub fn get(self) -> Result<BidirectionalBinding<T>> {
        let anchor = self.cell.cell_id();
        let existing = self
            .registry
            .inner()
            .bidirectional_for::<T>(anchor)
            .map(|inner| BidirectionalBinding { inner });
        let merging = existing.is_some();
        let binding = match existing {
            Some(binding) => binding,
            None => BidirectionalBinding::new(
                &self.registry,
                Target::from_shared(self.cell),
                self.eager,
            ),
        };

        let sources = self.sources;
        let links = binding.inner.with_target(|target| {
            sources
                .into_iter()
                .map(|resolve| resolve(target))
                .collect::<Result<Vec<_>>>()
        })?;
        for link in links {
            binding.inner.insert(link);
        }
        if binding.participant_count() == 0 {
            return Err(BindingError::IllegalArgument(format!(
                "bidirectional binding for {anchor} needs at least one other cell"
            )));
        }

        binding.get()?;
        if merging && self.eager {
            binding.invalidate()?;
        }
        Ok(binding)
    }
}
