//! Binding targets

use std::fmt;
use std::rc::Rc;

use crate::cell::{AsCellId, CellId, ObservableValue};
use crate::error::Result;
use crate::kind::{SyncKind, Syncable};
use crate::updater::Updater;

/// The cell a binding keeps in sync
///
/// Owned by exactly one binding. Its identity is the identity of the cell and
/// never changes for the life of that binding.
pub struct Target<T> {
    cell: Rc<dyn ObservableValue<T>>,
    id: CellId,
    kind: SyncKind,
    type_name: &'static str,
}

impl<T: Syncable> Target<T> {
    pub fn of<C: ObservableValue<T>>(cell: C) -> Self {
        Self::from_shared(Rc::new(cell))
    }

    pub fn from_shared(cell: Rc<dyn ObservableValue<T>>) -> Self {
        Self {
            id: cell.cell_id(),
            cell,
            kind: T::KIND,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Declared synchronization kind
    pub fn kind(&self) -> SyncKind {
        self.kind
    }

    /// Declared value type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn value(&self) -> T {
        self.cell.value()
    }

    pub fn is_writable(&self) -> bool {
        self.cell.is_writable()
    }

    pub(crate) fn cell(&self) -> &Rc<dyn ObservableValue<T>> {
        &self.cell
    }

    /// Updater writing straight into the target cell
    pub fn implicit_updater(&self) -> Result<Updater<T>> {
        Updater::implicit_shared(Rc::clone(&self.cell))
    }
}

impl<T> AsCellId for Target<T> {
    fn cell_id(&self) -> CellId {
        self.id
    }
}

impl<T> fmt::Debug for Target<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("type", &self.type_name)
            .finish()
    }
}
