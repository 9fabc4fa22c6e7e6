//! Updaters
//!
//! An [`Updater`] applies an `(old, new)` pair to some cell. Bindings hold one
//! updater per direction per source: the target-updater pushes a source change
//! into the target, the source-updater pulls a target change back.

use std::fmt;
use std::rc::Rc;

use crate::cell::ObservableValue;
use crate::error::{BindingError, Result};
use crate::kind::Syncable;
use crate::mapper::Mapper;

/// A composable `(old, new) -> ()` operation
pub struct Updater<T> {
    apply: Rc<dyn Fn(&T, &T) -> Result<()>>,
}

impl<T> Clone for Updater<T> {
    fn clone(&self) -> Self {
        Self {
            apply: Rc::clone(&self.apply),
        }
    }
}

impl<T: 'static> Updater<T> {
    /// Wrap a fallible function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T, &T) -> Result<()> + 'static,
    {
        Self { apply: Rc::new(f) }
    }

    /// Wrap a function that cannot fail
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&T, &T) + 'static,
    {
        Self::new(move |old, new| {
            f(old, new);
            Ok(())
        })
    }

    /// An updater that does nothing
    pub fn noop() -> Self {
        Self::new(|_, _| Ok(()))
    }

    /// Apply the change
    pub fn update(&self, old: &T, new: &T) -> Result<()> {
        (self.apply)(old, new)
    }

    /// Run `self`, then `after`, with the same pair
    ///
    /// If `self` fails, `after` does not run and the error is returned.
    pub fn and_then(&self, after: Updater<T>) -> Updater<T> {
        let first = self.clone();
        Self::new(move |old, new| {
            first.update(old, new)?;
            after.update(old, new)
        })
    }
}

impl<T: Syncable> Updater<T> {
    /// An updater that writes the new value into `cell`
    ///
    /// Fails with [`BindingError::Unsupported`] if the cell is not writable.
    pub fn implicit<C: ObservableValue<T>>(cell: C) -> Result<Self> {
        Self::implicit_shared(Rc::new(cell))
    }

    /// [`Updater::implicit`] for a cell that is already shared
    pub fn implicit_shared(cell: Rc<dyn ObservableValue<T>>) -> Result<Self> {
        if !cell.is_writable() {
            return Err(BindingError::Unsupported(format!(
                "implicit updater needs a writable cell, {} is read-only",
                cell.cell_id()
            )));
        }
        tracing::trace!(cell = %cell.cell_id(), kind = T::KIND.name(), "implicit updater");
        Ok(Self::new(move |_old, new| cell.write_from_binding(new.clone())))
    }
}

impl<T> fmt::Debug for Updater<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater").finish_non_exhaustive()
    }
}

/// An updater on `S` values that maps them to `T` and hands them on
pub struct MappedUpdater<S, T> {
    mapper: Mapper<S, T>,
    updater: Updater<T>,
}

impl<S: 'static, T: Clone + 'static> MappedUpdater<S, T> {
    pub fn new(mapper: Mapper<S, T>, updater: Updater<T>) -> Self {
        Self { mapper, updater }
    }

    /// Map both values and forward them
    ///
    /// The new value must map; the old value is mapped best-effort and falls
    /// back to the mapped new value.
    pub fn update(&self, old: &S, new: &S) -> Result<()> {
        let mapped_new = self.mapper.apply(new)?;
        let mapped_old = self
            .mapper
            .apply(old)
            .unwrap_or_else(|_| mapped_new.clone());
        self.updater.update(&mapped_old, &mapped_new)
    }
}

impl<S: 'static, T: Clone + 'static> From<MappedUpdater<S, T>> for Updater<S> {
    fn from(mapped: MappedUpdater<S, T>) -> Self {
        Updater::new(move |old, new| mapped.update(old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BindingRegistry;
    use std::cell::RefCell;

    #[test]
    fn test_and_then_runs_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let first_log = Rc::clone(&log);
        let second_log = Rc::clone(&log);

        let updater = Updater::from_fn(move |old: &i32, new: &i32| {
            first_log.borrow_mut().push(("first", *old, *new))
        })
        .and_then(Updater::from_fn(move |old: &i32, new: &i32| {
            second_log.borrow_mut().push(("second", *old, *new))
        }));

        updater.update(&1, &2).unwrap();
        assert_eq!(*log.borrow(), vec![("first", 1, 2), ("second", 1, 2)]);
    }

    #[test]
    fn test_and_then_stops_on_failure() {
        let ran = Rc::new(RefCell::new(false));
        let ran_clone = Rc::clone(&ran);

        let updater = Updater::new(|_: &i32, _: &i32| Err(BindingError::Mapping("boom".into())))
            .and_then(Updater::from_fn(move |_, _| *ran_clone.borrow_mut() = true));

        assert!(updater.update(&0, &1).is_err());
        assert!(!*ran.borrow());
    }

    #[test]
    fn test_implicit_writes_new_value() {
        let registry = BindingRegistry::new();
        let cell = registry.property(0i64);
        let updater = Updater::<i64>::implicit(cell.clone()).unwrap();

        updater.update(&0, &9).unwrap();
        assert_eq!(cell.get(), 9);
    }

    #[test]
    fn test_implicit_rejects_read_only() {
        let registry = BindingRegistry::new();
        let cell = registry.property(0i64);
        let err = Updater::<i64>::implicit(cell.read_only()).unwrap_err();
        assert!(matches!(err, BindingError::Unsupported(_)));
    }

    #[test]
    fn test_mapped_updater() {
        let registry = BindingRegistry::new();
        let label = registry.property(String::new());
        let mapped: Updater<i32> = MappedUpdater::new(
            Mapper::of(|n: &i32| format!("#{n}")),
            Updater::<String>::implicit(label.clone()).unwrap(),
        )
        .into();

        mapped.update(&1, &2).unwrap();
        assert_eq!(label.get(), "#2");
    }

    #[test]
    fn test_mapped_updater_old_value_is_best_effort() {
        let seen = Rc::new(RefCell::new(None));
        let seen_clone = Rc::clone(&seen);
        let mapped = MappedUpdater::new(
            Mapper::try_of(|s: &String| s.parse::<i32>()),
            Updater::from_fn(move |old: &i32, new: &i32| {
                *seen_clone.borrow_mut() = Some((*old, *new))
            }),
        );

        mapped.update(&"junk".to_string(), &"4".to_string()).unwrap();
        assert_eq!(*seen.borrow(), Some((4, 4)));
        assert!(mapped
            .update(&"1".to_string(), &"junk".to_string())
            .is_err());
    }
}
