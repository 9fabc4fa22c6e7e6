//! Value mappers
//!
//! A [`Mapper`] converts values between the types of two synchronized cells.
//! It is pure: no side effects, no mutable state. When the conversion can fail
//! (parsing text, for instance) a fallback can supply the value instead.

use std::fmt;
use std::rc::Rc;

use crate::error::{BindingError, Result};

/// A pure `S -> T` conversion with an optional fallback
pub struct Mapper<S, T> {
    map: Rc<dyn Fn(&S) -> Result<T>>,
    fallback: Option<Rc<dyn Fn() -> T>>,
}

impl<S, T> Clone for Mapper<S, T> {
    fn clone(&self) -> Self {
        Self {
            map: Rc::clone(&self.map),
            fallback: self.fallback.clone(),
        }
    }
}

impl<S: 'static, T: 'static> Mapper<S, T> {
    /// A mapper that always succeeds
    pub fn of<F>(f: F) -> Self
    where
        F: Fn(&S) -> T + 'static,
    {
        Self {
            map: Rc::new(move |value| Ok(f(value))),
            fallback: None,
        }
    }

    /// A mapper that may fail, e.g. `|s: &String| s.parse::<f64>()`
    pub fn try_of<F, E>(f: F) -> Self
    where
        F: Fn(&S) -> std::result::Result<T, E> + 'static,
        E: fmt::Display,
    {
        Self {
            map: Rc::new(move |value| f(value).map_err(|e| BindingError::Mapping(e.to_string()))),
            fallback: None,
        }
    }

    /// Supply a value when the primary conversion fails
    pub fn or_else<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        self.fallback = Some(Rc::new(fallback));
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Convert a value
    pub fn apply(&self, value: &S) -> Result<T> {
        match (self.map)(value) {
            Ok(mapped) => Ok(mapped),
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(error = %err, "mapping failed, using fallback");
                    Ok(fallback())
                }
                None => Err(err),
            },
        }
    }
}

impl<T: Clone + 'static> Mapper<T, T> {
    pub fn identity() -> Self {
        Self::of(T::clone)
    }
}

impl<S, T> fmt::Debug for Mapper<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
