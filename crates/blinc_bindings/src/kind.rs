//! Synchronization kinds
//!
//! Every value type that can live in a [`Property`](crate::Property) declares
//! which kind of synchronization it takes part in. The kind is fixed at compile
//! time through [`Syncable::KIND`], so the engine never inspects types at runtime.

/// The finite set of value families the engine knows how to synchronize
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncKind {
    /// Integers and floats
    Number,
    /// Strings
    Text,
    /// Booleans
    Boolean,
    /// Anything else (structs, options, enums)
    Object,
}

impl SyncKind {
    pub fn name(self) -> &'static str {
        match self {
            SyncKind::Number => "number",
            SyncKind::Text => "text",
            SyncKind::Boolean => "boolean",
            SyncKind::Object => "object",
        }
    }
}

/// A value type that can be held by a cell and copied across a binding
pub trait Syncable: Clone + 'static {
    /// Which synchronization family this type belongs to
    const KIND: SyncKind;

    /// Equality used to suppress no-op writes
    ///
    /// A write whose value is the same as the current one does not notify
    /// listeners, which is what lets bidirectional propagation terminate.
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! impl_syncable_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Syncable for $ty {
                const KIND: SyncKind = SyncKind::Number;

                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

macro_rules! impl_syncable_float {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Syncable for $ty {
                const KIND: SyncKind = SyncKind::Number;

                // NaN must compare equal to itself or a NaN write would bounce forever
                fn same_value(&self, other: &Self) -> bool {
                    self == other || (self.is_nan() && other.is_nan())
                }
            }
        )*
    };
}

impl_syncable_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
impl_syncable_float!(f32, f64);

impl Syncable for String {
    const KIND: SyncKind = SyncKind::Text;

    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl Syncable for bool {
    const KIND: SyncKind = SyncKind::Boolean;

    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl<T: Syncable> Syncable for Option<T> {
    const KIND: SyncKind = SyncKind::Object;

    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

/// Implement [`Syncable`] as [`SyncKind::Object`] for `Clone + PartialEq` types
///
/// ```
/// use blinc_bindings::impl_syncable_object;
///
/// #[derive(Clone, PartialEq, Debug)]
/// struct Size {
///     width: f64,
///     height: f64,
/// }
///
/// impl_syncable_object!(Size);
/// ```
#[macro_export]
macro_rules! impl_syncable_object {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::Syncable for $ty {
                const KIND: $crate::SyncKind = $crate::SyncKind::Object;

                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}
