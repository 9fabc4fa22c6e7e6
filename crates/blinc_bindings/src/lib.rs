//! Blinc Bindings
//!
//! Keeps observable values in sync across controls:
//!
//! - **Unidirectional bindings**: a target cell follows one or more sources
//!   and rejects direct writes while bound
//! - **Bidirectional bindings**: a set of cells where a change to any member
//!   reaches all the others, without feedback loops
//! - **Mapping sources**: bind cells of different value types through
//!   [`Mapper`]s or custom [`Updater`]s
//! - **Registry**: one authority per application tracking every binding by
//!   the identity of its target
//!
//! Everything here is single-threaded and meant to live on the UI thread.
//!
//! # Example
//!
//! ```rust
//! use blinc_bindings::{BindingRegistry, Mapper, Source};
//!
//! let registry = BindingRegistry::new();
//!
//! // Three integer cells kept equal
//! let i1 = registry.property(5i32);
//! let i2 = registry.property(10i32);
//! let i3 = registry.property(15i32);
//! registry
//!     .bind_bidirectional(&i1)
//!     .source(Source::of(i2.clone()))
//!     .source(Source::of(i3.clone()))
//!     .get()
//!     .unwrap()
//!     .invalidate()
//!     .unwrap();
//! assert_eq!((i1.get(), i2.get(), i3.get()), (15, 15, 15));
//!
//! // A label following a number
//! let label = registry.property(String::new());
//! let source = Source::mapping(i1.clone())
//!     .map_to_target(Mapper::of(|n: &i32| format!("{n} px")))
//!     .build()
//!     .unwrap();
//! registry.bind(&label).source(source).eager(true).get().unwrap();
//! assert_eq!(label.get(), "15 px");
//!
//! i2.set(20).unwrap();
//! assert_eq!(label.get(), "20 px");
//! ```

pub mod bidirectional;
pub mod binding;
pub mod cell;
pub mod config;
pub mod error;
pub mod kind;
pub mod mapper;
pub mod registry;
pub mod source;
pub mod target;
pub mod updater;

pub use bidirectional::{BidirectionalBinding, BidirectionalBuilder};
pub use binding::{Binding, BindingBuilder, BindingState};
pub use cell::{
    AnyObservable, AsCellId, CellId, Listener, ObservableValue, Property, ReadOnlyProperty,
    Subscription,
};
pub use config::RegistryConfig;
pub use error::{BindingError, ErrorKind, Result};
pub use kind::{SyncKind, Syncable};
pub use mapper::Mapper;
pub use registry::{BindingRegistry, RegistryStats};
pub use source::{MappingSource, Source};
pub use target::Target;
pub use updater::{MappedUpdater, Updater};
