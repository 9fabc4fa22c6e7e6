//! Unidirectional binding behaviour across the public API

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use blinc_bindings::{
    impl_syncable_object, BindingError, BindingRegistry, BindingState, ErrorKind, Mapper,
    RegistryConfig, Source, Updater,
};

#[derive(Clone, Debug, PartialEq)]
struct Size {
    width: f64,
    height: f64,
}

impl_syncable_object!(Size);

// =============================================================================
// OVERRIDE
// =============================================================================

#[test]
fn test_rebinding_target_disposes_previous() {
    let registry = common::registry();
    let a = registry.property(1i32);
    let b = registry.property(2i32);
    let target = registry.property(0i32);

    let first = registry.bind(&target).source(Source::of(a.clone())).get().unwrap();
    let second = registry.bind(&target).source(Source::of(b.clone())).get().unwrap();

    assert_eq!(first.state(), BindingState::Disposed);
    assert_eq!(second.state(), BindingState::Bound);
    assert_eq!(registry.size(), 1);
    assert_eq!(a.listener_count(), 0);

    a.set(100).unwrap();
    assert_eq!(target.get(), 0);
    b.set(200).unwrap();
    assert_eq!(target.get(), 200);
}

#[test]
fn test_rebinding_during_propagation_is_rejected() {
    let registry = common::registry();
    let a = registry.property(1i32);
    let other = registry.property(7i32);
    let target = registry.property(0i32);
    let outcome: Rc<RefCell<Option<blinc_bindings::Result<()>>>> = Rc::new(RefCell::new(None));

    let registry_clone = registry.clone();
    let target_clone = target.clone();
    let other_clone = other.clone();
    let outcome_clone = Rc::clone(&outcome);
    let source = Source::mapping(a.clone())
        .target_updater(Updater::new(move |_, new: &i32| {
            let attempt = registry_clone
                .bind(&target_clone)
                .source(Source::of(other_clone.clone()))
                .get();
            *outcome_clone.borrow_mut() = Some(attempt.map(|_| ()));
            target_clone.set(*new)
        }))
        .build()
        .unwrap();
    let binding = registry.bind(&target).source(source).get().unwrap();

    a.set(2).unwrap();
    assert!(matches!(
        outcome.borrow().clone(),
        Some(Err(BindingError::IllegalArgument(_)))
    ));
    assert_eq!(target.get(), 2);
    assert_eq!(binding.state(), BindingState::Bound);
}

// =============================================================================
// LAZINESS AND WRITE REJECTION
// =============================================================================

#[test]
fn test_target_untouched_until_source_changes() {
    let registry = common::registry();
    let source = registry.property(String::from("ready"));
    let target = registry.property(String::from("initial"));

    let binding = registry.bind(&target).source(Source::of(source.clone())).get().unwrap();
    assert_eq!(target.get(), "initial");

    binding.invalidate().unwrap();
    assert_eq!(target.get(), "ready");
}

#[test]
fn test_bound_target_rejects_writes_until_unbound() {
    let registry = common::registry();
    let source = registry.property(false);
    let target = registry.property(false);

    let binding = registry.bind(&target).source(Source::of(source.clone())).get().unwrap();
    assert!(target.is_bound());

    let err = target.set(true).unwrap_err();
    assert_eq!(err, BindingError::BoundValue(target.id()));
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    binding.unbind();
    assert!(!target.is_bound());
    target.set(true).unwrap();
    assert!(!source.get());

    source.set(true).unwrap();
    source.set(false).unwrap();
    assert!(target.get());
}

#[test]
fn test_target_listener_cannot_write_bound_target() {
    let registry = common::registry();
    let source = registry.property(0i32);
    let target = registry.property(0i32);
    registry.bind(&target).source(Source::of(source.clone())).get().unwrap();

    let attempt: Rc<RefCell<Option<blinc_bindings::Result<()>>>> = Rc::new(RefCell::new(None));
    let attempt_clone = Rc::clone(&attempt);
    let target_clone = target.clone();
    let _sub = target.subscribe(move |_, new| {
        if *new == 5 {
            *attempt_clone.borrow_mut() = Some(target_clone.set(999));
        }
    });

    source.set(5).unwrap();
    assert_eq!(
        attempt.borrow().clone(),
        Some(Err(BindingError::BoundValue(target.id())))
    );
    assert_eq!(target.get(), 5);
    assert_eq!(registry.stats().ignored_scopes, 0);
}

#[test]
fn test_custom_updater_window_not_inherited_by_listeners() {
    let registry = common::registry();
    let source = registry.property(0i32);
    let target = registry.property(0i32);

    let target_clone = target.clone();
    let def = Source::mapping(source.clone())
        .target_updater(Updater::new(move |_, new: &i32| target_clone.set(new * 10)))
        .build()
        .unwrap();
    registry.bind(&target).source(def).get().unwrap();

    let rejected = Rc::new(RefCell::new(false));
    let rejected_clone = Rc::clone(&rejected);
    let target_clone = target.clone();
    let _sub = target.subscribe(move |_, _| {
        *rejected_clone.borrow_mut() = target_clone.set(-1).is_err();
    });

    source.set(3).unwrap();
    assert!(*rejected.borrow());
    assert_eq!(target.get(), 30);
}

#[test]
fn test_registry_unbind() {
    let registry = common::registry();
    let source = registry.property(1u8);
    let target = registry.property(0u8);
    registry.bind(&target).source(Source::of(source.clone())).get().unwrap();

    registry.unbind(&target);
    assert_eq!(registry.binding_state(&target), Some(BindingState::Unbound));
    assert!(target.set(9).is_ok());
}

// =============================================================================
// DISPOSAL
// =============================================================================

#[test]
fn test_dispose_twice() {
    let registry = common::registry();
    let source = registry.property(1i32);
    let target = registry.property(0i32);
    let binding = registry.bind(&target).source(Source::of(source.clone())).get().unwrap();

    binding.dispose();
    assert_eq!(binding.state(), BindingState::Disposed);
    binding.dispose();
    assert_eq!(binding.state(), BindingState::Disposed);

    assert!(registry.is_empty());
    assert_eq!(source.listener_count(), 0);
    assert!(target.set(5).is_ok());
}

#[test]
fn test_registry_dispose_tears_everything_down() {
    let registry = common::registry();
    let a = registry.property(1i32);
    let b = registry.property(2i32);
    let c = registry.property(3i32);
    let d = registry.property(4i32);

    let one_way = registry.bind(&b).source(Source::of(a.clone())).get().unwrap();
    let two_way = registry.bind_bidirectional(&c).source(Source::of(d.clone())).get().unwrap();

    registry.dispose();
    assert!(registry.is_empty());
    assert!(registry.bi_is_empty());
    assert_eq!(one_way.state(), BindingState::Disposed);
    assert_eq!(two_way.state(), BindingState::Disposed);

    a.set(10).unwrap();
    c.set(30).unwrap();
    assert_eq!((b.get(), d.get()), (2, 4));
}

#[test]
fn test_dispose_from_inside_propagation() {
    let registry = common::registry();
    let source = registry.property(0i32);
    let target = registry.property(0i32);
    let slot: Rc<RefCell<Option<blinc_bindings::Binding<i32>>>> = Rc::new(RefCell::new(None));

    let slot_clone = Rc::clone(&slot);
    let target_clone = target.clone();
    let def = Source::mapping(source.clone())
        .target_updater(Updater::new(move |_, new: &i32| {
            target_clone.set(*new)?;
            if *new >= 2 {
                if let Some(binding) = slot_clone.borrow().as_ref() {
                    binding.dispose();
                }
            }
            Ok(())
        }))
        .build()
        .unwrap();
    let binding = registry.bind(&target).source(def).get().unwrap();
    *slot.borrow_mut() = Some(binding.clone());

    source.set(1).unwrap();
    source.set(2).unwrap();
    assert_eq!(binding.state(), BindingState::Disposed);
    assert_eq!(target.get(), 2);

    source.set(3).unwrap();
    assert_eq!(target.get(), 2);
}

// =============================================================================
// MAPPING
// =============================================================================

#[test]
fn test_invalidating_cell_recomputes_target() {
    let registry = common::registry();
    let size = registry.property(Size {
        width: 10.0,
        height: 4.0,
    });
    let scale = registry.property(2.0f64);
    let area = registry.property(0.0f64);

    let area_clone = area.clone();
    let scale_clone = scale.clone();
    let source = Source::<Size, f64>::mapping(size.clone())
        .target_updater(Updater::new(move |_, size: &Size| {
            area_clone.set(size.width * size.height * scale_clone.get())
        }))
        .invalidating(scale.clone())
        .build()
        .unwrap();
    assert_eq!(source.invalidating_count(), 1);

    registry.bind(&area).source(source).eager(true).get().unwrap();
    assert_eq!(area.get(), 80.0);

    scale.set(3.0).unwrap();
    assert_eq!(area.get(), 120.0);

    size.set(Size {
        width: 1.0,
        height: 1.0,
    })
    .unwrap();
    assert_eq!(area.get(), 3.0);
}

#[test]
fn test_object_to_text_mapping() {
    let registry = common::registry();
    let size = registry.property(Size {
        width: 640.0,
        height: 480.0,
    });
    let label = registry.property(String::new());

    let source = Source::mapping(size.clone())
        .map_to_target(Mapper::of(|s: &Size| format!("{}x{}", s.width, s.height)))
        .build()
        .unwrap();
    registry.bind(&label).source(source).eager(true).get().unwrap();
    assert_eq!(label.get(), "640x480");

    size.update(|s| Size {
        width: s.width * 2.0,
        ..s.clone()
    })
    .unwrap();
    assert_eq!(label.get(), "1280x480");
}

#[test]
fn test_mapper_fallback_absorbs_failure() {
    let registry = common::registry();
    let text = registry.property(String::from("3"));
    let number = registry.property(0i64);

    let source = Source::mapping(text.clone())
        .map_to_target(Mapper::try_of(|s: &String| s.trim().parse::<i64>()).or_else(|| -1))
        .build()
        .unwrap();
    registry.bind(&number).source(source).eager(true).get().unwrap();
    assert_eq!(number.get(), 3);

    text.set("not a number".into()).unwrap();
    assert_eq!(number.get(), -1);
}

#[test]
fn test_mapping_failure_leaves_source_changed() {
    let registry = common::registry();
    let text = registry.property(String::from("3"));
    let number = registry.property(0i64);

    let source = Source::mapping(text.clone())
        .map_to_target(Mapper::try_of(|s: &String| s.parse::<i64>()))
        .build()
        .unwrap();
    registry.bind(&number).source(source).get().unwrap();

    let err = text.set("x".into()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
    assert_eq!(text.get(), "x");
    assert_eq!(number.get(), 0);
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[test]
fn test_eager_by_default_from_toml() {
    common::init_tracing();
    let config = RegistryConfig::from_toml_str("eager_by_default = true").unwrap();
    let registry = BindingRegistry::with_config(config).unwrap();
    let source = registry.property(5i32);
    let target = registry.property(0i32);

    let binding = registry.bind(&target).source(Source::of(source)).get().unwrap();
    assert!(binding.is_eager());
    assert_eq!(target.get(), 5);
}

#[test]
fn test_registries_are_isolated() {
    let first = common::registry();
    let second = common::registry();
    let a = first.property(1i32);
    let b = first.property(0i32);
    first.bind(&b).source(Source::of(a)).get().unwrap();

    assert!(first.is_bound(&b));
    assert!(!second.is_bound(&b));
    assert!(second.is_empty());
}
