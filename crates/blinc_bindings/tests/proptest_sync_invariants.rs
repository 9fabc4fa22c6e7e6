//! Property-based invariants for synchronization.
//!
//! 1. Any write to any member of a bidirectional set reaches every member
//!    before the write returns.
//! 2. A unidirectional target always holds the value of the source that
//!    changed last.
//! 3. Bound targets reject every direct write, whatever the value.

mod common;

use blinc_bindings::{BindingError, Source};
use proptest::prelude::*;

fn writes_strategy(members: usize) -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0..members, any::<i64>()), 1..24)
}

proptest! {
    #[test]
    fn bidirectional_writes_converge(
        members in 2usize..6,
        writes in writes_strategy(6),
    ) {
        let registry = common::registry();
        let cells: Vec<_> = (0..members).map(|_| registry.property(0i64)).collect();
        registry
            .bind_bidirectional(&cells[0])
            .sources(cells[1..].iter().cloned().map(Source::of))
            .get()
            .unwrap();

        for (index, value) in writes {
            let cell = &cells[index % members];
            cell.set(value).unwrap();
            for other in &cells {
                prop_assert_eq!(other.get(), value);
            }
        }
    }

    #[test]
    fn unidirectional_target_follows_last_source(
        writes in prop::collection::vec((0usize..3, -1000i32..1000), 1..24),
    ) {
        let registry = common::registry();
        let sources: Vec<_> = (0..3).map(|_| registry.property(0i32)).collect();
        let target = registry.property(0i32);
        registry
            .bind(&target)
            .sources(sources.iter().cloned().map(Source::of))
            .get()
            .unwrap();

        for (index, value) in writes {
            let before = sources[index].get();
            sources[index].set(value).unwrap();
            if before != value {
                prop_assert_eq!(target.get(), value);
            }
        }
    }

    #[test]
    fn bound_target_rejects_direct_writes(value in any::<i32>()) {
        let registry = common::registry();
        let source = registry.property(0i32);
        let target = registry.property(0i32);
        registry.bind(&target).source(Source::of(source)).get().unwrap();

        prop_assert_eq!(target.set(value), Err(BindingError::BoundValue(target.id())));
        prop_assert_eq!(target.get(), 0);
    }
}
