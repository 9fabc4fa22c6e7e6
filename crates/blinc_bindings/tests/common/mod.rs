//! Shared setup for integration tests

use blinc_bindings::{BindingRegistry, RegistryConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-friendly subscriber once; `RUST_LOG` overrides the filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blinc_bindings=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A registry with every propagation traced
pub fn registry() -> BindingRegistry {
    init_tracing();
    BindingRegistry::with_config(RegistryConfig::testing()).expect("testing config is valid")
}
