//! Registry configuration presets.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BindingError, Result};

/// Configuration for a [`BindingRegistry`](crate::BindingRegistry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Whether builders seed the target right after activation.
    pub eager_by_default: bool,
    /// Maximum nested fan-out depth inside one bidirectional binding.
    pub max_propagation_depth: usize,
    /// Emit a trace event for every individual propagation.
    pub trace_propagation: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RegistryConfig {
    /// Standard configuration: lazy bindings, quiet propagation.
    pub fn standard() -> Self {
        Self {
            eager_by_default: false,
            max_propagation_depth: 32,
            trace_propagation: false,
        }
    }

    /// Testing configuration: tight depth limit, every propagation traced.
    pub fn testing() -> Self {
        Self {
            eager_by_default: false,
            max_propagation_depth: 8,
            trace_propagation: true,
        }
    }

    /// Parse a TOML document, e.g.
    ///
    /// ```toml
    /// eager_by_default = true
    /// max_propagation_depth = 16
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| BindingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| BindingError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| BindingError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_propagation_depth < 2 {
            return Err(BindingError::Config(format!(
                "max_propagation_depth must be at least 2, got {}",
                self.max_propagation_depth
            )));
        }
        Ok(())
    }
}
