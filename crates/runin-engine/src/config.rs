//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use runin_document::IdentityFields;
use runin_types::{Result, RuninError};

/// Tunables shared by the differ, merger, validator and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Field names that identify list elements, in priority order.
    pub identity_fields: Vec<String>,
    /// Concrete fields kept next to identity fields when a sub-tree survives
    /// differencing, so templates stay recognisable (`type`).
    pub retained_fields: Vec<String>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity_fields: vec!["identifier".into(), "name".into()],
            retained_fields: vec!["type".into()],
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML (or JSON) file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn identity(&self) -> IdentityFields {
        IdentityFields::new(self.identity_fields.iter().cloned())
    }

    fn validate(&self) -> Result<()> {
        if self.identity_fields.is_empty() {
            return Err(RuninError::Config(
                "identity_fields must name at least one field".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(RuninError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }
}
