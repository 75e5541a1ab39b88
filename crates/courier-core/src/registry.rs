//! Target registry: submission target name -> [`TargetContract`].
//!
//! The registry is read-only at runtime. It is loaded from a TOML document,
//! every contract is validated at load time, and lookups hand out owned
//! copies so that no intent shares state with the registry.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::contract::TargetContract;
use crate::error::{CourierError, Result};

/// Read-only collection of target contracts.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<String, TargetContract>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    targets: BTreeMap<String, TargetContract>,
}

impl TargetRegistry {
    /// Build a registry from already-constructed contracts.
    pub fn new(targets: impl IntoIterator<Item = (String, TargetContract)>) -> Result<Self> {
        let targets: BTreeMap<String, TargetContract> = targets.into_iter().collect();
        for (name, contract) in &targets {
            if name.trim().is_empty() {
                return Err(CourierError::registry("target names cannot be empty"));
            }
            contract.validate(name)?;
        }
        Ok(Self { targets })
    }

    /// Parse a registry from TOML.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(source)?;
        Self::new(file.targets)
    }

    /// Load a registry file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CourierError::registry(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Resolve a target, returning a deep copy of its contract.
    pub fn resolve(&self, target: &str) -> Result<TargetContract> {
        self.targets
            .get(target)
            .cloned()
            .ok_or_else(|| CourierError::UnknownSubmissionTarget {
                target: target.to_string(),
            })
    }

    pub fn contains(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
