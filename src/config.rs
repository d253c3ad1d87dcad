//! Configuration loaded from TOML
//!
//! ```toml
//! [[categories]]
//! category = "se"
//! directory = "audio/"
//! single_use = true
//!
//! [scheduler]
//! max_concurrent = 5
//! root_url = "https://cdn.example/bundles"
//!
//! [coordinator]
//! sweep_interval_secs = 5.0
//! ```
//!
//! Every section is optional and falls back to its defaults.

use crate::cache::CoordinatorConfig;
use crate::download::SchedulerConfig;
use crate::error::Result;
use crate::resolver::{NameResolver, ResolverEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Category prefixes, first registration of a name wins
    pub categories: Vec<ResolverEntry>,
    pub scheduler: SchedulerConfig,
    pub coordinator: CoordinatorConfig,
}

impl BundleConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        log::debug!(
            "Loaded bundle config from {} ({} categories)",
            path.display(),
            config.categories.len()
        );
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Build a resolver from the configured categories
    pub fn resolver(&self) -> NameResolver {
        NameResolver::new(self.categories.iter().cloned())
    }
}
