use super::AssetSource;
use crate::error::{BundleError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Named asset sources, looked up when building fallback chains
#[derive(Default)]
pub struct ProviderRegistry {
    sources: HashMap<String, Arc<dyn AssetSource>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name
    pub fn register(&mut self, source: Arc<dyn AssetSource>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(BundleError::DuplicateProvider(name));
        }
        log::debug!("Registered asset source '{name}'");
        self.order.push(name.clone());
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AssetSource>> {
        self.sources.get(name).cloned()
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up each name in order, failing on the first unknown one
    pub fn chain(&self, names: &[&str]) -> Result<Vec<Arc<dyn AssetSource>>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| BundleError::UnknownProvider((*name).to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("sources", &self.order)
            .finish()
    }
}
