//! Asset provider façade and provider registry
//!
//! An [`AssetProvider`] turns `(category, name, variant)` queries into
//! typed objects: it resolves the name, loads through its coordinator and,
//! when the result is missing or of the wrong type, asks each fallback
//! source in turn. Providers are themselves [`AssetSource`]s, so chains are
//! built by registering providers in a [`ProviderRegistry`] and handing the
//! chain to the primary provider.

mod registry;

pub use registry::ProviderRegistry;

use crate::backend::BundleBackend;
use crate::cache::LoadingCoordinator;
use crate::error::Result;
use crate::identity::{AssetKey, AssetObject, AssetType, BundleId};
use crate::operation::LoadRequest;
use crate::preload::{PreloadAggregator, PreloadBatch};
use crate::resolver::NameResolver;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Callback receiving an untyped answer; `None` means not found
pub type SourceCallback = Box<dyn FnOnce(Option<AssetObject>) + Send>;

/// A logical asset name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AssetQuery {
    pub category: String,
    pub name: String,
    pub variant: String,
}

impl AssetQuery {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            variant: String::new(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }
}

impl fmt::Display for AssetQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)?;
        if !self.variant.is_empty() {
            write!(f, ".{}", self.variant)?;
        }
        Ok(())
    }
}

/// Anything that can answer an asset query
pub trait AssetSource: Send + Sync {
    /// Name used for registry lookups and logging
    fn name(&self) -> &str;

    /// Answer `query` with an object of `asset_type`, or `None`
    ///
    /// `on_done` is called exactly once, possibly before this returns.
    fn load_untyped(&self, query: &AssetQuery, asset_type: AssetType, on_done: SourceCallback);
}

/// Façade over a resolver, a coordinator and a fallback chain
pub struct AssetProvider<B: BundleBackend> {
    name: String,
    resolver: Arc<NameResolver>,
    coordinator: Arc<LoadingCoordinator<B>>,
    preloads: PreloadAggregator,
    fallbacks: Arc<[Arc<dyn AssetSource>]>,
}

impl<B: BundleBackend + 'static> AssetProvider<B> {
    pub fn new(
        name: impl Into<String>,
        resolver: Arc<NameResolver>,
        coordinator: Arc<LoadingCoordinator<B>>,
    ) -> Self {
        Self {
            name: name.into(),
            resolver,
            coordinator,
            preloads: PreloadAggregator::new(),
            fallbacks: Arc::from(Vec::new()),
        }
    }

    /// Sources tried in order when this provider cannot answer
    pub fn with_fallbacks(mut self, fallbacks: Vec<Arc<dyn AssetSource>>) -> Self {
        self.fallbacks = Arc::from(fallbacks);
        self
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    pub fn coordinator(&self) -> &Arc<LoadingCoordinator<B>> {
        &self.coordinator
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    /// Resolve a query to the key the coordinator caches it under
    pub fn key_for(&self, query: &AssetQuery) -> Result<AssetKey> {
        let bundle = self
            .resolver
            .resolve(&query.category, &query.name, &query.variant)?;
        Ok(AssetKey::new(bundle, query.name.clone()))
    }

    /// Load `name` from `category` as `T`; `on_done(None)` means not found
    pub fn load_async<T, F>(&self, category: &str, name: &str, on_done: F)
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<Arc<T>>) + Send + 'static,
    {
        self.load_variant_async(category, name, "", on_done);
    }

    pub fn load_variant_async<T, F>(&self, category: &str, name: &str, variant: &str, on_done: F)
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<Arc<T>>) + Send + 'static,
    {
        let query = AssetQuery::new(category, name).with_variant(variant);
        self.load_untyped(
            &query,
            AssetType::of::<T>(),
            Box::new(move |object: Option<AssetObject>| on_done(object.and_then(|o| o.downcast::<T>().ok()))),
        );
    }

    /// Start loading every query and join them into one batch
    pub fn preload<I>(&self, items: I) -> Arc<PreloadBatch>
    where
        I: IntoIterator<Item = (AssetQuery, AssetType)>,
    {
        let requests: Vec<LoadRequest> = items
            .into_iter()
            .filter_map(|(query, asset_type)| match self.key_for(&query) {
                Ok(key) => Some(LoadRequest::new(key, asset_type)),
                Err(e) => {
                    log::warn!("Skipping preload of {query}: {e}");
                    None
                }
            })
            .collect();
        self.preloads.preload(&self.coordinator, requests)
    }

    /// Advance the coordinator, then poll preload batches
    pub fn tick(&self) {
        self.coordinator.tick();
        self.preloads.tick();
    }

    pub fn sweep(&self) -> usize {
        self.coordinator.sweep()
    }

    /// Drop the cached entry for a query
    pub fn unload_asset(&self, query: &AssetQuery) -> bool {
        match self.key_for(query) {
            Ok(key) => self.coordinator.unload_asset(&key),
            Err(e) => {
                log::warn!("Cannot unload {query}: {e}");
                false
            }
        }
    }

    pub fn unload_bundle(&self, bundle: &BundleId) -> usize {
        self.coordinator.unload_bundle(bundle)
    }
}

impl<B: BundleBackend + 'static> AssetSource for AssetProvider<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_untyped(&self, query: &AssetQuery, asset_type: AssetType, on_done: SourceCallback) {
        let key = match self.key_for(query) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("[{}] cannot resolve {query}: {e}", self.name);
                on_done(None);
                return;
            }
        };

        let single_use = self
            .resolver
            .entry(&query.category)
            .is_some_and(|entry| entry.single_use);
        let coordinator = Arc::clone(&self.coordinator);
        let fallbacks = Arc::clone(&self.fallbacks);
        let provider = self.name.clone();
        let query = query.clone();

        let op = self.coordinator.load(LoadRequest::new(key.clone(), asset_type));
        op.on_complete(move |result| match result {
            Ok(object) if asset_type.matches(object) => {
                let object = Arc::clone(object);
                if single_use {
                    coordinator.unload_asset(&key);
                }
                on_done(Some(object));
            }
            Ok(_) => {
                log::warn!(
                    "[{provider}] {query} is not a {}; trying fallbacks",
                    asset_type.name()
                );
                cascade(fallbacks, 0, query, asset_type, true, on_done);
            }
            Err(e) => {
                log::debug!("[{provider}] {e}; trying fallbacks");
                cascade(fallbacks, 0, query, asset_type, false, on_done);
            }
        });
    }
}

/// Ask `fallbacks[index..]` one at a time until one answers with the right type
fn cascade(
    fallbacks: Arc<[Arc<dyn AssetSource>]>,
    index: usize,
    query: AssetQuery,
    asset_type: AssetType,
    mismatched: bool,
    on_done: SourceCallback,
) {
    let Some(source) = fallbacks.get(index).cloned() else {
        if mismatched {
            log::error!(
                "{query} exists but is not a {} and no fallback supplied one",
                asset_type.name()
            );
        } else {
            log::debug!("{query} not found in any provider");
        }
        on_done(None);
        return;
    };

    log::debug!("Trying fallback '{}' for {query}", source.name());
    let next_query = query.clone();
    source.load_untyped(
        &query,
        asset_type,
        Box::new(move |object: Option<AssetObject>| match object {
            Some(object) if asset_type.matches(&object) => on_done(Some(object)),
            Some(_) => cascade(fallbacks, index + 1, next_query, asset_type, true, on_done),
            None => cascade(fallbacks, index + 1, next_query, asset_type, mismatched, on_done),
        }),
    );
}
