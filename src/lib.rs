//! archetype_bundle - On-demand bundle loading and caching
//!
//! # Features
//! - Category-based name resolution to bundle identifiers
//! - Bounded, stall-aware downloads driven by a content manifest
//! - Deduplicated async loads over a weak, liveness-checked cache
//! - Preload batches with a single completion signal
//! - Typed provider façade with fallback chains
//!
//! Nothing here spawns threads. The host calls `tick()` on the scheduler,
//! the coordinator (or a provider) and the preload aggregator once per frame.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use archetype_bundle::{AssetProvider, LoadingCoordinator, MockBackend, NameResolver, ResolverEntry};
//!
//! let backend = MockBackend::new();
//! backend.insert("audio/click", "click", 440u32);
//!
//! let resolver = Arc::new(NameResolver::new(vec![ResolverEntry::new("se", "audio/")]));
//! let provider = AssetProvider::new("main", resolver, Arc::new(LoadingCoordinator::new(backend)));
//!
//! provider.load_async::<u32, _>("se", "click", |clip| assert_eq!(clip.as_deref(), Some(&440)));
//! provider.tick();
//! provider.tick();
//! ```

// Core modules
pub mod backend;
pub mod cache;
pub mod download;
pub mod preload;
pub mod provider;
pub mod resolver;

// Support modules
pub mod config;
pub mod host;
pub mod identity;
pub mod operation;

// Error types
mod error;
pub use error::{BundleError, LoadError, Result};

// Re-export identity types
pub use identity::{AssetKey, AssetObject, AssetType, AuxiliaryObject, BundleId, WeakAsset};

// Re-export resolver types
pub use resolver::{NameResolver, ResolverEntry};

// Re-export backend types
pub use backend::{BundleBackend, BundleRequest, LivenessProbe, MockBackend, StrongCountProbe};

// Re-export coordinator types
pub use cache::metrics::{LoaderMetrics, LoaderMetricsHandle};
pub use cache::{CoordinatorConfig, DependencyClosure, LoadingCoordinator};
pub use operation::{LoadRequest, LoadResult, LoadState, LoadingOperation};

// Re-export download types
pub use download::{
    ContentHash, DownloadScheduler, FsTransferBackend, Manifest, MockTransferBackend,
    SchedulerConfig, TransferBackend, TransferHandle, UpdateEvent, UpdateProgress,
};

// Re-export preload and provider types
pub use preload::{PreloadAggregator, PreloadBatch};
pub use provider::{AssetProvider, AssetQuery, AssetSource, ProviderRegistry};

// Re-export host and config types
pub use config::BundleConfig;
pub use host::{HostHooks, LoadingPriority, NullHost, RecordingHost};

// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
