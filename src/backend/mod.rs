//! Collaborator interfaces for decoding bundles and probing liveness
//!
//! The coordinator never decodes anything itself. It hands requests to a
//! [`BundleBackend`] and polls the returned [`BundleRequest`] from its tick.
//! Whether a decoded object is still in use is answered by a
//! [`LivenessProbe`].

pub mod mock;

use crate::identity::{AssetKey, AssetObject, AssetType, AuxiliaryObject, BundleId, WeakAsset};
use std::fmt::Debug;

/// One outstanding fetch/decode, polled once per tick
pub trait BundleRequest: Send {
    /// Whether the backend has finished this request
    fn is_done(&self) -> bool;

    /// The main object, once done; `None` means not found or failed
    fn asset(&self) -> Option<AssetObject>;

    /// Secondary objects instantiated with the main object
    fn auxiliary(&self) -> Vec<AuxiliaryObject> {
        Vec::new()
    }

    /// Failure description, once done
    fn error(&self) -> Option<String>;
}

/// Bundle fetch/decode backend
///
/// Every request that finishes with an object holds one load reference on
/// its bundle. [`BundleBackend::unload`] releases exactly one such reference.
/// A request that finishes without an object holds none.
pub trait BundleBackend: Send + Sync {
    /// Request type for this backend
    type Request: BundleRequest;

    /// Start loading one object
    fn load_async(&self, key: &AssetKey, asset_type: AssetType) -> Self::Request;

    /// Direct dependencies of a bundle
    fn dependencies(&self, bundle: &BundleId) -> Vec<BundleId>;

    /// Whether the bundle's bytes are still resident, so a reload skips the network
    fn is_resident(&self, bundle: &BundleId) -> bool;

    /// Release one load reference on a bundle
    fn unload(&self, bundle: &BundleId);

    /// Get the name of this backend (for debugging)
    fn backend_name(&self) -> &'static str {
        "unnamed"
    }
}

/// Answers whether a handed-out object is still reachable
pub trait LivenessProbe: Send + Sync + Debug {
    fn is_alive(&self, object: &WeakAsset) -> bool;
}

/// Probe that treats an object as alive while any strong reference exists
#[derive(Debug, Clone, Copy, Default)]
pub struct StrongCountProbe;

impl LivenessProbe for StrongCountProbe {
    fn is_alive(&self, object: &WeakAsset) -> bool {
        object.strong_count() > 0
    }
}

pub use mock::{MockBackend, MockRequest};
