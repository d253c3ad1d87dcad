//! Identity types shared by every layer
//!
//! A [`BundleId`] names one physical package, an [`AssetKey`] names one
//! object inside it. Decoded objects are handed around as type-erased
//! [`AssetObject`]s; the cache only ever keeps [`WeakAsset`]s.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

/// A decoded object owned by the host's object graph
pub type AssetObject = Arc<dyn Any + Send + Sync>;

/// Non-owning reference to a decoded object
pub type WeakAsset = Weak<dyn Any + Send + Sync>;

/// Normalized, lower-cased bundle path
///
/// Two equal identifiers always denote the same physical content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(Arc<str>);

impl BundleId {
    /// Normalize and wrap a bundle path
    ///
    /// Empty, `.` and `..` segments are dropped, so an identifier is always
    /// a relative path that stays below whatever directory it is joined to.
    pub fn new(path: impl AsRef<str>) -> Self {
        let lowered = path.as_ref().trim().replace('\\', "/").to_lowercase();
        let normalized = lowered
            .split('/')
            .filter(|segment| !matches!(*segment, "" | "." | ".."))
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized.into())
    }

    /// The normalized path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment up to its first `.`
    ///
    /// `audio/click.hd` has the base name `click`.
    pub fn base_name(&self) -> &str {
        let segment = self.0.rsplit('/').next().unwrap_or(&self.0);
        segment.split('.').next().unwrap_or(segment)
    }
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({:?})", &*self.0)
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BundleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BundleId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Deduplication identity: one object inside one bundle
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AssetKey {
    pub bundle: BundleId,
    pub object: String,
}

impl AssetKey {
    /// Create a key; an empty object name falls back to the bundle's base name
    pub fn new(bundle: impl Into<BundleId>, object: impl Into<String>) -> Self {
        let bundle = bundle.into();
        let mut object = object.into();
        if object.is_empty() {
            object = bundle.base_name().to_string();
        }
        Self { bundle, object }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bundle, self.object)
    }
}

/// Runtime description of the type a caller expects back
#[derive(Clone, Copy, Debug)]
pub struct AssetType {
    id: TypeId,
    name: &'static str,
}

impl AssetType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether a decoded object is of this type
    pub fn matches(&self, object: &AssetObject) -> bool {
        Any::type_id(&**object) == self.id
    }
}

impl PartialEq for AssetType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AssetType {}

/// Secondary object instantiated alongside a main object
///
/// `origin` is the bundle the object was decoded from, which lets the cache
/// tell the entry's own content apart from content shared through
/// dependencies.
#[derive(Clone)]
pub struct AuxiliaryObject {
    pub origin: BundleId,
    pub object: AssetObject,
}

impl fmt::Debug for AuxiliaryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxiliaryObject")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
