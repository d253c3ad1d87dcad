//! Bundle manifests and the persisted record of cached content

use crate::error::Result;
use crate::identity::BundleId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Opaque content hash, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl AsRef<str>) -> Self {
        Self(hash.as_ref().trim().to_ascii_lowercase())
    }

    /// xxh3 of `bytes`, as 16 hex digits
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContentHash {
    fn from(hash: String) -> Self {
        Self::new(hash)
    }
}

impl From<&str> for ContentHash {
    fn from(hash: &str) -> Self {
        Self::new(hash)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bundle → expected content hash
///
/// Stored on disk as TOML:
///
/// ```toml
/// [bundles]
/// "audio/click" = "9f3c0a11d2e4b7a8"
/// "ui/title" = "00aa11bb22cc33dd"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    bundles: BTreeMap<String, ContentHash>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: Manifest = toml::from_str(text)?;
        Ok(raw.into_entries().collect())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn insert(&mut self, bundle: impl Into<BundleId>, hash: impl Into<ContentHash>) {
        let bundle = bundle.into();
        self.bundles.insert(bundle.as_str().to_string(), hash.into());
    }

    pub fn get(&self, bundle: &BundleId) -> Option<&ContentHash> {
        self.bundles.get(bundle.as_str())
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Entries in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (BundleId, &ContentHash)> {
        self.bundles
            .iter()
            .map(|(bundle, hash)| (BundleId::new(bundle), hash))
    }

    fn into_entries(self) -> impl Iterator<Item = (BundleId, ContentHash)> {
        self.bundles
            .into_iter()
            .map(|(bundle, hash)| (BundleId::new(bundle), hash))
    }
}

impl FromIterator<(BundleId, ContentHash)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (BundleId, ContentHash)>>(iter: I) -> Self {
        let mut manifest = Manifest::new();
        for (bundle, hash) in iter {
            manifest.insert(bundle, hash);
        }
        manifest
    }
}

/// What a local cache directory currently holds, persisted next to the files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default)]
    cached: BTreeMap<String, ContentHash>,
}

impl CacheManifest {
    /// Load from `path`; a missing file is an empty cache
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }

    pub fn record(&mut self, bundle: &BundleId, hash: ContentHash) {
        self.cached.insert(bundle.as_str().to_string(), hash);
    }

    pub fn hash_of(&self, bundle: &BundleId) -> Option<&ContentHash> {
        self.cached.get(bundle.as_str())
    }

    pub fn is_current(&self, bundle: &BundleId, hash: &ContentHash) -> bool {
        self.hash_of(bundle) == Some(hash)
    }

    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_toml_normalizes() {
        let manifest = Manifest::from_toml_str(
            r#"
            [bundles]
            "UI/Title" = "00AA11BB22CC33DD"
            "audio/click" = "9f3c0a11d2e4b7a8"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 2);
        let order: Vec<String> = manifest.iter().map(|(b, _)| b.to_string()).collect();
        assert_eq!(order, vec!["audio/click", "ui/title"]);
        assert_eq!(
            manifest.get(&BundleId::new("ui/title")).map(ContentHash::as_str),
            Some("00aa11bb22cc33dd")
        );
    }

    #[test]
    fn test_manifest_missing_table_is_empty() {
        assert!(Manifest::from_toml_str("").unwrap().is_empty());
        assert!(Manifest::from_toml_str("bundles = 3").is_err());
    }

    #[test]
    fn test_content_hash_of_bytes_is_stable() {
        let a = ContentHash::of_bytes(b"bundle bytes");
        let b = ContentHash::of_bytes(b"bundle bytes");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, ContentHash::of_bytes(b"other bytes"));
    }

    #[test]
    fn test_cache_manifest_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache_manifest.toml");

        let mut cache = CacheManifest::load(&path).unwrap();
        assert!(cache.is_empty());
        cache.record(&BundleId::new("audio/click"), ContentHash::new("abc"));
        cache.save(&path).unwrap();

        let reloaded = CacheManifest::load(&path).unwrap();
        assert!(reloaded.is_current(&BundleId::new("audio/click"), &ContentHash::new("ABC")));
    }
}
