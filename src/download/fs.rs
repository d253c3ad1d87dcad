//! Local-directory transport
//!
//! Treats the url as a filesystem path, copies it into a cache directory and
//! verifies the xxh3 content hash before recording it. Copies finish within
//! `fetch`, so handles are always done by the first poll.

use super::manifest::{CacheManifest, ContentHash};
use super::transfer::{TransferBackend, TransferHandle};
use crate::error::{BundleError, Result};
use crate::identity::BundleId;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

const CACHE_MANIFEST: &str = "cache_manifest.toml";

/// Copies bundles from a source tree into a verified local cache
#[derive(Debug)]
pub struct FsTransferBackend {
    cache_dir: PathBuf,
    manifest: Mutex<CacheManifest>,
}

impl FsTransferBackend {
    /// Open (or create) a cache directory, loading its manifest if present
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        let manifest = CacheManifest::load(cache_dir.join(CACHE_MANIFEST))?;
        log::debug!(
            "Opened bundle cache at {} with {} entries",
            cache_dir.display(),
            manifest.len()
        );
        Ok(Self {
            cache_dir,
            manifest: Mutex::new(manifest),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where a bundle's bytes live once fetched
    pub fn path_of(&self, bundle: &BundleId) -> PathBuf {
        self.cache_dir.join(bundle.as_str())
    }

    pub fn cached_hash(&self, bundle: &BundleId) -> Option<ContentHash> {
        self.manifest.lock().hash_of(bundle).cloned()
    }

    fn copy_verified(&self, bundle: &BundleId, url: &str, hash: &ContentHash) -> Result<()> {
        let bytes = std::fs::read(url)?;
        let actual = ContentHash::of_bytes(&bytes);
        if &actual != hash {
            return Err(BundleError::HashMismatch {
                bundle: bundle.to_string(),
                expected: hash.to_string(),
                actual: actual.to_string(),
            });
        }

        let target = self.path_of(bundle);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        std::fs::write(&partial, &bytes)?;
        std::fs::rename(&partial, &target)?;

        let mut manifest = self.manifest.lock();
        manifest.record(bundle, actual);
        manifest.save(self.cache_dir.join(CACHE_MANIFEST))?;
        Ok(())
    }
}

impl TransferBackend for FsTransferBackend {
    type Handle = FsTransfer;

    fn fetch(&self, bundle: &BundleId, url: &str, hash: &ContentHash) -> FsTransfer {
        let error = self
            .copy_verified(bundle, url, hash)
            .err()
            .map(|e| e.to_string());
        if let Some(e) = &error {
            log::debug!("Copy of {bundle} from {url} failed: {e}");
        }
        FsTransfer { error }
    }

    fn is_up_to_date(&self, bundle: &BundleId, hash: &ContentHash) -> bool {
        self.manifest.lock().is_current(bundle, hash) && self.path_of(bundle).is_file()
    }

    fn backend_name(&self) -> &'static str {
        "Filesystem"
    }
}

/// Result of a finished local copy
#[derive(Debug)]
pub struct FsTransfer {
    error: Option<String>,
}

impl TransferHandle for FsTransfer {
    fn is_done(&self) -> bool {
        true
    }

    fn progress(&self) -> Option<f32> {
        Some(1.0)
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }

    fn abort(&mut self) {}
}
