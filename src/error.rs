//! Error types for archetype_bundle

use thiserror::Error;

/// Main error type for configuration, resolution and scheduling
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Asset name must not be empty")]
    EmptyAssetName,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("An update is already in progress")]
    UpdateInProgress,

    #[error("Content hash mismatch for {bundle}: expected {expected}, got {actual}")]
    HashMismatch {
        bundle: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

/// Result type alias for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// Why a load finished without an object
///
/// Stored inside finished operations, so it is cheap to clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("{object} not found in {bundle}")]
    NotFound { bundle: String, object: String },

    #[error("Backend failed to load {object} from {bundle}: {message}")]
    Backend {
        bundle: String,
        object: String,
        message: String,
    },

    #[error("Internal failure while loading {object} from {bundle}: {message}")]
    Internal {
        bundle: String,
        object: String,
        message: String,
    },
}
