use super::manifest::ContentHash;
use crate::identity::BundleId;

/// One in-flight transfer, polled by the scheduler each tick
pub trait TransferHandle: Send {
    /// Whether the transfer has stopped, successfully or not
    fn is_done(&self) -> bool;

    /// Fraction received (0.0 to 1.0), if the transport reports it
    fn progress(&self) -> Option<f32>;

    /// Failure description once done
    fn error(&self) -> Option<String>;

    /// Stop the transfer; it will be treated as failed
    fn abort(&mut self);
}

/// Fetches bundle bytes into local storage
pub trait TransferBackend: Send + Sync {
    type Handle: TransferHandle;

    /// Start fetching `bundle` from `url`, expecting content `hash`
    fn fetch(&self, bundle: &BundleId, url: &str, hash: &ContentHash) -> Self::Handle;

    /// Whether `bundle` is already stored locally at `hash`
    fn is_up_to_date(&self, bundle: &BundleId, hash: &ContentHash) -> bool;

    /// Get the name of this backend (for debugging)
    fn backend_name(&self) -> &'static str {
        "unnamed"
    }
}
