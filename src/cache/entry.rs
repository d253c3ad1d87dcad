//! Cached entries and dependency closures

use crate::backend::{BundleBackend, LivenessProbe};
use crate::identity::{AssetKey, AssetObject, AuxiliaryObject, BundleId, WeakAsset};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Transitive set of bundles a bundle depends on
///
/// Content decoded from any bundle in the closure is shared with other
/// entries and must not keep this entry alive. Computed on demand and
/// thrown away after use.
#[derive(Debug, Clone, Default)]
pub struct DependencyClosure {
    bundles: HashSet<BundleId>,
}

impl DependencyClosure {
    /// Walk the backend's dependency graph starting at `root`
    ///
    /// `root` itself is excluded even when a cycle leads back to it.
    pub fn compute<B: BundleBackend + ?Sized>(backend: &B, root: &BundleId) -> Self {
        let mut bundles = HashSet::new();
        let mut queue: VecDeque<BundleId> = backend.dependencies(root).into();

        while let Some(bundle) = queue.pop_front() {
            if &bundle == root || !bundles.insert(bundle.clone()) {
                continue;
            }
            queue.extend(backend.dependencies(&bundle));
        }

        Self { bundles }
    }

    pub fn contains(&self, bundle: &BundleId) -> bool {
        self.bundles.contains(bundle)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Weak reference to a secondary object plus the bundle it came from
#[derive(Debug, Clone)]
pub struct AuxiliaryRef {
    pub origin: BundleId,
    pub object: WeakAsset,
}

/// One finished load, tracked by weak references only
#[derive(Debug, Clone)]
pub struct CachedEntry {
    key: AssetKey,
    main: WeakAsset,
    auxiliary: Vec<AuxiliaryRef>,
}

impl CachedEntry {
    /// Build an entry, keeping only auxiliary objects outside the closure
    pub fn new(
        key: AssetKey,
        main: &AssetObject,
        auxiliary: &[AuxiliaryObject],
        closure: &DependencyClosure,
    ) -> Self {
        let auxiliary = auxiliary
            .iter()
            .filter(|aux| !closure.contains(&aux.origin))
            .map(|aux| AuxiliaryRef {
                origin: aux.origin.clone(),
                object: Arc::downgrade(&aux.object),
            })
            .collect();

        Self {
            key,
            main: Arc::downgrade(main),
            auxiliary,
        }
    }

    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    pub fn bundle(&self) -> &BundleId {
        &self.key.bundle
    }

    pub fn auxiliary(&self) -> &[AuxiliaryRef] {
        &self.auxiliary
    }

    /// Upgrade the main reference if the probe says it is alive
    pub fn upgrade_main(&self, probe: &dyn LivenessProbe) -> Option<AssetObject> {
        if probe.is_alive(&self.main) {
            self.main.upgrade()
        } else {
            None
        }
    }

    pub fn is_main_alive(&self, probe: &dyn LivenessProbe) -> bool {
        probe.is_alive(&self.main)
    }

    /// Drop auxiliary references that are dead or now belong to shared content
    ///
    /// Returns how many were removed.
    pub fn prune_auxiliary(&mut self, probe: &dyn LivenessProbe, closure: &DependencyClosure) -> usize {
        let before = self.auxiliary.len();
        self.auxiliary
            .retain(|aux| !closure.contains(&aux.origin) && probe.is_alive(&aux.object));
        before - self.auxiliary.len()
    }

    /// Whether the main object or any auxiliary object is still alive
    pub fn is_referenced(&self, probe: &dyn LivenessProbe) -> bool {
        self.is_main_alive(probe) || self.auxiliary.iter().any(|aux| probe.is_alive(&aux.object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, StrongCountProbe};

    fn aux(origin: &str, object: &AssetObject) -> AuxiliaryObject {
        AuxiliaryObject {
            origin: BundleId::new(origin),
            object: Arc::clone(object),
        }
    }

    #[test]
    fn test_closure_is_transitive_and_cycle_safe() {
        let backend = MockBackend::new();
        backend.set_dependencies("hero", vec!["shared/mat".into()]);
        backend.set_dependencies("shared/mat", vec!["shared/tex".into(), "hero".into()]);
        backend.set_dependencies("shared/tex", vec!["shared/mat".into()]);

        let closure = DependencyClosure::compute(&backend, &BundleId::new("hero"));
        assert_eq!(closure.len(), 2);
        assert!(closure.contains(&BundleId::new("shared/mat")));
        assert!(closure.contains(&BundleId::new("shared/tex")));
        assert!(!closure.contains(&BundleId::new("hero")));
    }

    #[test]
    fn test_entry_excludes_shared_auxiliary() {
        let backend = MockBackend::new();
        backend.set_dependencies("hero", vec!["shared/mat".into()]);
        let closure = DependencyClosure::compute(&backend, &BundleId::new("hero"));

        let main: AssetObject = Arc::new(1u32);
        let own: AssetObject = Arc::new(2u32);
        let shared: AssetObject = Arc::new(3u32);
        let entry = CachedEntry::new(
            AssetKey::new("hero", "hero"),
            &main,
            &[aux("hero", &own), aux("shared/mat", &shared)],
            &closure,
        );

        assert_eq!(entry.auxiliary().len(), 1);
        assert_eq!(entry.auxiliary()[0].origin.as_str(), "hero");
    }

    #[test]
    fn test_entry_liveness() {
        let probe = StrongCountProbe;
        let main: AssetObject = Arc::new(1u32);
        let own: AssetObject = Arc::new(2u32);
        let mut entry = CachedEntry::new(
            AssetKey::new("hero", "hero"),
            &main,
            &[aux("hero", &own)],
            &DependencyClosure::default(),
        );

        drop(main);
        assert!(!entry.is_main_alive(&probe));
        assert!(entry.upgrade_main(&probe).is_none());
        assert!(entry.is_referenced(&probe));

        drop(own);
        assert_eq!(entry.prune_auxiliary(&probe, &DependencyClosure::default()), 1);
        assert!(!entry.is_referenced(&probe));
    }
}
