//! Fallback chains built through the provider registry

use archetype_bundle::{
    AssetProvider, AssetQuery, AssetSource, AssetType, BundleError, LoadingCoordinator,
    MockBackend, NameResolver, ProviderRegistry, ResolverEntry,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn resolver() -> Arc<NameResolver> {
    Arc::new(NameResolver::new(vec![ResolverEntry::new("ui", "ui/")]))
}

fn provider(name: &str, backend: MockBackend) -> Arc<AssetProvider<MockBackend>> {
    Arc::new(AssetProvider::new(
        name,
        resolver(),
        Arc::new(LoadingCoordinator::new(backend)),
    ))
}

#[test]
fn test_second_fallback_answers_after_mismatch_and_miss() {
    // Primary holds the wrong type, first fallback holds nothing
    let primary_backend = MockBackend::new();
    primary_backend.insert("ui/icon", "icon", String::from("not a number"));
    let empty_fallback = provider("patch", MockBackend::new());
    let good_backend = MockBackend::new();
    good_backend.insert("ui/icon", "icon", 42u32);
    let good_fallback = provider("builtin", good_backend.clone());

    let mut registry = ProviderRegistry::new();
    registry.register(empty_fallback.clone()).unwrap();
    registry.register(good_fallback.clone()).unwrap();

    let primary = AssetProvider::new(
        "remote",
        resolver(),
        Arc::new(LoadingCoordinator::new(primary_backend)),
    )
    .with_fallbacks(registry.chain(&["patch", "builtin"]).unwrap());
    assert_eq!(primary.fallback_count(), 2);

    let answer = Arc::new(Mutex::new(None));
    let a = answer.clone();
    primary.load_async::<u32, _>("ui", "icon", move |value| *a.lock() = Some(value));

    for _ in 0..8 {
        primary.tick();
        empty_fallback.tick();
        good_fallback.tick();
    }

    let answer = answer.lock().clone().expect("callback fired");
    assert_eq!(answer.as_deref(), Some(&42));
    assert_eq!(good_backend.total_dispatches(), 1);
}

#[test]
fn test_chain_with_no_answer_yields_none() {
    let primary_backend = MockBackend::new();
    let fallback = provider("builtin", MockBackend::new());
    let primary = AssetProvider::new(
        "remote",
        resolver(),
        Arc::new(LoadingCoordinator::new(primary_backend)),
    )
    .with_fallbacks(vec![fallback.clone() as Arc<dyn AssetSource>]);

    let answer = Arc::new(Mutex::new(None));
    let a = answer.clone();
    primary.load_untyped(
        &AssetQuery::new("ui", "missing"),
        AssetType::of::<u32>(),
        Box::new(move |value| *a.lock() = Some(value.is_some())),
    );

    for _ in 0..8 {
        primary.tick();
        fallback.tick();
    }
    assert_eq!(*answer.lock(), Some(false));
}

#[test]
fn test_registry_rejects_duplicates_and_unknown_names() {
    let mut registry = ProviderRegistry::new();
    registry.register(provider("builtin", MockBackend::new())).unwrap();

    assert!(matches!(
        registry.register(provider("builtin", MockBackend::new())),
        Err(BundleError::DuplicateProvider(_))
    ));
    assert!(matches!(
        registry.chain(&["builtin", "nowhere"]),
        Err(BundleError::UnknownProvider(name)) if name == "nowhere"
    ));
}
