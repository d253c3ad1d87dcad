//! Basic loading example for archetype_bundle

use archetype_bundle::{
    AssetProvider, AssetQuery, AssetType, BundleConfig, LoadingCoordinator, MockBackend,
};
use std::sync::Arc;

const CONFIG: &str = r#"
[[categories]]
category = "se"
directory = "audio/"
single_use = true

[[categories]]
category = "bgm"
directory = "music/"
template = "bgm_{name}"
"#;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("archetype_bundle v{}", archetype_bundle::VERSION);

    let config = BundleConfig::from_toml_str(CONFIG)?;
    let resolver = Arc::new(config.resolver());

    // An in-memory backend standing in for a real decoder
    let backend = MockBackend::new().with_completion_polls(2);
    backend.insert(resolver.resolve("se", "click", "")?, "click", vec![0i16; 64]);
    backend.insert(resolver.resolve("bgm", "Title", "")?, "Title", String::from("title theme"));

    let coordinator = Arc::new(LoadingCoordinator::new(backend).with_config(config.coordinator));
    let provider = AssetProvider::new("main", resolver, coordinator);

    provider.load_async::<Vec<i16>, _>("se", "click", |clip| {
        println!("click: {:?} samples", clip.map(|c| c.len()));
    });
    let batch = provider.preload(vec![(AssetQuery::new("bgm", "Title"), AssetType::of::<String>())]);
    batch.on_complete(|| println!("bgm preload finished"));

    let mut frame = 0;
    while provider.coordinator().is_running() {
        frame += 1;
        provider.tick();
        println!("frame {frame}: batch progress {:.0}%", batch.progress() * 100.0);
    }

    let metrics = provider.coordinator().metrics();
    println!(
        "cached: {}, dispatches: {}, hit rate: {:.1}%",
        provider.coordinator().cached_count(),
        metrics.dispatches(),
        metrics.cache_hit_rate()
    );

    drop(batch);
    println!("evicted on sweep: {}", provider.sweep());
    println!("Basic loading example complete!");
    Ok(())
}
