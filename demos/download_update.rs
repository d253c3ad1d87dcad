//! Download update example for archetype_bundle
//!
//! Writes a few bundle files into a scratch directory, then mirrors them
//! into a local cache through the download scheduler.

use archetype_bundle::{
    ContentHash, DownloadScheduler, FsTransferBackend, Manifest, SchedulerConfig, UpdateEvent,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let source = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;

    let mut manifest = Manifest::new();
    for (name, body) in [("audio/click", "click"), ("ui/title", "title"), ("music/bgm_title", "bgm")] {
        let path = source.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        manifest.insert(name, ContentHash::of_bytes(body.as_bytes()));
    }
    println!("manifest:\n{}", manifest.to_toml_string()?);

    let config = SchedulerConfig {
        max_concurrent: 2,
        root_url: source.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    let scheduler = DownloadScheduler::new(FsTransferBackend::new(cache.path())?).with_config(config);

    let events = scheduler.update_all(&manifest)?;
    while !scheduler.is_complete() {
        scheduler.tick();
        for event in events.try_iter() {
            match event {
                UpdateEvent::Progress(p) => println!("{} of {} remaining", p.rest, p.total),
                UpdateEvent::Completed(p) => println!("done with {} error(s)", p.errors),
            }
        }
    }

    // Everything is current now, so a second pass fetches nothing
    scheduler.update_all(&manifest)?;
    println!("second pass queued {} bundle(s)", scheduler.pending_count());
    scheduler.tick();

    println!("Download update example complete!");
    Ok(())
}
