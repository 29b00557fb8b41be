//! Host integration tests: settings load, initial indexing and watcher-driven rescans.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kicadhub_app::{AppContext, AppEvent, Host};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("kicadhub")
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

/// Library copy plus a settings file pointing at it.
fn workspace() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    copy_dir(&fixture_path("libs"), &dir.path().join("libs"));
    let settings = serde_json::json!({
        "path_root": dir.path().join("libs").to_string_lossy(),
        "symbol_path": "${BASE_DIR}/symbols",
        "footprint_path": "${BASE_DIR}/footprints",
    });
    let path = dir.path().join("settings.json");
    std::fs::write(&path, settings.to_string()).unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_start_indexes_both_libraries() {
    let (_dir, settings) = workspace();
    let ctx = Arc::new(AppContext::load(&settings).unwrap());
    let mut events = ctx.subscribe();
    let mut host = Host::new(ctx.clone());

    host.start().await.unwrap();
    assert!(host.watcher().is_watching());
    assert_eq!(host.watcher().watched_paths().len(), 2);

    assert!(host.handle_next().await);
    assert!(host.handle_next().await);

    assert_eq!(ctx.library.len(), 3);
    assert_eq!(ctx.footprints.snapshot().footprint_count(), 2);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, AppEvent::SymbolsIndexed { summary, .. } if summary.parts == 3)));
    assert!(seen
        .iter()
        .any(|e| matches!(e, AppEvent::FootprintsIndexed { summary, .. } if summary.libraries == 2)));
}

#[tokio::test]
async fn test_new_library_file_triggers_rescan() {
    let (dir, settings) = workspace();
    let ctx = Arc::new(AppContext::load(&settings).unwrap());
    let mut host = Host::new(ctx.clone());
    host.start().await.unwrap();
    assert!(host.handle_next().await);
    assert!(host.handle_next().await);
    assert_eq!(ctx.library.len(), 3);

    std::fs::write(
        dir.path().join("libs").join("symbols").join("Diodes.kicad_sym"),
        "(kicad_symbol_lib (version 20231120) (generator kicad_symbol_editor)\n  (symbol \"D_1N4148\" (property \"Reference\" \"D\") (property \"Value\" \"1N4148\"))\n)\n",
    )
    .unwrap();

    let rescanned = tokio::time::timeout(Duration::from_secs(15), async {
        while ctx.library.len() != 4 {
            assert!(host.handle_next().await);
        }
    })
    .await;
    assert!(rescanned.is_ok(), "library change was not picked up");
    assert!(ctx.library.snapshot().library("Diodes").is_some());
}

#[tokio::test]
async fn test_exit_backup_when_enabled() {
    let (dir, settings) = workspace();
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&settings).unwrap()).unwrap();
    doc["backup"] = serde_json::json!({
        "path": dir.path().join("backups").to_string_lossy(),
        "backup_on_exit": true,
    });
    std::fs::write(&settings, doc.to_string()).unwrap();

    let ctx = Arc::new(AppContext::load(&settings).unwrap());
    let mut events = ctx.subscribe();
    let host = Host::new(ctx.clone());
    host.run_until(async {}).await.unwrap();

    for category in ["app_data", "symbols", "footprints"] {
        let snapshots: Vec<_> = std::fs::read_dir(dir.path().join("backups").join(category))
            .unwrap()
            .collect();
        assert_eq!(snapshots.len(), 1, "{} snapshot missing", category);
    }
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&settings).unwrap()).unwrap();
    assert!(saved["backup"]["footprints"]["last_run"].is_string());

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if let AppEvent::BackupFinished { created, failed } = event {
            assert_eq!(created.len(), 3);
            assert!(failed.is_empty());
            finished = true;
        }
    }
    assert!(finished);
}
