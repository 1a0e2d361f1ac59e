//! Filters, conflict policies, and enumeration order across batch runs.

mod common;

use common::{payload, Fixture};
use filen_drive::{BatchOptions, ConflictPolicy};
use std::sync::{Arc, Mutex};

fn no_cancel() -> filen_drive::CancelFlag {
    filen_drive::transfer::cancel_flag()
}

fn opts() -> BatchOptions {
    BatchOptions {
        recursive: true,
        ..BatchOptions::default()
    }
}

#[tokio::test]
async fn include_exclude_filters_select_tasks_in_order() {
    let fx = Fixture::new();
    // Ten files; only non-draft PDFs qualify
    let names = [
        "a.pdf",
        "b.txt",
        "draft_c.pdf",
        "d.pdf",
        "draft_e.pdf",
        "f.md",
        "g.pdf",
        "h.bin",
        "i.pdf",
        "j.log",
    ];
    for name in names {
        fx.write_file(&format!("docs/{name}"), b"content");
    }
    let dir = fx.path("docs");

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let progress: filen_drive::batch::TaskProgressFn = Box::new(move |label, done, total| {
        // Record each task once, at its final progress report
        if done == total {
            let mut v = seen_cb.lock().unwrap();
            if v.last().map(String::as_str) != Some(label) {
                v.push(label.to_string());
            }
        }
    });

    let options = BatchOptions {
        include: vec!["*.pdf".into()],
        exclude: vec!["draft_*".into()],
        ..opts()
    };
    let summary = fx
        .orchestrator
        .upload(
            &[dir.to_string_lossy().into_owned()],
            "/filtered",
            &options,
            Some(&progress),
            &no_cancel(),
        )
        .await
        .unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(summary.total_tasks, 4, "filters prune at enumeration");

    let order = seen.lock().unwrap().clone();
    assert_eq!(
        order,
        vec![
            "/filtered/docs/a.pdf",
            "/filtered/docs/d.pdf",
            "/filtered/docs/g.pdf",
            "/filtered/docs/i.pdf",
        ],
        "lexicographic enumeration"
    );

    // Remote tree contains exactly the selected files
    let folder = fx.resolver.resolve_strict("/filtered/docs").await.unwrap();
    let mut remote: Vec<String> = fx
        .resolver
        .list(folder.id)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    remote.sort();
    assert_eq!(remote, vec!["a.pdf", "d.pdf", "g.pdf", "i.pdf"]);
}

#[tokio::test]
async fn on_conflict_newer_skips_unmodified_sources() {
    let fx = Fixture::new();
    fx.write_file("src/one.bin", &payload(2048));
    fx.write_file("src/two.bin", &payload(4096));
    let dir = fx.path("src");
    let sources = vec![dir.to_string_lossy().into_owned()];

    let newer = BatchOptions {
        conflict: ConflictPolicy::Newer,
        preserve_mtime: true,
        ..opts()
    };

    let first = fx
        .orchestrator
        .upload(&sources, "/sync", &newer, None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(first.completed, 2);

    // Second invocation with untouched sources: everything skips, zero
    // chunks travel.
    let puts_before = fx.backend.chunk_put_attempts();
    let second = fx
        .orchestrator
        .upload(&sources, "/sync", &newer, None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(fx.backend.chunk_put_attempts(), puts_before);
}

#[tokio::test]
async fn on_conflict_newer_replaces_modified_sources() {
    let fx = Fixture::new();
    let src = fx.write_file("src/doc.bin", &payload(2048));
    let sources = vec![src.to_string_lossy().into_owned()];

    let newer = BatchOptions {
        conflict: ConflictPolicy::Newer,
        preserve_mtime: true,
        ..BatchOptions::default()
    };
    fx.orchestrator
        .upload(&sources, "/sync", &newer, None, &no_cancel())
        .await
        .unwrap();

    // Touch the file into the future so it is strictly newer than the
    // remote copy.
    let future = filetime::FileTime::from_unix_time(
        (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600) as i64,
        0,
    );
    filetime::set_file_mtime(&src, future).unwrap();

    let second = fx
        .orchestrator
        .upload(&sources, "/sync", &newer, None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(second.skipped, 0);

    // The superseded node went to the trash; one live copy remains
    let folder = fx.resolver.resolve_strict("/sync").await.unwrap();
    fx.resolver.invalidate(folder.id);
    let live = fx.resolver.list(folder.id).await.unwrap();
    assert_eq!(live.iter().filter(|n| n.name == "doc.bin").count(), 1);
    let trash = fx.resolver.list_trash().await.unwrap();
    assert_eq!(trash.iter().filter(|n| n.name == "doc.bin").count(), 1);
}

#[tokio::test]
async fn on_conflict_skip_leaves_existing_files() {
    let fx = Fixture::new();
    let src = fx.write_file("src/keep.bin", &payload(1024));
    let sources = vec![src.to_string_lossy().into_owned()];

    fx.orchestrator
        .upload(&sources, "/keep", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();

    let second = fx
        .orchestrator
        .upload(&sources, "/keep", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped, 1);
}

#[tokio::test]
async fn on_conflict_overwrite_trashes_the_old_node() {
    let fx = Fixture::new();
    let src = fx.write_file("src/o.bin", &payload(1024));
    let sources = vec![src.to_string_lossy().into_owned()];

    fx.orchestrator
        .upload(&sources, "/ow", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();
    let first = fx.resolver.resolve_strict("/ow/o.bin").await.unwrap();

    let overwrite = BatchOptions {
        conflict: ConflictPolicy::Overwrite,
        ..BatchOptions::default()
    };
    let second = fx
        .orchestrator
        .upload(&sources, "/ow", &overwrite, None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(second.completed, 1);

    let replacement = fx.resolver.resolve_strict("/ow/o.bin").await.unwrap();
    assert_ne!(replacement.id, first.id, "a new node replaced the old");

    let trash = fx.resolver.list_trash().await.unwrap();
    assert!(trash.iter().any(|n| n.id == first.id));
}

#[tokio::test]
async fn download_conflict_policies() {
    let fx = Fixture::new();
    let remote_content = payload(2048);
    let src = fx.write_file("src/c.bin", &remote_content);
    fx.orchestrator
        .upload(
            &[src.to_string_lossy().into_owned()],
            "/dlc",
            &BatchOptions::default(),
            None,
            &no_cancel(),
        )
        .await
        .unwrap();

    // A pre-existing local file with different content
    let dest = fx.path("out");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("c.bin"), b"local version").unwrap();
    let dest_str = dest.to_string_lossy().into_owned();

    // skip: untouched
    let s = fx
        .orchestrator
        .download("/dlc/c.bin", &dest_str, &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(s.skipped, 1);
    assert_eq!(common::read(&dest.join("c.bin")), b"local version");

    // overwrite: replaced
    let ow = BatchOptions {
        conflict: ConflictPolicy::Overwrite,
        ..BatchOptions::default()
    };
    let s = fx
        .orchestrator
        .download("/dlc/c.bin", &dest_str, &ow, None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(s.completed, 1);
    assert_eq!(common::read(&dest.join("c.bin")), remote_content);
}

#[tokio::test]
async fn replaying_a_completed_batch_transfers_nothing_under_skip() {
    let fx = Fixture::new();
    fx.write_file("src/r1.bin", &payload(1024));
    fx.write_file("src/r2.bin", &payload(1024));
    let dir = fx.path("src");
    let sources = vec![dir.to_string_lossy().into_owned()];

    let first = fx
        .orchestrator
        .upload(&sources, "/replay", &opts(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(first.completed, 2);

    // Journal was deleted; the replay re-enumerates and only performs
    // conflict checks.
    let puts_before = fx.backend.chunk_put_attempts();
    let replay = fx
        .orchestrator
        .upload(&sources, "/replay", &opts(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(replay.completed, 0);
    assert_eq!(replay.skipped, 2);
    assert_eq!(fx.backend.chunk_put_attempts(), puts_before);
}
