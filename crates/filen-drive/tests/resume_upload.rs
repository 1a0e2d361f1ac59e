//! Resume semantics: interrupted uploads continue from the committed chunk
//! watermark, re-hashing but never re-sending the prefix.

mod common;

use common::{payload, read, Fixture};
use filen_core::CHUNK_SIZE;
use filen_crypto::sha512_hex;
use filen_drive::journal::{batch_id, Operation, TaskStatus};
use filen_drive::{BatchOptions, CancelFlag};
use std::sync::atomic::Ordering;

fn no_cancel() -> CancelFlag {
    filen_drive::transfer::cancel_flag()
}

#[tokio::test]
async fn interrupted_upload_resumes_without_resending() {
    let fx = Fixture::new();
    // 3.5 MiB: chunks 0..=3, chunk 3 is 512 KiB
    let original = payload(3 * CHUNK_SIZE as usize + CHUNK_SIZE as usize / 2);
    let src = fx.write_file("src/big.bin", &original);
    let sources = vec![src.to_string_lossy().into_owned()];

    // The link dies after chunks 0 and 1 are acknowledged
    fx.backend.fail_chunk_puts_after(2);
    let summary = fx
        .orchestrator
        .upload(&sources, "/vault", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(fx.backend.chunk_puts(), 2);

    // Journal survives with the committed watermark
    let id = batch_id(Operation::Upload, &sources, "/vault");
    let journal = fx
        .orchestrator
        .journal_store()
        .load(&id)
        .unwrap()
        .expect("journal retained after failure");
    let task = &journal.tasks[0];
    assert_eq!(task.status, TaskStatus::Error("transient".into()));
    assert_eq!(task.last_chunk, 1);
    assert!(task.file_uuid.is_some());
    assert!(task.content_key.is_some());

    // Second invocation: same command, same batch id, so it resumes
    fx.backend.clear_faults();
    let puts_before = fx.backend.chunk_puts();
    let summary = fx
        .orchestrator
        .upload(&sources, "/vault", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.errors, 0);

    // Chunks 0 and 1 were re-hashed locally but not re-sent
    assert_eq!(fx.backend.chunk_puts() - puts_before, 2);

    // Journal gone, metadata hash is the whole-file SHA-512
    assert!(fx.orchestrator.journal_store().load(&id).unwrap().is_none());
    let node = fx.resolver.resolve_strict("/vault/big.bin").await.unwrap();
    assert_eq!(node.file_info().unwrap().hash_hex, sha512_hex(&original));

    // And a fresh download round-trips byte for byte
    let dest = fx.path("out");
    std::fs::create_dir_all(&dest).unwrap();
    fx.orchestrator
        .download(
            "/vault/big.bin",
            &dest.to_string_lossy(),
            &BatchOptions {
                verify: true,
                ..BatchOptions::default()
            },
            None,
            &no_cancel(),
        )
        .await
        .unwrap();
    assert_eq!(read(&dest.join("big.bin")), original);
}

#[tokio::test]
async fn cancel_after_first_chunk_then_resume() {
    let fx = Fixture::new();
    // Ten full chunks
    let original = payload(10 * CHUNK_SIZE as usize);
    let src = fx.write_file("src/ten.bin", &original);
    let sources = vec![src.to_string_lossy().into_owned()];

    // Trip the cancel flag from the progress callback after the first chunk
    let cancel = no_cancel();
    let cancel_in_cb = cancel.clone();
    let progress: filen_drive::batch::TaskProgressFn = Box::new(move |_label, _done, _total| {
        cancel_in_cb.store(true, Ordering::Relaxed);
    });

    let summary = fx
        .orchestrator
        .upload(
            &sources,
            "/vault",
            &BatchOptions::default(),
            Some(&progress),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(summary.interrupted, 1);
    assert_eq!(fx.backend.chunk_puts(), 1, "cancel lands before chunk 1");

    let id = batch_id(Operation::Upload, &sources, "/vault");
    let journal = fx
        .orchestrator
        .journal_store()
        .load(&id)
        .unwrap()
        .expect("journal retained after interruption");
    assert_eq!(journal.tasks[0].status, TaskStatus::Interrupted);
    assert_eq!(journal.tasks[0].last_chunk, 0);

    // Resume: exactly nine more chunk PUTs on the wire
    let puts_before = fx.backend.chunk_puts();
    let summary = fx
        .orchestrator
        .upload(&sources, "/vault", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(fx.backend.chunk_puts() - puts_before, 9);

    let node = fx.resolver.resolve_strict("/vault/ten.bin").await.unwrap();
    assert_eq!(node.file_info().unwrap().hash_hex, sha512_hex(&original));
    assert!(fx.orchestrator.journal_store().load(&id).unwrap().is_none());
}

#[tokio::test]
async fn journal_invariants_hold_at_rest() {
    let fx = Fixture::new();
    let original = payload(5 * CHUNK_SIZE as usize);
    let src = fx.write_file("src/five.bin", &original);
    let sources = vec![src.to_string_lossy().into_owned()];

    fx.backend.fail_chunk_puts_after(3);
    fx.orchestrator
        .upload(&sources, "/inv", &BatchOptions::default(), None, &no_cancel())
        .await
        .unwrap();

    let id = batch_id(Operation::Upload, &sources, "/inv");
    let journal = fx.orchestrator.journal_store().load(&id).unwrap().unwrap();
    for task in &journal.tasks {
        let count = task.chunk_count.map(|c| c as i64).unwrap_or(i64::MAX);
        assert!(task.last_chunk >= -1);
        assert!(task.last_chunk < count);
        match &task.status {
            TaskStatus::Completed => assert_eq!(task.last_chunk, count - 1),
            TaskStatus::Skipped(_) => assert_eq!(task.last_chunk, -1),
            _ => {}
        }
    }
}

#[tokio::test]
async fn interrupted_download_resumes() {
    let fx = Fixture::new();
    let original = payload(4 * CHUNK_SIZE as usize + 9);
    let src = fx.write_file("src/dl.bin", &original);

    fx.orchestrator
        .upload(
            &[src.to_string_lossy().into_owned()],
            "/dl",
            &BatchOptions::default(),
            None,
            &no_cancel(),
        )
        .await
        .unwrap();

    // Start the download and cancel after the first chunk lands
    let dest = fx.path("out");
    std::fs::create_dir_all(&dest).unwrap();
    let dest_str = dest.to_string_lossy().into_owned();

    let cancel = no_cancel();
    let cancel_in_cb = cancel.clone();
    let progress: filen_drive::batch::TaskProgressFn = Box::new(move |_l, _d, _t| {
        cancel_in_cb.store(true, Ordering::Relaxed);
    });
    let opts = BatchOptions {
        verify: true,
        ..BatchOptions::default()
    };

    let summary = fx
        .orchestrator
        .download("/dl/dl.bin", &dest_str, &opts, Some(&progress), &cancel)
        .await
        .unwrap();
    assert_eq!(summary.interrupted, 1);

    let id = batch_id(
        Operation::Download,
        &["/dl/dl.bin".to_string()],
        &dest_str,
    );
    let journal = fx.orchestrator.journal_store().load(&id).unwrap().unwrap();
    assert_eq!(journal.tasks[0].status, TaskStatus::Interrupted);
    assert_eq!(journal.tasks[0].last_chunk, 0);

    // Resume fetches only the remaining chunks
    let gets_before = fx.backend.chunk_gets();
    let summary = fx
        .orchestrator
        .download("/dl/dl.bin", &dest_str, &opts, None, &no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(fx.backend.chunk_gets() - gets_before, 4);
    assert_eq!(read(&dest.join("dl.bin")), original);
}
