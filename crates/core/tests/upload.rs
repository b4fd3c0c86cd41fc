use photo_api::memory::{InMemoryBackend, Step};
use photo_api::{ApiError, PhotoStatus};
use std::sync::Arc;
use std::time::Duration;
use uploader_core::config::{AppConfig, UploadConfig};
use uploader_core::models::TaskStatus;
use uploader_core::session::MemorySessionStore;
use uploader_core::upload::{SelectionError, UploadFile};
use uploader_core::PhotoClient;

async fn signed_in(upload: UploadConfig) -> (Arc<InMemoryBackend>, PhotoClient) {
    let backend = Arc::new(InMemoryBackend::new());
    let cfg = AppConfig {
        upload,
        ..AppConfig::default()
    };
    let client = PhotoClient::new(
        backend.clone(),
        Arc::new(MemorySessionStore::default()),
        &cfg,
    );
    client
        .session
        .register("ana@example.com", "secret1", "Ana")
        .await
        .unwrap();
    (backend, client)
}

fn jpeg(name: &str, body: &'static [u8]) -> UploadFile {
    UploadFile::from_bytes(name, "image/jpeg", body)
}

#[tokio::test]
async fn three_steps_end_complete_at_full_progress() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    let added = client.uploader.add_files(vec![jpeg("IMG_0001", b"abc")]);
    assert_eq!(added.added.len(), 1);
    assert_eq!(client.uploader.snapshot()[0].status, TaskStatus::Pending);

    let stats = client.uploader.run_pending().await;
    assert_eq!(stats.complete, 1);

    let task = client.uploader.task(added.added[0]).unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.progress, 100);
    assert_eq!(task.filename, "IMG_0001.jpg");
    assert_eq!(task.declared_size, Some(3));
    let photo_id = task.photo_id.unwrap();
    assert_eq!(backend.object_for(&photo_id).unwrap().as_ref(), b"abc");
    assert_eq!(backend.call_count("complete_upload"), 1);
}

#[tokio::test]
async fn step_failures_stay_on_their_own_task() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    backend.fail_step(
        Step::Initiate,
        "a.jpg",
        ApiError::Server {
            status: 500,
            message: "db down".into(),
        },
    );
    backend.fail_step(
        Step::Transfer,
        "b.jpg",
        ApiError::Forbidden("SignatureDoesNotMatch".into()),
    );
    backend.fail_step(
        Step::Complete,
        "d.jpg",
        ApiError::Server {
            status: 503,
            message: "try later".into(),
        },
    );
    client.uploader.add_files(vec![
        jpeg("a.jpg", b"aaaa"),
        jpeg("b.jpg", b"bbbb"),
        jpeg("c.jpg", b"cccc"),
        jpeg("d.jpg", b"dddd"),
    ]);

    let stats = client.uploader.run_pending().await;
    assert_eq!(stats.complete, 1);
    assert_eq!(stats.error, 3);

    let tasks = client.uploader.snapshot();
    let by_name = |name: &str| tasks.iter().find(|t| t.filename == name).unwrap().clone();

    let a = by_name("a.jpg");
    assert_eq!(a.status, TaskStatus::Error);
    assert!(a.error.unwrap().starts_with("Failed to initiate upload"));
    assert_eq!(a.progress, 10);

    let b = by_name("b.jpg");
    assert!(b.error.unwrap().starts_with("Storage upload failed"));
    assert_eq!(b.progress, 30);

    assert_eq!(by_name("c.jpg").status, TaskStatus::Complete);

    // Completion failure: the stored object is left in place.
    let d = by_name("d.jpg");
    assert_eq!(d.status, TaskStatus::Error);
    assert_eq!(d.progress, 80);
    assert!(!d.error.unwrap().is_empty());
    assert!(backend.object_for(&d.photo_id.unwrap()).is_some());
}

#[tokio::test]
async fn window_bounds_concurrent_transfers() {
    let (backend, client) = signed_in(UploadConfig {
        concurrency: 2,
        ..UploadConfig::default()
    })
    .await;
    backend.set_transfer_delay(Duration::from_millis(60));
    let files: Vec<UploadFile> = (0..6)
        .map(|i| jpeg(&format!("photo-{}.jpg", i), b"pixels"))
        .collect();
    client.uploader.add_files(files);

    let stats = client.uploader.run_pending().await;
    assert_eq!(stats.complete, 6);
    assert_eq!(backend.max_concurrent_transfers(), 2);
}

#[tokio::test]
async fn retry_restarts_from_initiate() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    backend.fail_step(
        Step::Transfer,
        "x.jpg",
        ApiError::Transport("connection reset".into()),
    );
    let id = client.uploader.add_files(vec![jpeg("x.jpg", b"xx")]).added[0];
    client.uploader.run_pending().await;
    let failed = client.uploader.task(id).unwrap();
    assert_eq!(failed.status, TaskStatus::Error);
    let first_photo = failed.photo_id.unwrap();

    backend.clear_failures();
    let retried = client.uploader.retry(id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Complete);
    assert_eq!(retried.error, None);
    assert_ne!(retried.photo_id.unwrap(), first_photo);
    assert_eq!(backend.call_count("initiate_upload"), 2);
}

#[tokio::test]
async fn completed_tasks_are_not_retried() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    let id = client.uploader.add_files(vec![jpeg("ok.jpg", b"1")]).added[0];
    client.uploader.run_pending().await;
    client.uploader.retry(id).await;
    client.uploader.run_pending().await;
    assert_eq!(backend.call_count("initiate_upload"), 1);
}

#[tokio::test]
async fn selection_guards_reject_instead_of_queueing() {
    let (backend, client) = signed_in(UploadConfig {
        max_files: 2,
        max_file_size: 8,
        ..UploadConfig::default()
    })
    .await;
    let outcome = client.uploader.add_files(vec![
        UploadFile::from_bytes("notes.txt", "text/plain", &b"hi"[..]),
        jpeg("huge.jpg", b"0123456789"),
        jpeg("one.jpg", b"1"),
        jpeg("two.jpg", b"2"),
        jpeg("three.jpg", b"3"),
    ]);
    assert_eq!(outcome.added.len(), 2);
    assert!(matches!(outcome.rejected[0], SelectionError::NotAnImage { .. }));
    assert!(matches!(outcome.rejected[1], SelectionError::TooLarge { .. }));
    assert!(matches!(outcome.rejected[2], SelectionError::TooManyFiles { max: 2 }));
    assert_eq!(backend.total_calls(), 1);
}

#[tokio::test]
async fn remove_and_clear_only_touch_local_bookkeeping() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    let ids = client
        .uploader
        .add_files(vec![jpeg("keep.jpg", b"k"), jpeg("drop.jpg", b"d")])
        .added;
    assert!(client.uploader.remove(ids[1]));
    assert!(!client.uploader.remove(ids[1]));
    client.uploader.run_pending().await;
    assert_eq!(client.uploader.snapshot().len(), 1);
    assert_eq!(backend.call_count("initiate_upload"), 1);

    client.uploader.clear();
    assert_eq!(client.uploader.stats().total, 0);
}

#[tokio::test]
async fn rejected_token_fails_task_and_ends_session() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    backend.revoke_tokens();
    let id = client.uploader.add_files(vec![jpeg("late.jpg", b"l")]).added[0];
    client.uploader.run_pending().await;
    let task = client.uploader.task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(
        task.error.as_deref(),
        Some("Failed to initiate upload: authentication rejected: authentication required")
    );
    assert!(!task.transient);
    assert!(!client.session.is_authenticated());
}

#[tokio::test]
async fn files_on_disk_are_read_at_transfer_time() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("beach.jpg");
    std::fs::write(&path, b"jpeg-bytes").unwrap();

    let file = UploadFile::from_path(&path).unwrap();
    assert_eq!(file.content_type, "image/jpeg");
    assert_eq!(file.size, Some(10));
    let id = client.uploader.add_files(vec![file]).added[0];
    client.uploader.run_pending().await;

    let task = client.uploader.task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    let photo = backend.object_for(&task.photo_id.unwrap()).unwrap();
    assert_eq!(photo.as_ref(), b"jpeg-bytes");
}

#[tokio::test]
async fn completed_photo_may_still_be_processing() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    let id = client.uploader.add_files(vec![jpeg("slow.jpg", b"s")]).added[0];
    client.uploader.run_pending().await;
    let photo_id = client.uploader.task(id).unwrap().photo_id.unwrap();
    backend.set_photo_status(&photo_id, PhotoStatus::Processing);

    let page = client.gallery.list(None, 0, None).await.unwrap();
    assert_eq!(page.photos[0].status, PhotoStatus::Processing);
    assert_eq!(client.uploader.task(id).unwrap().status, TaskStatus::Complete);
}

#[tokio::test]
async fn overlapping_batches_never_upload_a_task_twice() {
    let (backend, client) = signed_in(UploadConfig {
        concurrency: 1,
        ..UploadConfig::default()
    })
    .await;
    backend.set_transfer_delay(Duration::from_millis(50));
    client.uploader.add_files(vec![
        jpeg("one.jpg", b"1"),
        jpeg("two.jpg", b"2"),
        jpeg("three.jpg", b"3"),
    ]);

    let (first, second) = tokio::join!(client.uploader.run_pending(), client.uploader.run_pending());
    assert_eq!(backend.call_count("initiate_upload"), 3);
    assert_eq!(backend.call_count("put_object"), 3);
    assert_eq!(backend.max_concurrent_transfers(), 1);
    assert_eq!(first.complete.max(second.complete), 3);
    assert_eq!(client.uploader.stats().complete, 3);
}

#[tokio::test]
async fn batches_share_one_window() {
    let (backend, client) = signed_in(UploadConfig {
        concurrency: 2,
        ..UploadConfig::default()
    })
    .await;
    backend.set_transfer_delay(Duration::from_millis(50));
    client
        .uploader
        .add_files(vec![jpeg("a.jpg", b"a"), jpeg("b.jpg", b"b")]);
    let later = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        client
            .uploader
            .add_files(vec![jpeg("c.jpg", b"c"), jpeg("d.jpg", b"d")]);
        client.uploader.run_pending().await
    };
    tokio::join!(client.uploader.run_pending(), later);
    assert_eq!(backend.call_count("initiate_upload"), 4);
    assert_eq!(backend.max_concurrent_transfers(), 2);
    assert_eq!(client.uploader.stats().complete, 4);
}

#[tokio::test]
async fn transient_failure_is_flagged_for_retry() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    backend.fail_step(
        Step::Transfer,
        "flaky.jpg",
        ApiError::Server {
            status: 502,
            message: "bad gateway".into(),
        },
    );
    let id = client.uploader.add_files(vec![jpeg("flaky.jpg", b"f")]).added[0];
    client.uploader.run_pending().await;
    assert!(client.uploader.task(id).unwrap().transient);

    backend.clear_failures();
    let retried = client.uploader.retry(id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Complete);
    assert!(!retried.transient);
}

#[tokio::test]
async fn declared_size_mismatch_still_uploads() {
    let (backend, client) = signed_in(UploadConfig::default()).await;
    let file = UploadFile::from_bytes("m.jpg", "image/jpeg", &b"abc"[..]).with_size(5);
    let id = client.uploader.add_files(vec![file]).added[0];
    client.uploader.run_pending().await;

    let task = client.uploader.task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.progress, 100);
    assert_eq!(task.declared_size, Some(5));
    let stored = backend.object_for(&task.photo_id.unwrap()).unwrap();
    assert_eq!(stored.as_ref(), b"abc");
}
