//! End-to-end ingestion: files, trees, symlinks, caches.

use std::sync::Arc;

use hoard_client::{MemCache, UploaderConfig};
use hoard_integration_tests::{TestServer, test_data_seeded};
use hoard_schema::{FileReader, Superset};
use hoard_store::SeekFetcher;
use hoard_types::{BlobRef, HashAlgo};

/// Single small file: one part of size 6 referencing sha1("hello\n"),
/// and a deterministic top-level ref across independent runs.
#[tokio::test]
async fn test_single_small_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    std::fs::write(&path, b"hello\n").unwrap();

    let mut top_refs = Vec::new();
    for _ in 0..2 {
        let server = TestServer::spawn().await;
        let uploader = server.uploader();
        let pr = uploader.clone().upload_path(&path).await.unwrap();
        top_refs.push(pr.blob_ref.clone());

        // Inspect the file schema blob on the server.
        let raw = server.storage.fetch(&pr.blob_ref).await.unwrap().unwrap();
        let ss = Superset::parse(&raw).unwrap();
        assert_eq!(ss.kind, "file");
        let parts = ss.parts.as_ref().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size, 6);
        assert_eq!(
            parts[0].blob_ref.as_ref().unwrap(),
            &BlobRef::from_data(HashAlgo::Sha1, b"hello\n")
        );
    }
    assert_eq!(top_refs[0], top_refs[1], "top-level ref must be deterministic");
}

/// Directory children upload concurrently, but the static-set lists them
/// in sorted-name order.
#[tokio::test]
async fn test_directory_static_set_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("D");
    std::fs::create_dir(&tree).unwrap();
    // Created in reverse order; readdir order is arbitrary anyway.
    std::fs::write(tree.join("b"), b"file b").unwrap();
    std::fs::write(tree.join("a"), b"file a").unwrap();

    let server = TestServer::spawn().await;
    let uploader = server.uploader();
    let pr = uploader.clone().upload_path(&tree).await.unwrap();

    let raw = server.storage.fetch(&pr.blob_ref).await.unwrap().unwrap();
    let dir_ss = Superset::parse(&raw).unwrap();
    assert_eq!(dir_ss.kind, "directory");

    let set_ref = dir_ss.entries.unwrap();
    let raw = server.storage.fetch(&set_ref).await.unwrap().unwrap();
    let set_ss = Superset::parse(&raw).unwrap();
    assert_eq!(set_ss.kind, "static-set");

    let members = set_ss.members.unwrap();
    assert_eq!(members.len(), 2);

    // Resolve each member's file name; order must be a, b.
    let mut names = Vec::new();
    for member in &members {
        let raw = server.storage.fetch(member).await.unwrap().unwrap();
        let ss = Superset::parse(&raw).unwrap();
        names.push(String::from_utf8(ss.file_name().unwrap()).unwrap());
    }
    assert_eq!(names, vec!["a", "b"]);
}

/// A populated stat cache serves repeat uploads with zero network I/O:
/// the second ingest succeeds even after the server is gone.
#[tokio::test]
async fn test_stat_cache_hit_makes_no_requests() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cached.bin");
    std::fs::write(&path, test_data_seeded(10_000, 7)).unwrap();

    let server = TestServer::spawn().await;
    let cache = Arc::new(MemCache::new());
    let uploader = Arc::new(
        hoard_client::Uploader::new(server.client(), UploaderConfig::default())
            .unwrap()
            .with_stat_cache(cache.clone())
            .with_have_cache(cache),
    );

    let first = uploader.clone().upload_path(&path).await.unwrap();

    server.shutdown();
    // Give the abort a moment to tear the listener down.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let second = uploader.clone().upload_path(&path).await.unwrap();
    assert_eq!(first, second, "cached result must match the original");
}

/// Reassembling the uploaded parts yields the original bytes, for both
/// chunking modes and for sizes spanning multiple chunks.
#[tokio::test]
async fn test_reassembly_round_trip_both_modes() {
    for mode in [
        hoard_chunk::ChunkMode::Fixed(64 * 1024),
        hoard_chunk::ChunkMode::Rolling,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data = test_data_seeded(700_000, 21);
        std::fs::write(&path, &data).unwrap();

        let server = TestServer::spawn().await;
        let uploader = Arc::new(
            hoard_client::Uploader::new(
                server.client(),
                UploaderConfig {
                    chunk_mode: mode,
                    ..UploaderConfig::default()
                },
            )
            .unwrap(),
        );

        let pr = uploader.clone().upload_path(&path).await.unwrap();
        let reader = FileReader::new(&*server.storage, &pr.blob_ref).await.unwrap();
        assert_eq!(reader.size(), data.len() as u64);
        assert_eq!(reader.read_all().await.unwrap(), data, "mode {mode:?}");
    }
}

/// The top-level ref is a function of tree content only: re-walking the
/// same tree with different concurrency limits yields the same ref.
#[tokio::test]
async fn test_tree_ref_independent_of_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("T");
    std::fs::create_dir(&tree).unwrap();
    std::fs::create_dir(tree.join("sub")).unwrap();
    for i in 0..20 {
        std::fs::write(tree.join(format!("f{i:02}")), test_data_seeded(2000, i)).unwrap();
        std::fs::write(
            tree.join("sub").join(format!("g{i:02}")),
            test_data_seeded(3000, 100 + i),
        )
        .unwrap();
    }

    let server = TestServer::spawn().await;
    let mut refs = Vec::new();
    for (files, fanout) in [(1, 1), (10, 100)] {
        let uploader = Arc::new(
            hoard_client::Uploader::new(
                server.client(),
                UploaderConfig {
                    file_concurrency: files,
                    dir_fanout: fanout,
                    ..UploaderConfig::default()
                },
            )
            .unwrap(),
        );
        refs.push(uploader.clone().upload_path(&tree).await.unwrap().blob_ref);
    }
    assert_eq!(refs[0], refs[1], "walk schedule must not affect the ref");
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_schema_blob() {
    let dir = tempfile::tempdir().unwrap();
    let link = dir.path().join("link");
    std::os::unix::fs::symlink("../target/elsewhere", &link).unwrap();

    let server = TestServer::spawn().await;
    let uploader = server.uploader();
    let pr = uploader.clone().upload_path(&link).await.unwrap();

    let raw = server.storage.fetch(&pr.blob_ref).await.unwrap().unwrap();
    let ss = Superset::parse(&raw).unwrap();
    assert_eq!(ss.kind, "symlink");
    assert_eq!(ss.symlink_target.as_deref(), Some("../target/elsewhere"));
    // Symlinks don't carry a permission field.
    assert!(ss.unix_permission.is_none());
}

/// A fifo fails with unimplemented, siblings still upload, and the
/// directory reports the error after all children settle.
#[cfg(unix)]
#[tokio::test]
async fn test_unsupported_inode_fails_directory_but_not_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("mixed");
    std::fs::create_dir(&tree).unwrap();
    std::fs::write(tree.join("normal.txt"), b"fine").unwrap();
    let status = std::process::Command::new("mkfifo")
        .arg(tree.join("pipe"))
        .status()
        .expect("mkfifo");
    assert!(status.success());

    let server = TestServer::spawn().await;
    let uploader = server.uploader();
    let err = uploader.clone().upload_path(&tree).await.unwrap_err();
    assert!(
        matches!(err, hoard_client::ClientError::Unimplemented(_)),
        "got {err}"
    );

    // The regular sibling was still uploaded.
    let file_ref = BlobRef::from_data(HashAlgo::Sha1, b"fine");
    assert!(server.storage.fetch(&file_ref).await.unwrap().is_some());
}

/// Deep narrow trees exceed the upload semaphore's capacity; the
/// release-before-recurse discipline must keep this from deadlocking.
#[tokio::test]
async fn test_deep_tree_no_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let mut path = dir.path().join("deep");
    for _ in 0..30 {
        path = path.join("d");
    }
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("leaf.txt"), b"bottom").unwrap();

    let server = TestServer::spawn().await;
    // Tiny semaphore to make token starvation immediate if held wrongly.
    let uploader = Arc::new(
        hoard_client::Uploader::new(
            server.client(),
            UploaderConfig {
                file_concurrency: 2,
                ..UploaderConfig::default()
            },
        )
        .unwrap(),
    );

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        uploader.clone().upload_path(&dir.path().join("deep")),
    )
    .await
    .expect("deep tree upload deadlocked");
    result.unwrap();
}

/// Canceling the token stops the walk with a canceled error.
#[tokio::test]
async fn test_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"data").unwrap();

    let server = TestServer::spawn().await;
    let uploader = server.uploader();
    uploader.cancellation_token().cancel();

    let err = uploader.clone().upload_path(dir.path()).await.unwrap_err();
    assert!(matches!(err, hoard_client::ClientError::Canceled));
}
