//! The blob protocol over the wire: stat, upload, fetch, enumerate,
//! remove, auth, corruption.

use bytes::Bytes;
use hoard_integration_tests::{TEST_PASSWORD, TEST_USER, TestServer, test_data_seeded};
use hoard_store::{BlobRemover, BlobSink};
use hoard_types::{BlobRef, HashAlgo};
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn test_upload_fetch_round_trip() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let data = test_data_seeded(50_000, 1);
    let handle = hoard_client::UploadHandle::from_data(Bytes::from(data.clone()));
    let br = handle.blob_ref.clone();

    let pr = client.upload(handle).await.unwrap();
    assert!(!pr.skipped);
    assert_eq!(pr.size, data.len() as u64);

    let (mut stream, size) = client.fetch_blob(&br).await.unwrap().unwrap();
    assert_eq!(size, data.len() as u64);
    let mut fetched = Vec::new();
    stream.read_to_end(&mut fetched).await.unwrap();
    assert_eq!(fetched, data);
}

/// Upload is idempotent: the second call changes nothing server-side and
/// reports `skipped`.
#[tokio::test]
async fn test_upload_idempotent() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let data = Bytes::from_static(b"upload me twice");
    let first = client
        .upload(hoard_client::UploadHandle::from_data(data.clone()))
        .await
        .unwrap();
    assert!(!first.skipped);

    let count_before = server.storage.len();
    let second = client
        .upload(hoard_client::UploadHandle::from_data(data))
        .await
        .unwrap();
    assert!(second.skipped, "second upload must be skipped");
    assert_eq!(first.blob_ref, second.blob_ref);
    assert_eq!(server.storage.len(), count_before);
}

#[tokio::test]
async fn test_stat_reports_presence_and_size() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let data = Bytes::from_static(b"statted blob");
    let pr = client
        .upload(hoard_client::UploadHandle::from_data(data.clone()))
        .await
        .unwrap();
    let ghost = BlobRef::from_data(HashAlgo::Sha1, b"never uploaded");

    let resp = client
        .stat(&[pr.blob_ref.clone(), ghost], None)
        .await
        .unwrap();
    assert_eq!(resp.stat.len(), 1);
    assert_eq!(resp.stat[0].blob_ref, pr.blob_ref);
    assert_eq!(resp.stat[0].size, data.len() as u64);
    assert!(resp.max_upload_size.is_some());
}

#[tokio::test]
async fn test_fetch_missing_is_none() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let ghost = BlobRef::from_data(HashAlgo::Sha1, b"not there");
    assert!(client.fetch_blob(&ghost).await.unwrap().is_none());
}

/// A body whose hash differs from the declared ref is rejected and leaves
/// neither storage nor index state.
#[tokio::test]
async fn test_corrupt_upload_rejected() {
    let server = TestServer::spawn().await;
    let declared = BlobRef::from_data(HashAlgo::Sha1, b"the promised bytes");

    let part = reqwest::multipart::Part::bytes(b"entirely different bytes".to_vec())
        .file_name(declared.to_string());
    let form = reqwest::multipart::Form::new().part(declared.to_string(), part);
    let resp = reqwest::Client::new()
        .post(format!("{}/camli/upload", server.url()))
        .basic_auth(TEST_USER, Some(TEST_PASSWORD))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(server.storage.stat(&[declared.clone()]).await.unwrap().is_empty());
    assert!(server
        .indexer
        .store()
        .get_blob_row(&declared)
        .unwrap()
        .is_none());
}

/// Remove semantics: after removal the blob stats absent; a second remove
/// succeeds with an empty removed set.
#[tokio::test]
async fn test_remove_then_stat_absent() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let data = Bytes::from_static(b"short-lived blob");
    let pr = client
        .upload(hoard_client::UploadHandle::from_data(data))
        .await
        .unwrap();

    client.remove_blobs(std::slice::from_ref(&pr.blob_ref)).await.unwrap();
    let resp = client.stat(std::slice::from_ref(&pr.blob_ref), None).await.unwrap();
    assert!(resp.stat.is_empty(), "removed blob must stat absent");

    // Second remove at the storage level: empty removed set, no error.
    let removed = server
        .storage
        .remove(std::slice::from_ref(&pr.blob_ref))
        .await
        .unwrap();
    assert!(removed.is_empty());

    // Through the client, the missing ref is reported.
    let err = client
        .remove_blobs(std::slice::from_ref(&pr.blob_ref))
        .await
        .unwrap_err();
    assert!(matches!(err, hoard_client::ClientError::RemoveIncomplete(_)));
}

#[tokio::test]
async fn test_enumerate_paginates_in_order() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let mut refs = Vec::new();
    for i in 0..25u32 {
        let data = Bytes::from(test_data_seeded(100, i));
        let pr = client
            .upload(hoard_client::UploadHandle::from_data(data))
            .await
            .unwrap();
        refs.push(pr.blob_ref.to_string());
    }
    refs.sort();

    let mut listed = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = client.enumerate_page(after.as_deref(), 10, None).await.unwrap();
        listed.extend(page.blobs.iter().map(|s| s.blob_ref.to_string()));
        match page.continue_after {
            Some(next) => after = Some(next),
            None => break,
        }
    }
    assert_eq!(listed, refs);
}

/// The upload helper writes posted files through the server-side file
/// writer and returns their schema refs.
#[tokio::test]
async fn test_upload_helper_writes_file_schema() {
    let server = TestServer::spawn().await;

    let content = test_data_seeded(20_000, 9);
    let part = reqwest::multipart::Part::bytes(content.clone()).file_name("photo.bin");
    let form = reqwest::multipart::Form::new().part("ui-upload-file", part);
    let resp = reqwest::Client::new()
        .post(format!("{}/camli/uploadhelper", server.url()))
        .basic_auth(TEST_USER, Some(TEST_PASSWORD))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let body: serde_json::Value = resp.json().await.unwrap();
    let got = body["got"].as_array().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["filename"], "photo.bin");
    assert_eq!(got[0]["formname"], "ui-upload-file");

    // The returned ref names a file schema blob that reassembles the
    // posted content.
    let file_ref = BlobRef::parse(got[0]["fileref"].as_str().unwrap()).unwrap();
    let reader = hoard_schema::FileReader::new(&*server.storage, &file_ref)
        .await
        .unwrap();
    assert_eq!(reader.read_all().await.unwrap(), content);

    // And the index saw it.
    let row = server.indexer.store().get_file_row(&file_ref).unwrap().unwrap();
    assert_eq!(row.file_name.as_deref(), Some("photo.bin"));
    assert_eq!(row.size, content.len() as u64);
}

#[tokio::test]
async fn test_requests_require_auth() {
    let server = TestServer::spawn().await;
    let http = reqwest::Client::new();

    // No credentials.
    let resp = http
        .post(format!("{}/camli/stat", server.url()))
        .form(&[("blob1", "sha1-0000000000000000000000000000000000000000")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Wrong password.
    let resp = http
        .post(format!("{}/camli/stat", server.url()))
        .basic_auth(TEST_USER, Some("wrong"))
        .form(&[("blob1", "sha1-0000000000000000000000000000000000000000")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_ref_is_bad_request() {
    let server = TestServer::spawn().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/camli/stat", server.url()))
        .basic_auth(TEST_USER, Some(TEST_PASSWORD))
        .form(&[("blob1", "not-a-blobref")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}
